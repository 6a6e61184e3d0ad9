//! Request path → file under the document root.
//!
//! # Responsibilities
//! - Percent-decode the request path
//! - Reject paths that climb above the root, lexically or through symlinks
//! - Decide whether a path is a gateway target (CGI suffix)
//!
//! # Design Decisions
//! - The root is canonicalized once at startup
//! - Lexical check first, so nonexistent paths are still contained
//! - Missing files are reported, not rejected; the caller picks the status

use std::path::{Path, PathBuf};

use crate::cgi::error::GatewayError;

/// Served when a request names a directory.
pub const INDEX_FILE: &str = "index.html";

/// A request path mapped onto the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Absolute path under the root; canonical when `exists`.
    pub path: PathBuf,
    /// Normalized, decoded request path, e.g. `/cgi/calc.cgi`.
    pub script_name: String,
    pub exists: bool,
}

/// Maps request paths into a document root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    cgi_suffix: String,
}

impl PathResolver {
    /// Create a resolver. Fails if `root` does not exist.
    pub fn new(root: &Path, cgi_suffix: impl Into<String>) -> std::io::Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
            cgi_suffix: cgi_suffix.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// True when `path` should be executed rather than served.
    pub fn is_gateway_target(&self, path: &str) -> bool {
        path.ends_with(&self.cgi_suffix)
    }

    /// Resolve a raw request path.
    pub fn resolve(&self, request_path: &str) -> Result<ResolvedPath, GatewayError> {
        let decoded = percent_decode(request_path)
            .ok_or_else(|| GatewayError::NotFound(request_path.to_string()))?;
        if decoded.contains('\0') {
            return Err(GatewayError::Forbidden(request_path.to_string()));
        }

        let mut segments: Vec<&str> = Vec::new();
        for segment in decoded.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(GatewayError::Forbidden(request_path.to_string()));
                    }
                }
                s => segments.push(s),
            }
        }

        let script_name = format!("/{}", segments.join("/"));
        let mut path = segments.iter().fold(self.root.clone(), |p, s| p.join(s));
        if path.is_dir() && !self.is_gateway_target(&script_name) {
            path.push(INDEX_FILE);
        }

        match path.canonicalize() {
            Ok(canonical) if canonical.starts_with(&self.root) => Ok(ResolvedPath {
                path: canonical,
                script_name,
                exists: true,
            }),
            Ok(canonical) => {
                tracing::warn!(
                    path = %request_path,
                    target = %canonical.display(),
                    "Path escapes document root"
                );
                Err(GatewayError::Forbidden(request_path.to_string()))
            }
            Err(_) => Ok(ResolvedPath {
                path,
                script_name,
                exists: false,
            }),
        }
    }
}

/// Decode `%XX` escapes. `None` for malformed escapes or non-UTF-8 results.
fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            if !hex.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
