//! HTTP request metadata → CGI/1.1 environment.
//!
//! # Responsibilities
//! - Overlay the CGI meta-variables onto a snapshot of the ambient environment
//! - Expose every request header as `HTTP_<NAME>`
//! - Pass through Basic credentials as `AUTH_TYPE` / `REMOTE_USER`
//!
//! # Design Decisions
//! - The ambient environment is captured once at startup, never re-read
//! - Translation is a pure function of its inputs
//! - Credential parsing is best effort; malformed input sets nothing

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::{header, HeaderMap, Version};
use base64::Engine as _;

use crate::http::request::HttpRequestView;

/// Value of `GATEWAY_INTERFACE`.
pub const GATEWAY_INTERFACE: &str = "CGI/1.1";

/// Keys that every environment carries, possibly with an empty value.
pub const REQUIRED_KEYS: [&str; 12] = [
    "SERVER_SOFTWARE",
    "SERVER_NAME",
    "GATEWAY_INTERFACE",
    "SERVER_PROTOCOL",
    "SERVER_PORT",
    "REQUEST_METHOD",
    "PATH_INFO",
    "PATH_TRANSLATED",
    "SCRIPT_NAME",
    "CONTENT_TYPE",
    "CONTENT_LENGTH",
    "REMOTE_ADDR",
];

/// Meta-variables that only ever come from the request being translated.
const REQUEST_SCOPED_KEYS: [&str; 14] = [
    "QUERY_STRING",
    "AUTH_TYPE",
    "REMOTE_USER",
    "REMOTE_ADDR",
    "REMOTE_HOST",
    "REMOTE_IDENT",
    "CONTENT_TYPE",
    "CONTENT_LENGTH",
    "SCRIPT_NAME",
    "PATH_INFO",
    "PATH_TRANSLATED",
    "REQUEST_METHOD",
    "SERVER_PROTOCOL",
    "GATEWAY_INTERFACE",
];

fn is_request_scoped(key: &str) -> bool {
    key.starts_with("HTTP_") || REQUEST_SCOPED_KEYS.contains(&key)
}

/// Snapshot of the process environment taken at startup.
///
/// Request-scoped CGI variables (`QUERY_STRING`, `HTTP_*` and friends) are
/// dropped, so a script only ever sees the ones its own request sets.
#[derive(Debug, Clone, Default)]
pub struct AmbientEnv(Arc<BTreeMap<String, String>>);

impl AmbientEnv {
    /// Capture the current process environment. Non-UTF-8 entries are skipped.
    pub fn capture() -> Self {
        Self::from_vars(std::env::vars_os().filter_map(|(k, v)| {
            Some((k.into_string().ok()?, v.into_string().ok()?))
        }))
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(Arc::new(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .filter(|(k, _)| !is_request_scoped(k))
                .collect(),
        ))
    }
}

/// Environment handed to one CGI process. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiEnvironment(BTreeMap<String, String>);

impl CgiEnvironment {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Builds [`CgiEnvironment`]s for one listening server.
#[derive(Debug, Clone)]
pub struct EnvTranslator {
    ambient: AmbientEnv,
    server_software: String,
    server_name: String,
    server_port: u16,
}

impl EnvTranslator {
    pub fn new(ambient: AmbientEnv, server_name: impl Into<String>, server_port: u16) -> Self {
        Self {
            ambient,
            server_software: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            server_name: server_name.into(),
            server_port,
        }
    }

    /// Translate a request bound for `script_name` into its CGI environment.
    pub fn translate(&self, request: &HttpRequestView<'_>, script_name: &str) -> CgiEnvironment {
        let mut env = (*self.ambient.0).clone();
        let mut set = |key: &str, value: String| {
            env.insert(key.to_string(), value);
        };

        set("SERVER_SOFTWARE", self.server_software.clone());
        set("SERVER_NAME", self.server_name.clone());
        set("GATEWAY_INTERFACE", GATEWAY_INTERFACE.to_string());
        set("SERVER_PROTOCOL", protocol_name(request.version).to_string());
        set("SERVER_PORT", self.server_port.to_string());
        set("REQUEST_METHOD", request.method.as_str().to_string());
        set("PATH_INFO", String::new());
        set("PATH_TRANSLATED", String::new());
        set("SCRIPT_NAME", script_name.to_string());
        if !request.query.is_empty() {
            set("QUERY_STRING", request.query.to_string());
        }
        set(
            "REMOTE_ADDR",
            request
                .remote_addr
                .map(|addr| addr.ip().to_string())
                .unwrap_or_default(),
        );

        if let Some(auth) = header_value(request.headers, header::AUTHORIZATION.as_str()) {
            let credentials = parse_authorization(&auth);
            if let Some(auth_type) = credentials.auth_type {
                set("AUTH_TYPE", auth_type);
            }
            if let Some(user) = credentials.remote_user {
                set("REMOTE_USER", user);
            }
        }

        set(
            "CONTENT_TYPE",
            request
                .content_type
                .clone()
                .or_else(|| header_value(request.headers, header::CONTENT_TYPE.as_str()))
                .unwrap_or_default(),
        );
        set(
            "CONTENT_LENGTH",
            request
                .content_length
                .map(|n| n.to_string())
                .or_else(|| header_value(request.headers, header::CONTENT_LENGTH.as_str()))
                .unwrap_or_default(),
        );

        for name in request.headers.keys() {
            if let Some(value) = header_value(request.headers, name.as_str()) {
                set(&http_variable_name(name.as_str()), value);
            }
        }

        CgiEnvironment(env)
    }
}

/// `HTTP_` + upper snake case of a header name.
pub fn http_variable_name(header_name: &str) -> String {
    format!("HTTP_{}", header_name.to_ascii_uppercase().replace('-', "_"))
}

/// Last value of a header, lossily decoded.
fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(name)
        .iter()
        .last()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
}

fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Credentials recovered from an `Authorization` header.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    pub auth_type: Option<String>,
    pub remote_user: Option<String>,
}

/// Best-effort parse of an `Authorization` header value.
pub fn parse_authorization(value: &str) -> Credentials {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    let [scheme, payload] = tokens.as_slice() else {
        return Credentials::default();
    };

    let mut credentials = Credentials {
        auth_type: Some(scheme.to_string()),
        remote_user: None,
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return credentials;
    }

    // Bytes outside the base64 alphabet are skipped, not rejected.
    let payload: Vec<u8> = payload
        .bytes()
        .filter(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
        .collect();
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(&payload)
        .ok()
        .filter(|bytes| bytes.is_ascii())
        .and_then(|bytes| String::from_utf8(bytes).ok());

    if let Some(text) = decoded {
        let parts: Vec<&str> = text.split(':').collect();
        if let [user, _password] = parts.as_slice() {
            credentials.remote_user = Some(user.to_string());
        }
    }
    credentials
}
