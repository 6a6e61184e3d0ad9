//! Request projection and request IDs.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) for every inbound request
//! - Project an axum request into the read-only view the gateway needs
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The view borrows the request parts; the body travels separately

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Version};
use tower_http::request_id::{MakeRequestId, RequestId};

/// Header carrying the request ID in both directions.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates UUID v4 request IDs for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV4;

impl MakeRequestId for MakeRequestUuidV4 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Read the request ID set by the request-id layer, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Read-only projection of an inbound request.
///
/// Header lookups go through [`HeaderMap`], which is case-insensitive.
/// The body is not part of the view; it is handed to the streaming bridge.
#[derive(Debug, Clone)]
pub struct HttpRequestView<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    /// Raw query string without the leading `?`; empty when absent.
    pub query: &'a str,
    pub version: Version,
    pub headers: &'a HeaderMap,
    /// Media type without parameters, when the request declares one.
    pub content_type: Option<String>,
    /// Parsed `Content-Length`, when present and well-formed.
    pub content_length: Option<u64>,
    pub remote_addr: Option<SocketAddr>,
}

impl<'a> HttpRequestView<'a> {
    /// Build the view from request parts.
    pub fn from_parts(parts: &'a Parts) -> Self {
        let content_type = parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| !v.is_empty());

        let content_length = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            method: &parts.method,
            path: parts.uri.path(),
            query: parts.uri.query().unwrap_or(""),
            version: parts.version,
            headers: &parts.headers,
            content_type,
            content_length,
            remote_addr,
        }
    }

    /// Whether the method carries a request body to forward.
    pub fn has_body(&self) -> bool {
        matches!(*self.method, Method::POST | Method::PUT | Method::PATCH)
    }
}
