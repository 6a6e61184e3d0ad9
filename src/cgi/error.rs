//! Gateway error taxonomy and its HTTP mapping.
//!
//! # Design Decisions
//! - Every failure the gateway can hit is one variant, so callers match on kind
//! - Errors raised before the status line is committed become JSON responses
//! - Errors raised after the commit can only abort the response stream
//! - Messages never carry child process output

use std::path::PathBuf;
use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Errors produced while resolving, spawning or streaming a gateway target.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request path does not map to a file under the document root.
    #[error("no such file: {0}")]
    NotFound(String),

    /// The request path escapes the document root or is otherwise unusable.
    #[error("path is outside the document root: {0}")]
    Forbidden(String),

    /// The router does not serve this method.
    #[error("method {0} is not supported")]
    MethodNotAllowed(String),

    /// The script could not be started.
    #[error("failed to start {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A pipe operation failed mid-exchange.
    #[error("pipe error: {0}")]
    Io(#[from] std::io::Error),

    /// The request body could not be read from the client.
    #[error("request body error: {0}")]
    Body(String),

    /// The exchange exceeded its deadline.
    #[error("exchange exceeded {0:?}")]
    Timeout(Duration),

    /// The client went away before the response finished.
    #[error("client disconnected")]
    ClientDisconnected,
}

impl GatewayError {
    /// Short machine-readable kind, used in JSON bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::NotFound(_) => "not_found",
            GatewayError::Forbidden(_) => "forbidden",
            GatewayError::MethodNotAllowed(_) => "method_not_allowed",
            GatewayError::Spawn { .. } => "spawn_failed",
            GatewayError::Io(_) => "io_error",
            GatewayError::Body(_) => "bad_body",
            GatewayError::Timeout(_) => "timeout",
            GatewayError::ClientDisconnected => "client_disconnected",
        }
    }

    /// Status returned when the error surfaces before the response is committed.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            GatewayError::Body(_) => StatusCode::BAD_REQUEST,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::ClientDisconnected => StatusCode::BAD_REQUEST,
            GatewayError::Spawn { .. } | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing reason. Server-side details stay in the logs.
    fn public_reason(&self) -> String {
        match self {
            GatewayError::NotFound(path) => format!("{} was not found", path),
            GatewayError::Forbidden(path) => format!("access to {} is forbidden", path),
            GatewayError::MethodNotAllowed(method) => format!("method {} is not supported", method),
            GatewayError::Spawn { .. } => "the script could not be executed".to_string(),
            GatewayError::Io(_) => "the script exchange failed".to_string(),
            GatewayError::Body(_) => "the request body could not be read".to_string(),
            GatewayError::Timeout(limit) => {
                format!("the script did not finish within {}s", limit.as_secs())
            }
            GatewayError::ClientDisconnected => "client disconnected".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    reason: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.kind(),
            reason: self.public_reason(),
        };
        let bytes = serde_json::to_vec_pretty(&body).unwrap_or_default();

        let mut response = (self.status(), bytes).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        response
    }
}
