//! Non-gateway responses.
//!
//! # Responsibilities
//! - Serve static files that resolved inside the document root
//! - Produce the plain-text 404 for POSTs to non-gateway paths
//!
//! # Design Decisions
//! - Static bodies are streamed by tower-http, never buffered whole
//! - Gateway errors render themselves (see `cgi::error`)

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::cgi::error::GatewayError;
use crate::routing::resolver::ResolvedPath;

/// Serve a resolved file.
pub async fn serve_static(request: Request<Body>, target: &ResolvedPath) -> Result<Response, GatewayError> {
    if !target.exists {
        return Err(GatewayError::NotFound(target.script_name.clone()));
    }

    let response = ServeFile::new(&target.path)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});
    Ok(response.map(Body::new))
}

/// Plain-text 404 for POSTs that do not name a gateway target.
pub fn post_not_found() -> Response {
    let mut response = (StatusCode::NOT_FOUND, "Not found.").into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn serves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, "hi there").unwrap();
        let target = ResolvedPath {
            path,
            script_name: "/hello.txt".into(),
            exists: true,
        };

        let request = Request::builder().uri("/hello.txt").body(Body::empty()).unwrap();
        let response = serve_static(request, &target).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"hi there");
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let target = ResolvedPath {
            path: PathBuf::from("/nowhere/x.txt"),
            script_name: "/x.txt".into(),
            exists: false,
        };
        let request = Request::builder().uri("/x.txt").body(Body::empty()).unwrap();
        let err = serve_static(request, &target).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_not_found_is_plain_text() {
        let response = post_not_found();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"Not found.");
    }
}
