//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the dispatch handler
//! - Wire up middleware (tracing, timeout, body limit, request ID)
//! - Bind server to listener
//! - Dispatch requests to the gateway or the static file service

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, Method, Request},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::cgi::{
    AmbientEnv, EnvTranslator, Gateway, GatewayError, SpawnOptions, StreamingBridge,
};
use crate::config::GatewayConfig;
use crate::http::request::{request_id, MakeRequestUuidV4, X_REQUEST_ID};
use crate::http::response::{post_not_found, serve_static};
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::routing::PathResolver;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<PathResolver>,
    pub gateway: Arc<Gateway>,
}

/// HTTP server for the CGI gateway.
pub struct HttpServer {
    config: GatewayConfig,
    ambient: AmbientEnv,
}

impl HttpServer {
    /// Create a new HTTP server, snapshotting the ambient environment now.
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_ambient(config, AmbientEnv::capture())
    }

    /// Create a server whose scripts inherit `ambient` instead of the process environment.
    pub fn with_ambient(config: GatewayConfig, ambient: AmbientEnv) -> Self {
        Self { config, ambient }
    }

    /// Build the Axum router for a server listening on `port`.
    ///
    /// Fails if the document root does not exist.
    pub fn router(&self, port: u16) -> Result<Router, std::io::Error> {
        let resolver = PathResolver::new(&self.config.site.root, self.config.site.cgi_suffix.clone())?;
        let translator = EnvTranslator::new(
            self.ambient.clone(),
            self.config.listener.server_name.clone(),
            port,
        );
        let bridge = StreamingBridge::new(
            self.config.cgi.chunk_size,
            Duration::from_secs(self.config.cgi.timeout_secs),
        );
        let spawn = SpawnOptions {
            inherit_stderr: self.config.cgi.inherit_stderr,
        };

        let state = AppState {
            resolver: Arc::new(resolver),
            gateway: Arc::new(Gateway::new(translator, bridge, spawn)),
        };
        Ok(Self::build_router(&self.config, state))
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let x_request_id = HeaderName::from_static(X_REQUEST_ID);

        Router::new()
            .route("/{*path}", any(dispatch))
            .route("/", any(dispatch))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuidV4))
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, shutdown: ShutdownSignal) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let app = self
            .router(addr.port())?
            .into_make_service_with_connect_info::<SocketAddr>();

        tracing::info!(
            address = %addr,
            root = %self.config.site.root.display(),
            cgi_suffix = %self.config.site.cgi_suffix,
            "HTTP server starting"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.recv())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main handler: every request lands here.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        "Dispatching request"
    );

    let (kind, result) = route(&state, request).await;
    let response = match result {
        Ok(response) => response,
        Err(e) => {
            match &e {
                GatewayError::Spawn { .. } | GatewayError::Io(_) => {
                    tracing::error!(request_id = %request_id, path = %path, error = %e, "Gateway failure")
                }
                _ => tracing::warn!(request_id = %request_id, path = %path, error = %e, "Request rejected"),
            }
            metrics::record_error(&e);
            e.into_response()
        }
    };

    metrics::record_request(method.as_str(), response.status().as_u16(), kind, start_time);
    response
}

/// Pick the handler for a request. Returns the metrics kind alongside the result.
async fn route(state: &AppState, request: Request<Body>) -> (&'static str, Result<Response, GatewayError>) {
    let resolved = match state.resolver.resolve(request.uri().path()) {
        Ok(resolved) => resolved,
        Err(e) => return ("rejected", Err(e)),
    };
    let is_target = state.resolver.is_gateway_target(&resolved.script_name);
    let method = request.method().clone();

    match method {
        Method::GET | Method::HEAD | Method::POST if is_target => {
            ("cgi", state.gateway.start(request, &resolved))
        }
        Method::GET | Method::HEAD => ("static", serve_static(request, &resolved).await),
        Method::POST => ("rejected", Ok(post_not_found())),
        other => (
            "rejected",
            Err(GatewayError::MethodNotAllowed(other.to_string())),
        ),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::os::unix::fs::PermissionsExt;
    use tower::ServiceExt;

    fn server(root: &std::path::Path) -> HttpServer {
        let mut config = GatewayConfig::default();
        config.site.root = root.to_path_buf();
        config.cgi.timeout_secs = 5;
        HttpServer::with_ambient(config, AmbientEnv::from_vars([("PATH", "/usr/bin:/bin")]))
    }

    fn script(dir: &std::path::Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>, Response<()>) {
        let response = router.oneshot(request).await.unwrap();
        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(body, 1 << 20).await.unwrap();
        (parts.status, bytes.to_vec(), Response::from_parts(parts, ()))
    }

    #[tokio::test]
    async fn get_runs_script_with_query() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "q.cgi", "printf '%s %s' \"$REQUEST_METHOD\" \"$QUERY_STRING\"");
        let router = server(dir.path()).router(8080).unwrap();

        let (status, body, _) = send(
            router,
            Request::builder().uri("/q.cgi?x=2&y=3").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"GET x=2&y=3");
    }

    #[tokio::test]
    async fn post_pipes_body_to_script() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "echo.cgi", "cat");
        let router = server(dir.path()).router(8080).unwrap();

        let (status, body, _) = send(
            router,
            Request::builder()
                .method(Method::POST)
                .uri("/echo.cgi")
                .header("content-length", "5")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn missing_script_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let router = server(dir.path()).router(8080).unwrap();

        let (status, body, response) = send(
            router,
            Request::builder().uri("/missing.cgi").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers()["content-type"],
            "application/json; charset=utf-8"
        );
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "spawn_failed");
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let router = server(dir.path()).router(8080).unwrap();

        let (status, _, _) = send(
            router,
            Request::builder().uri("/../../etc/passwd").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn post_to_static_path_is_plain_404() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.html"), "<p>hi</p>").unwrap();
        let router = server(dir.path()).router(8080).unwrap();

        let (status, body, _) = send(
            router,
            Request::builder()
                .method(Method::POST)
                .uri("/page.html")
                .body(Body::from("x"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, b"Not found.");
    }

    #[tokio::test]
    async fn static_file_and_request_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page.html"), "<p>hi</p>").unwrap();
        let router = server(dir.path()).router(8080).unwrap();

        let (status, body, response) = send(
            router,
            Request::builder().uri("/page.html").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<p>hi</p>");
        assert!(response.headers().contains_key(X_REQUEST_ID));
    }

    #[tokio::test]
    async fn other_methods_are_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "x.cgi", "true");
        let router = server(dir.path()).router(8080).unwrap();

        let (status, _, _) = send(
            router,
            Request::builder().method(Method::DELETE).uri("/x.cgi").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn server_port_reaches_script() {
        let dir = tempfile::tempdir().unwrap();
        script(dir.path(), "port.cgi", "printf '%s:%s' \"$SERVER_NAME\" \"$SERVER_PORT\"");
        let router = server(dir.path()).router(4321).unwrap();

        let (_, body, _) = send(
            router,
            Request::builder().uri("/port.cgi").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(body, b"localhost:4321");
    }

    #[test]
    fn missing_root_fails_router_build() {
        let mut config = GatewayConfig::default();
        config.site.root = "/definitely/not/a/root".into();
        assert!(HttpServer::new(config).router(80).is_err());
    }
}
