//! Metrics collection and exposition.
//!
//! # Metrics
//! - `cgi_requests_total` (counter): requests by method, status, kind
//! - `cgi_request_duration_seconds` (histogram): time to response headers
//! - `cgi_process_exits_total` (counter): finished exchanges by exit code
//! - `cgi_bytes_total` (counter): bytes pumped, by direction
//! - `cgi_gateway_errors_total` (counter): aborted exchanges by error kind
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Labels stay low-cardinality (no paths, no request IDs)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::cgi::bridge::StreamingSession;
use crate::cgi::error::GatewayError;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one routed request. `kind` is `cgi`, `static` or `rejected`.
pub fn record_request(method: &str, status: u16, kind: &'static str, start: Instant) {
    metrics::counter!(
        "cgi_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "kind" => kind
    )
    .increment(1);
    metrics::histogram!("cgi_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

/// Record the end of a streaming exchange.
pub fn record_session(session: &StreamingSession, outcome: &Result<(), GatewayError>) {
    metrics::counter!("cgi_bytes_total", "direction" => "in").increment(session.bytes_in);
    metrics::counter!("cgi_bytes_total", "direction" => "out").increment(session.bytes_out);

    match outcome {
        Ok(()) => {
            let code = session
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            metrics::counter!("cgi_process_exits_total", "code" => code).increment(1);
        }
        Err(e) => record_error(e),
    }
}

/// Count a gateway error by kind.
pub fn record_error(error: &GatewayError) {
    metrics::counter!("cgi_gateway_errors_total", "kind" => error.kind()).increment(1);
}
