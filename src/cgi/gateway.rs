//! Gateway entry point: request in, committed streaming response out.

use std::sync::Arc;

use axum::body::{Body, BodyDataStream};
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use tracing::Instrument;

use crate::cgi::bridge::{
    ChannelSink, DiscardSink, InboundBody, ResponseSink, StreamingBridge, OUTBOUND_QUEUE_DEPTH,
};
use crate::cgi::env::EnvTranslator;
use crate::cgi::error::GatewayError;
use crate::cgi::process::{ProcessHandle, SpawnOptions};
use crate::http::request::{request_id, HttpRequestView};
use crate::observability::metrics;
use crate::routing::resolver::ResolvedPath;

/// Executes gateway targets.
#[derive(Debug, Clone)]
pub struct Gateway {
    translator: Arc<EnvTranslator>,
    bridge: StreamingBridge,
    spawn: SpawnOptions,
}

impl Gateway {
    pub fn new(translator: EnvTranslator, bridge: StreamingBridge, spawn: SpawnOptions) -> Self {
        Self {
            translator: Arc::new(translator),
            bridge,
            spawn,
        }
    }

    /// Spawn `target` for `request` and start streaming.
    ///
    /// Errors here happen before anything is sent. Once `Ok` is returned the
    /// status is committed as 200; later failures can only cut the body short.
    pub fn start(&self, request: Request<Body>, target: &ResolvedPath) -> Result<Response, GatewayError> {
        let request_id = request_id(request.headers());
        let (parts, body) = request.into_parts();
        let view = HttpRequestView::from_parts(&parts);

        let env = self.translator.translate(&view, &target.script_name);
        let inbound = (view.has_body() && view.content_length != Some(0)).then(|| InboundBody {
            stream: body.into_data_stream(),
            content_length: view.content_length,
        });

        let process = ProcessHandle::spawn(&target.path, env, &self.spawn)?;
        let pid = process.id();

        let span = tracing::info_span!(
            "cgi",
            request_id = %request_id,
            script = %target.script_name,
            pid = ?pid,
        );
        // HEAD has no body to stream, but the script still runs to completion.
        let response_body = if parts.method == Method::HEAD {
            self.drive(process, inbound, DiscardSink, span);
            Body::empty()
        } else {
            let (sink, body) = ChannelSink::channel(OUTBOUND_QUEUE_DEPTH);
            self.drive(process, inbound, sink, span);
            body
        };

        let mut response = Response::new(response_body);
        *response.status_mut() = StatusCode::OK;
        Ok(response)
    }

    /// Run the bridge for `process` on its own task, then log and record the session.
    fn drive<K>(
        &self,
        process: ProcessHandle,
        inbound: Option<InboundBody<BodyDataStream>>,
        sink: K,
        span: tracing::Span,
    ) where
        K: ResponseSink + 'static,
    {
        let bridge = self.bridge.clone();
        tokio::spawn(
            async move {
                let (session, outcome) = bridge.run(process, inbound, sink).await;
                match &outcome {
                    Ok(()) => tracing::info!(
                        bytes_in = session.bytes_in,
                        bytes_out = session.bytes_out,
                        exit_code = ?session.exit_code,
                        "CGI exchange complete"
                    ),
                    Err(GatewayError::ClientDisconnected) => tracing::info!(
                        bytes_out = session.bytes_out,
                        "Client disconnected, CGI process killed"
                    ),
                    Err(e) => tracing::warn!(
                        error = %e,
                        bytes_in = session.bytes_in,
                        bytes_out = session.bytes_out,
                        "CGI exchange aborted"
                    ),
                }
                metrics::record_session(&session, &outcome);
            }
            .instrument(span),
        );
    }
}
