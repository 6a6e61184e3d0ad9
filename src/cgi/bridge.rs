//! Streaming bridge between an HTTP exchange and a CGI process.
//!
//! # Responsibilities
//! - Forward the request body into the child's stdin, in order, then close it
//! - Forward the child's stdout into the response as it arrives
//! - Finalize the response once, after stdout is drained and the child exited
//! - Abort on deadline or client disconnect, killing the child
//!
//! # Design Decisions
//! - Both pumps run concurrently inside one task (`try_join!`)
//! - Reads resolve on data or EOF; there is no fixed-interval polling
//! - The response sink is bounded, so a slow client backpressures the child

use std::future::Future;
use std::pin::pin;
use std::time::Duration;

use axum::body::Body;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::cgi::error::GatewayError;
use crate::cgi::process::{ProcessHandle, StdinPipe};

/// Default size of a single pipe read or write.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Chunks buffered between the outbound pump and the client.
pub const OUTBOUND_QUEUE_DEPTH: usize = 16;

/// How long a terminal error may wait for room in the response queue.
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// Destination for response body chunks.
pub trait ResponseSink: Send {
    /// Append one chunk. Fails with `ClientDisconnected` once nobody is reading.
    fn append(&mut self, chunk: Bytes) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Resolves when the reading side has gone away.
    fn disconnected(&self) -> BoxFuture<'static, ()>;

    /// Close the response. Called exactly once, with the exchange outcome.
    fn finalize(&mut self, outcome: &Result<(), GatewayError>) -> impl Future<Output = ()> + Send;
}

/// [`ResponseSink`] feeding an axum streaming body.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Result<Bytes, std::io::Error>>>,
}

impl ChannelSink {
    /// Create a sink and the response body that drains it.
    pub fn channel(depth: usize) -> (Self, Body) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        (Self { tx: Some(tx) }, Body::from_stream(stream))
    }
}

impl ResponseSink for ChannelSink {
    fn append(&mut self, chunk: Bytes) -> impl Future<Output = Result<(), GatewayError>> + Send {
        async move {
            let Some(tx) = self.tx.as_ref() else {
                return Err(GatewayError::ClientDisconnected);
            };
            tx.send(Ok(chunk))
                .await
                .map_err(|_| GatewayError::ClientDisconnected)
        }
    }

    fn disconnected(&self) -> BoxFuture<'static, ()> {
        match self.tx.clone() {
            Some(tx) => async move { tx.closed().await }.boxed(),
            None => futures_util::future::pending().boxed(),
        }
    }

    fn finalize(&mut self, outcome: &Result<(), GatewayError>) -> impl Future<Output = ()> + Send {
        let tx = self.tx.take();
        // An error item makes hyper abort the body instead of ending it cleanly.
        let abort = outcome
            .as_ref()
            .err()
            .map(|e| std::io::Error::other(e.to_string()));
        async move {
            if let (Some(tx), Some(err)) = (tx, abort) {
                let _ = tokio::time::timeout(ABORT_GRACE, tx.send(Err(err))).await;
            }
        }
    }
}

/// [`ResponseSink`] that drops every chunk, for responses without a body (HEAD).
///
/// Never reports a disconnect, so the exchange runs until the script exits
/// or the deadline passes.
#[derive(Debug, Default)]
pub struct DiscardSink;

impl ResponseSink for DiscardSink {
    fn append(&mut self, _chunk: Bytes) -> impl Future<Output = Result<(), GatewayError>> + Send {
        futures_util::future::ready(Ok(()))
    }

    fn disconnected(&self) -> BoxFuture<'static, ()> {
        futures_util::future::pending().boxed()
    }

    fn finalize(&mut self, _outcome: &Result<(), GatewayError>) -> impl Future<Output = ()> + Send {
        futures_util::future::ready(())
    }
}

/// Request body handed to the inbound pump.
pub struct InboundBody<S> {
    pub stream: S,
    /// Declared length; forwarding stops here. `None` forwards until end of body.
    pub content_length: Option<u64>,
}

/// What happened during one exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingSession {
    pub bytes_in: u64,
    pub stdin_closed: bool,
    pub bytes_out: u64,
    pub finalized: bool,
    pub exit_code: Option<i32>,
}

/// Runs the two pumps for one process under a deadline.
#[derive(Debug, Clone)]
pub struct StreamingBridge {
    chunk_size: usize,
    deadline: Duration,
}

impl StreamingBridge {
    pub fn new(chunk_size: usize, deadline: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            deadline,
        }
    }

    /// Pump `body` into `process` and its output into `sink` until both are done.
    ///
    /// On error the process is killed before the sink is finalized.
    pub async fn run<S, E, K>(
        &self,
        mut process: ProcessHandle,
        body: Option<InboundBody<S>>,
        mut sink: K,
    ) -> (StreamingSession, Result<(), GatewayError>)
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: std::fmt::Display + Send,
        K: ResponseSink,
    {
        let mut session = StreamingSession::default();
        let stdin = process.take_stdin();
        let disconnected = sink.disconnected();

        let outcome = {
            let inbound = pump_inbound(
                body,
                stdin,
                self.chunk_size,
                &mut session.bytes_in,
                &mut session.stdin_closed,
            );
            let outbound = pump_outbound(&mut process, &mut sink, self.chunk_size, &mut session.bytes_out);
            let exchange = async { tokio::try_join!(inbound, outbound).map(|(_, code)| code) };

            tokio::select! {
                result = tokio::time::timeout(self.deadline, exchange) => match result {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::Timeout(self.deadline)),
                },
                _ = disconnected => Err(GatewayError::ClientDisconnected),
            }
        };

        let outcome = match outcome {
            Ok(code) => {
                session.exit_code = Some(code);
                Ok(())
            }
            Err(e) => {
                process.kill().await;
                session.exit_code = process.exit_status();
                Err(e)
            }
        };

        sink.finalize(&outcome).await;
        session.finalized = true;
        (session, outcome)
    }
}

async fn pump_inbound<S, E>(
    body: Option<InboundBody<S>>,
    stdin: Option<StdinPipe>,
    chunk_size: usize,
    forwarded: &mut u64,
    closed: &mut bool,
) -> Result<(), GatewayError>
where
    S: Stream<Item = Result<Bytes, E>> + Send,
    E: std::fmt::Display + Send,
{
    let Some(mut stdin) = stdin else {
        return Ok(());
    };

    if let Some(body) = body {
        let limit = body.content_length;
        let mut stream = pin!(body.stream);

        'body: while limit.map_or(true, |n| *forwarded < n) {
            let chunk = match stream.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    let reason = e.to_string();
                    stdin.close().await;
                    *closed = true;
                    return Err(GatewayError::Body(reason));
                }
                None => break,
            };

            let remaining = limit.map_or(u64::MAX, |n| n - *forwarded);
            let take = (chunk.len() as u64).min(remaining) as usize;
            for piece in chunk.slice(..take).chunks(chunk_size) {
                if let Err(e) = stdin.write(piece).await {
                    tracing::debug!(error = %e, forwarded = *forwarded, "CGI process stopped reading stdin");
                    break 'body;
                }
                *forwarded += piece.len() as u64;
            }
        }

        if let Some(n) = limit {
            if *forwarded < n {
                tracing::debug!(forwarded = *forwarded, declared = n, "Request body shorter than declared");
            }
        }
    }

    stdin.close().await;
    *closed = true;
    Ok(())
}

async fn pump_outbound<K: ResponseSink>(
    process: &mut ProcessHandle,
    sink: &mut K,
    chunk_size: usize,
    sent: &mut u64,
) -> Result<i32, GatewayError> {
    loop {
        let chunk = process.read(chunk_size).await?;
        if chunk.is_empty() {
            break;
        }
        let len = chunk.len() as u64;
        sink.append(chunk).await?;
        *sent += len;
    }
    Ok(process.wait().await?)
}
