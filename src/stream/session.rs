// Copyright 2026 The Skein Project
// SPDX-License-Identifier: Apache-2.0

// Stream session.
//
// Owns one in-flight generation request: issues it over the injected
// transport, drives the frame decoder and event mapper, delivers typed
// events in order over a bounded channel, and exposes cancellation
// through a `StreamHandle`.
//
// States: idle -> issuing -> open -> (closing | closed). `issuing`
// covers the window between initiating the request and the first byte;
// `closing` is entered on explicit cancellation and races the in-flight
// read; `closed` is terminal.
//
// Delivery guarantees:
// - events arrive in decode order, from a single reader loop
// - exactly one `end` event per issued request, synthesized when the
//   stream is exhausted (or fails) without an explicit `end` frame
// - a malformed frame yields a recoverable `error` (code "parse") and
//   the stream continues; an explicit `error` frame or a transport
//   failure terminates the session

use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio_stream::{Stream, StreamExt};

use super::decoder::FrameDecoder;
use super::event::{self, EndEvent, ErrorEvent, WireEvent};
use crate::config::ClientConfig;
use crate::request::RequestContext;

/// Event channel depth. Deep enough that a bursty backend does not
/// stall the reader while a consumer catches up.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Transport abstraction (dependency injection point)
// ---------------------------------------------------------------------------

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Response to an opened generation stream: the HTTP status and, when
/// the backend produced one, the body as an incremental byte stream.
pub struct TransportResponse {
    pub status: u16,
    pub body: Option<ByteStream>,
}

/// Errors surfaced by a transport implementation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("read failed: {0}")]
    Read(String),
}

/// Abstraction over the HTTP client that opens generation streams.
///
/// Implementations must be `Send + Sync` so one client can be shared
/// across sessions via `Arc`. Tests inject in-memory doubles.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open the generation stream for one request.
    async fn open_stream(&self, request: &RequestContext)
        -> Result<TransportResponse, TransportError>;

    /// Notify the backend that a request was cancelled client-side.
    /// Callers treat this as best-effort.
    async fn abort(&self, request_id: &str) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

/// Production transport backed by `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn open_stream(
        &self,
        request: &RequestContext,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(format!("{}/generate", self.base_url))
            .json(&request.wire_body())
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status().as_u16();
        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| TransportError::Read(e.to_string()))),
        );
        Ok(TransportResponse {
            status,
            body: Some(body),
        })
    }

    async fn abort(&self, request_id: &str) -> Result<(), TransportError> {
        self.client
            .post(format!("{}/generate/abort", self.base_url))
            .json(&serde_json::json!({ "request_id": request_id }))
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Lifecycle of one stream session. No transition leaves `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Issuing = 1,
    Open = 2,
    Closing = 3,
    Closed = 4,
}

/// Shared, atomically-updated state cell.
#[derive(Debug, Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> SessionState {
        match self.0.load(Ordering::SeqCst) {
            0 => SessionState::Idle,
            1 => SessionState::Issuing,
            2 => SessionState::Open,
            3 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    /// Set the state. `Closed` is terminal: once there, no further
    /// transition is applied.
    fn set(&self, next: SessionState) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                if cur == SessionState::Closed as u8 {
                    None
                } else {
                    Some(next as u8)
                }
            });
    }

    /// Atomically claim the idle session for a new request.
    fn try_begin(&self) -> bool {
        self.0
            .compare_exchange(
                SessionState::Idle as u8,
                SessionState::Issuing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("a request is already in flight on this session")]
    InFlight,
}

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// Cancellable handle to one in-flight request. Exactly one per
/// session.
pub struct StreamHandle {
    cancel: watch::Sender<bool>,
    request_id: Arc<OnceLock<String>>,
    state: Arc<StateCell>,
}

impl StreamHandle {
    /// Abort the in-flight read as soon as it next yields control.
    ///
    /// Frames already decoded before cancellation may still be
    /// delivered; no new network reads happen afterwards. Cancelling
    /// after the stream ended is a no-op.
    pub fn cancel(&self) {
        if self.state.get() == SessionState::Closed {
            return;
        }
        self.state.set(SessionState::Closing);
        let _ = self.cancel.send(true);
    }

    /// The backend-assigned request id, unset until the first frame
    /// carrying an identifier arrives, then frozen.
    pub fn request_id(&self) -> Option<String> {
        self.request_id.get().cloned()
    }

    /// Current session state, for observability.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }
}

// ---------------------------------------------------------------------------
// StreamSession
// ---------------------------------------------------------------------------

/// Owns one request lifecycle against an injected transport.
pub struct StreamSession {
    transport: Arc<dyn Transport>,
    state: Arc<StateCell>,
}

impl StreamSession {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: Arc::new(StateCell::default()),
        }
    }

    /// Issue the request, returning immediately with a cancellable
    /// handle and the ordered event channel. All delivery happens on a
    /// concurrently-progressing reader task.
    ///
    /// A second issue on the same session is rejected: one session,
    /// one request.
    pub fn issue(
        &self,
        request: RequestContext,
    ) -> Result<(StreamHandle, mpsc::Receiver<WireEvent>), IssueError> {
        if !self.state.try_begin() {
            return Err(IssueError::InFlight);
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let request_id = Arc::new(OnceLock::new());

        let handle = StreamHandle {
            cancel: cancel_tx,
            request_id: request_id.clone(),
            state: self.state.clone(),
        };

        let driver = Driver {
            transport: self.transport.clone(),
            state: self.state.clone(),
            request_id,
            events: event_tx,
            cancel: cancel_rx,
        };
        tokio::spawn(driver.run(request));

        Ok((handle, event_rx))
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }
}

// ---------------------------------------------------------------------------
// Reader loop
// ---------------------------------------------------------------------------

/// The single reader driving one request: everything that touches the
/// wire lives here, so event delivery is strictly sequential.
struct Driver {
    transport: Arc<dyn Transport>,
    state: Arc<StateCell>,
    request_id: Arc<OnceLock<String>>,
    events: mpsc::Sender<WireEvent>,
    cancel: watch::Receiver<bool>,
}

impl Driver {
    async fn run(self, request: RequestContext) {
        let outcome = self.drive(&request).await;
        self.state.set(SessionState::Closed);

        // Cancellation is a client-side guarantee; telling the backend
        // is an optimization, and its failure is deliberately ignored.
        if outcome == Outcome::Cancelled {
            if let Some(id) = self.request_id.get() {
                if let Err(err) = self.transport.abort(id).await {
                    tracing::debug!(%err, request_id = %id, "abort notification failed (ignored)");
                }
            }
        }
    }

    async fn drive(&self, request: &RequestContext) -> Outcome {
        let mut cancel = self.cancel.clone();

        let response = tokio::select! {
            res = self.transport.open_stream(request) => res,
            _ = cancelled(&mut cancel) => {
                self.finish(EndEvent { status: "cancelled".into() }).await;
                return Outcome::Cancelled;
            }
        };

        let body = match response {
            Ok(TransportResponse {
                status,
                body: Some(body),
            }) if (200..300).contains(&status) => body,
            Ok(resp) => {
                // Failure status (or missing body): report and stop
                // without attempting any read.
                self.emit(WireEvent::Error(ErrorEvent::new(
                    "http",
                    format!("status {}", resp.status),
                )))
                .await;
                self.finish(EndEvent {
                    status: "error".into(),
                })
                .await;
                return Outcome::Finished;
            }
            Err(err) => {
                self.emit(WireEvent::Error(ErrorEvent::new("transport", err.to_string())))
                    .await;
                self.finish(EndEvent {
                    status: "error".into(),
                })
                .await;
                return Outcome::Finished;
            }
        };

        self.state.set(SessionState::Open);
        self.read_loop(body).await
    }

    async fn read_loop(&self, mut body: ByteStream) -> Outcome {
        let mut decoder = FrameDecoder::new();
        let mut cancel = self.cancel.clone();

        loop {
            let chunk = tokio::select! {
                chunk = body.next() => chunk,
                _ = cancelled(&mut cancel) => {
                    self.finish(EndEvent { status: "cancelled".into() }).await;
                    return Outcome::Cancelled;
                }
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for frame in decoder.push(&bytes) {
                        if self.deliver_frame(&frame).await == Delivery::Terminal {
                            return Outcome::Finished;
                        }
                    }
                }
                Some(Err(err)) => {
                    // Transport failures during read are not retried.
                    self.emit(WireEvent::Error(ErrorEvent::new("transport", err.to_string())))
                        .await;
                    self.finish(EndEvent {
                        status: "error".into(),
                    })
                    .await;
                    return Outcome::Finished;
                }
                None => {
                    let dropped = decoder.finish();
                    if dropped > 0 {
                        tracing::debug!(bytes = dropped, "discarding partial frame at end of stream");
                    }
                    // Never leave the caller without a terminal signal.
                    self.finish(EndEvent {
                        status: "ok".into(),
                    })
                    .await;
                    return Outcome::Finished;
                }
            }
        }
    }

    /// Map and deliver one frame, latching and checking request ids.
    async fn deliver_frame(&self, frame: &super::decoder::Frame) -> Delivery {
        // Latch the id from the first id-carrying frame of any kind.
        let frame_id = event::frame_request_id(frame).filter(|id| !id.is_empty());
        if let Some(id) = &frame_id {
            let _ = self.request_id.set(id.clone());
            // The protocol does not bind frames to sessions; a stale
            // frame from an earlier aborted request must not be
            // applied to this one.
            if self.request_id.get().map(String::as_str) != Some(id.as_str()) {
                tracing::warn!(
                    frame_id = %id,
                    session_id = ?self.request_id.get(),
                    "dropping frame with mismatched request id"
                );
                return Delivery::Continue;
            }
        }

        let Some(event) = event::map_frame(frame) else {
            return Delivery::Continue;
        };

        let terminal = event.is_terminal();
        self.emit(event).await;
        if terminal {
            Delivery::Terminal
        } else {
            Delivery::Continue
        }
    }

    async fn emit(&self, event: WireEvent) {
        // A dropped receiver means the consumer went away; the reader
        // simply keeps draining so state still settles to Closed.
        let _ = self.events.send(event).await;
    }

    /// Deliver the terminal end signal.
    async fn finish(&self, end: EndEvent) {
        self.emit(WireEvent::End(end)).await;
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Finished,
    Cancelled,
}

#[derive(Debug, PartialEq, Eq)]
enum Delivery {
    Continue,
    Terminal,
}

/// Resolve when cancellation has been requested.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    // An error means the handle was dropped without cancelling; park
    // forever so the read side wins the select.
    if rx.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
