use std::convert::Infallible;
use std::time::Duration;

use axum::http::header;
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::errors::StreamError;

use super::event::{EventEncoder, StreamEvent};
use super::mux::OutputLine;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub type EventStream = ReceiverStream<Result<Event, Infallible>>;

/// The HTTP side of a bridged stream: `text/event-stream` with keep-alives.
pub struct SseResponse(Sse<KeepAliveStream<EventStream>>);

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        ([(header::CONNECTION, "keep-alive")], self.0).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    Idle,
    Streaming,
    Closed,
}

/// Writes encoded events into an open SSE response.
///
/// `Idle -> Streaming` on `start`, `Streaming -> Closed` on `finish` or on a
/// failed write. A failed write means the client went away: the shared
/// cancellation token is triggered so readers and the process get torn down.
pub struct SseResponder {
    tx: mpsc::Sender<Result<Event, Infallible>>,
    state: ResponderState,
    cancel: CancellationToken,
}

impl SseResponder {
    pub fn open(capacity: usize, cancel: CancellationToken) -> (Self, SseResponse) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sse = Sse::new(ReceiverStream::new(rx))
            .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL));
        let responder = Self {
            tx,
            state: ResponderState::Idle,
            cancel,
        };
        (responder, SseResponse(sse))
    }

    pub fn state(&self) -> ResponderState {
        self.state
    }

    pub async fn start(&mut self, message: impl Into<String>) -> Result<(), StreamError> {
        if self.state != ResponderState::Idle {
            return Err(StreamError::StreamClosed);
        }
        self.state = ResponderState::Streaming;
        self.write(StreamEvent::start(message)).await
    }

    pub async fn chunk(&mut self, line: &OutputLine) -> Result<(), StreamError> {
        self.ensure_streaming()?;
        self.write(StreamEvent::chunk(line)).await
    }

    /// Write the terminal event and close the stream.
    pub async fn finish(&mut self, event: StreamEvent) -> Result<(), StreamError> {
        self.ensure_streaming()?;
        debug_assert!(event.is_terminal());
        let result = self.write(event).await;
        self.state = ResponderState::Closed;
        result
    }

    /// Close without a terminal event (client already gone).
    pub fn abort(&mut self) {
        self.state = ResponderState::Closed;
    }

    /// Resolves once the client side of the stream has been dropped.
    pub async fn disconnected(&self) {
        self.tx.closed().await
    }

    fn ensure_streaming(&self) -> Result<(), StreamError> {
        match self.state {
            ResponderState::Streaming => Ok(()),
            ResponderState::Idle | ResponderState::Closed => Err(StreamError::StreamClosed),
        }
    }

    async fn write(&mut self, event: StreamEvent) -> Result<(), StreamError> {
        let data = match EventEncoder::to_json(&event) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(kind = event.kind(), error = %e, "failed to encode stream event");
                if !event.is_terminal() {
                    return Err(StreamError::Encode {
                        kind: event.kind(),
                        message: e.to_string(),
                    });
                }
                // The stream still has to end with one terminal event.
                EventEncoder::fallback_error(&format!("Failed to encode {} event: {}", event.kind(), e))
            }
        };
        if self.tx.send(Ok(Event::default().data(data))).await.is_err() {
            tracing::info!(kind = event.kind(), "client disconnected from event stream");
            self.state = ResponderState::Closed;
            self.cancel.cancel();
            return Err(StreamError::ClientDisconnect);
        }
        Ok(())
    }
}
