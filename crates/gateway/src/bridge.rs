//! Streaming bridge: orchestrator events out to the caller as SSE frames.
//!
//! Each [`StreamEvent`] becomes one frame, `event: <type>` plus `data: <json>`,
//! written in the order produced. The bridge owns a drop guard on the
//! request's cancellation token, so a caller that disconnects mid-stream
//! cancels the model call and any capability calls still in flight.

use axum::response::sse::Event as SseEvent;
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;
use toolrelay_agent::StreamEvent;
use toolrelay_core::context::RequestContext;
use toolrelay_core::error::ErrorKind;
use tracing::{debug, warn};

/// Yields a request's events until the first terminal one.
///
/// If the orchestrator goes away without a terminal event, a single
/// `InternalFault` error is synthesized so the stream always ends with
/// `done` or `error`.
pub struct EventBridge {
    rx: mpsc::Receiver<StreamEvent>,
    first: Option<StreamEvent>,
    request_id: String,
    finished: bool,
    _cancel_on_drop: DropGuard,
}

impl EventBridge {
    pub fn new(ctx: &RequestContext, rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self {
            rx,
            first: None,
            request_id: ctx.request_id.clone(),
            finished: false,
            _cancel_on_drop: ctx.cancel.clone().drop_guard(),
        }
    }

    /// Put back an event already taken off the channel.
    pub fn with_first(mut self, event: StreamEvent) -> Self {
        self.first = Some(event);
        self
    }

    fn emit(&mut self, event: StreamEvent) -> Poll<Option<StreamEvent>> {
        if event.is_terminal() {
            self.finished = true;
        }
        Poll::Ready(Some(event))
    }
}

impl Stream for EventBridge {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        if let Some(event) = self.first.take() {
            return self.emit(event);
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => self.emit(event),
            Poll::Ready(None) => {
                warn!(request_id = %self.request_id, "Event stream closed without a terminal event");
                let event = StreamEvent::Error {
                    kind: ErrorKind::InternalFault,
                    message: "orchestrator stopped unexpectedly".into(),
                    request_id: self.request_id.clone(),
                };
                self.emit(event)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        if !self.finished {
            debug!(request_id = %self.request_id, "Caller disconnected mid-stream");
        }
    }
}

/// One SSE frame for `event`.
pub fn sse_frame(event: &StreamEvent) -> Result<SseEvent, Infallible> {
    let data = serde_json::to_string(event).unwrap_or_default();
    Ok(SseEvent::default().event(event.event_type()).data(data))
}
