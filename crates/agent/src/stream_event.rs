//! Orchestrator streaming events.
//!
//! `StreamEvent` is the ordered sequence one request produces. The gateway
//! forwards each event to the caller as one SSE frame:
//! - `text_delta`         partial text from the model
//! - `tool_call_started`  a capability call is about to run
//! - `tool_call_result`   that call finished
//! - `done`               terminal, carries the final message
//! - `error`              terminal, request-fatal failure

use serde::{Deserialize, Serialize};
use toolrelay_core::capability::CallOutcome;
use toolrelay_core::error::ErrorKind;
use toolrelay_core::provider::Usage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial text from the model, forwarded as soon as it arrives.
    TextDelta { content: String },

    /// A capability call is starting. `arguments` is the parsed JSON when the
    /// model produced valid JSON, otherwise the raw string.
    ToolCallStarted {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// A capability call finished.
    ToolCallResult {
        id: String,
        name: String,
        outcome: CallOutcome,
        duration_ms: u64,
    },

    /// The request completed.
    Done {
        message: String,
        round_trips: usize,
        tool_calls_made: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// The request failed.
    Error {
        kind: ErrorKind,
        message: String,
        request_id: String,
    },
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCallStarted { .. } => "tool_call_started",
            Self::ToolCallResult { .. } => "tool_call_result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether nothing may follow this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
