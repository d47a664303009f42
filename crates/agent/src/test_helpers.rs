//! Scripted provider and executor for orchestrator tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use toolrelay_core::capability::{
    CallOutcome, CapabilityCallRequest, CapabilityCallResult, CapabilityDefinition, CapabilityExecutor,
};
use toolrelay_core::context::RequestContext;
use toolrelay_core::error::{ErrorKind, ProviderError};
use toolrelay_core::message::{Message, MessageToolCall};
use toolrelay_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};

use crate::stream_event::StreamEvent;

/// One scripted model turn.
pub enum Turn {
    Complete(ProviderResponse),
    Chunks(Vec<StreamChunk>),
}

/// A provider that replays scripted turns and records every request.
pub struct ScriptedProvider {
    turns: Mutex<Vec<Result<Turn, ProviderError>>>,
    repeat: Option<ProviderResponse>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Result<Turn, ProviderError>>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().rev().collect()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with the same response.
    pub fn always(response: ProviderResponse) -> Self {
        Self {
            turns: Mutex::new(Vec::new()),
            repeat: Some(response),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_turn(&self, request: ProviderRequest) -> Result<Turn, ProviderError> {
        self.requests.lock().unwrap().push(request);
        if let Some(response) = &self.repeat {
            return Ok(Turn::Complete(response.clone()));
        }
        self.turns
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| panic!("ScriptedProvider: no more turns"))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next_turn(request)? {
            Turn::Complete(response) => Ok(response),
            Turn::Chunks(_) => panic!("ScriptedProvider: chunked turn requested via complete()"),
        }
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let chunks = match self.next_turn(request)? {
            Turn::Complete(response) => vec![StreamChunk {
                content: response.message.content,
                tool_calls: response.message.tool_calls,
                done: true,
                usage: response.usage,
            }],
            Turn::Chunks(chunks) => chunks,
        };
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            let _ = tx.send(Ok(chunk)).await;
        }
        Ok(rx)
    }
}

/// An executor that answers from a table, keyed by capability name.
pub struct MockExecutor {
    outcomes: HashMap<String, CallOutcome>,
    /// Keyed by call id
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<CapabilityCallRequest>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            outcomes: HashMap::new(),
            delays: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_payload(self, name: &str, payload: Value) -> Self {
        self.with_outcome(name, CallOutcome::Success { payload })
    }

    pub fn with_outcome(mut self, name: &str, outcome: CallOutcome) -> Self {
        self.outcomes.insert(name.to_string(), outcome);
        self
    }

    pub fn with_delay(mut self, call_id: &str, delay: Duration) -> Self {
        self.delays.insert(call_id.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<CapabilityCallRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilityExecutor for MockExecutor {
    async fn execute(
        &self,
        definition: &CapabilityDefinition,
        call: CapabilityCallRequest,
        ctx: &RequestContext,
    ) -> CapabilityCallResult {
        self.calls.lock().unwrap().push(call.clone());
        let started = Instant::now();

        if let Some(delay) = self.delays.get(&call.id) {
            tokio::select! {
                _ = tokio::time::sleep(*delay) => {}
                _ = ctx.cancel.cancelled() => {
                    return CapabilityCallResult {
                        id: call.id,
                        outcome: CallOutcome::error(ErrorKind::ExecutionFailed, "request cancelled"),
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                }
            }
        }

        let outcome = self
            .outcomes
            .get(&definition.name)
            .cloned()
            .unwrap_or(CallOutcome::Success {
                payload: serde_json::json!({ "ok": true }),
            });

        CapabilityCallResult {
            id: call.id,
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

pub fn capability(name: &str) -> CapabilityDefinition {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "description": format!("{name} capability"),
        "parameter_schema": { "type": "object", "properties": {} },
        "endpoint": { "url_template": format!("https://api.test/{name}") }
    }))
    .unwrap()
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.to_string(),
    }
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

pub fn text_response(text: &str) -> Turn {
    Turn::Complete(ProviderResponse {
        message: Message::assistant(text),
        usage: Some(usage()),
        model: "mock-model".into(),
    })
}

pub fn calls_response(calls: Vec<MessageToolCall>) -> Turn {
    Turn::Complete(calls_provider_response(calls))
}

pub fn calls_provider_response(calls: Vec<MessageToolCall>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_calls("", calls),
        usage: Some(usage()),
        model: "mock-model".into(),
    }
}

/// A text answer split across several chunks, without usage.
pub fn streamed_text(parts: &[&str]) -> Result<Turn, ProviderError> {
    let last = parts.len().saturating_sub(1);
    Ok(Turn::Chunks(
        parts
            .iter()
            .enumerate()
            .map(|(i, part)| StreamChunk {
                content: Some(part.to_string()),
                tool_calls: vec![],
                done: i == last,
                usage: None,
            })
            .collect(),
    ))
}

pub async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

pub fn event_types(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::event_type).collect()
}
