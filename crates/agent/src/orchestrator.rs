//! The chat orchestrator: one state machine per request.
//!
//! ```text
//! AwaitingModel → (text only)       → Finalizing → Done
//! AwaitingModel → (calls requested) → ExecutingCalls → AwaitingModel
//! AwaitingModel | ExecutingCalls → (unrecoverable) → Failed
//! ```
//!
//! Capability failures become tool-role messages and the loop carries on.
//! Model and registry failures end the request with a terminal `error`.

use futures::stream::{FuturesOrdered, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use toolrelay_config::AppConfig;
use toolrelay_core::capability::{CallOutcome, CapabilityCallRequest, CapabilityCallResult, CapabilityExecutor};
use toolrelay_core::context::RequestContext;
use toolrelay_core::error::ErrorKind;
use toolrelay_core::message::{Conversation, Message, MessageToolCall, Role};
use toolrelay_core::provider::{Provider, ProviderRequest, ToolDefinition, Usage};
use toolrelay_tools::registry::{CapabilitySnapshot, ToolRegistry};
use tracing::{Instrument, debug, error, info, warn};

use crate::stream_event::StreamEvent;

/// Tunables for one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Most model calls one request may make
    pub max_round_trips: usize,
    /// Prepended unless the caller already supplied a system message
    pub system_prompt: Option<String>,
    pub unable_to_complete_message: String,
    pub event_buffer: usize,
    pub parallel_tool_calls: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let agent = &config.agent;
        Self {
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            max_round_trips: agent.max_round_trips.max(1),
            system_prompt: Some(agent.system_prompt.clone()).filter(|s| !s.trim().is_empty()),
            unable_to_complete_message: agent.unable_to_complete_message.clone(),
            event_buffer: agent.event_buffer.max(1),
            parallel_tool_calls: agent.parallel_tool_calls,
        }
    }
}

/// Orchestrator states. `Done` is the return from [`Orchestrator::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum State {
    AwaitingModel,
    ExecutingCalls(Vec<MessageToolCall>),
    Finalizing { message: String },
    Failed { kind: ErrorKind, message: String },
}

/// The receiver went away; the request is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// How a run ended.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub conversation: Conversation,
    pub round_trips: usize,
    pub tool_calls_made: usize,
    /// `None` when the run completed, otherwise the terminal error kind
    pub failure: Option<ErrorKind>,
}

/// Drives model calls and capability execution for requests.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    executor: Arc<dyn CapabilityExecutor>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        executor: Arc<dyn CapabilityExecutor>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            provider,
            registry,
            executor,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run a request on its own task and return its event stream.
    ///
    /// Dropping the receiver cancels `ctx`, which aborts the in-flight model
    /// call and capability calls.
    pub fn run_stream(self: &Arc<Self>, ctx: RequestContext, messages: Vec<Message>) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.settings.event_buffer);
        let this = Arc::clone(self);
        let span = ctx.span.clone();

        tokio::spawn(
            async move {
                tokio::select! {
                    _ = this.run(&ctx, messages, &tx) => {}
                    _ = tx.closed() => {
                        debug!("Event receiver dropped, cancelling request");
                        ctx.cancel.cancel();
                    }
                }
            }
            .instrument(span),
        );

        rx
    }

    /// Run a request to completion, sending every event to `tx`.
    ///
    /// Returns `Err(Disconnected)` if the receiver was dropped or `ctx` was
    /// cancelled before a terminal event could be sent.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        messages: Vec<Message>,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<RunOutcome, Disconnected> {
        let emitter = Emitter { tx, ctx };
        let mut conversation = Conversation::new();
        let mut round_trips = 0usize;
        let mut tool_calls_made = 0usize;
        let mut usage: Option<Usage> = None;

        info!(messages = messages.len(), "Request started");

        let (mut state, snapshot) = match self.enter(messages).await {
            Ok((conv, snapshot)) => {
                conversation = conv;
                (State::AwaitingModel, snapshot)
            }
            Err(failed) => (failed, CapabilitySnapshot::default()),
        };
        let tools: Vec<ToolDefinition> = snapshot.to_model_schema();

        loop {
            if ctx.is_cancelled() {
                debug!("Request cancelled");
                return Err(Disconnected);
            }

            state = match state {
                State::AwaitingModel => {
                    round_trips += 1;
                    self.await_model(ctx, &emitter, &mut conversation, &tools, &mut usage)
                        .await?
                }

                State::ExecutingCalls(calls) => {
                    tool_calls_made += calls.len();
                    self.execute_calls(ctx, &emitter, &snapshot, &mut conversation, calls)
                        .await?;

                    if round_trips >= self.settings.max_round_trips {
                        warn!(round_trips, "Round-trip cap reached, finalizing");
                        let message = self.settings.unable_to_complete_message.clone();
                        conversation.push(Message::assistant(message.clone()));
                        State::Finalizing { message }
                    } else {
                        State::AwaitingModel
                    }
                }

                State::Finalizing { message } => {
                    info!(round_trips, tool_calls_made, "Request completed");
                    emitter
                        .send(StreamEvent::Done {
                            message,
                            round_trips,
                            tool_calls_made,
                            usage,
                        })
                        .await?;
                    return Ok(RunOutcome {
                        conversation,
                        round_trips,
                        tool_calls_made,
                        failure: None,
                    });
                }

                State::Failed { kind, message } => {
                    error!(kind = %kind, error = %message, "Request failed");
                    emitter
                        .send(StreamEvent::Error {
                            kind,
                            message,
                            request_id: ctx.request_id.clone(),
                        })
                        .await?;
                    return Ok(RunOutcome {
                        conversation,
                        round_trips,
                        tool_calls_made,
                        failure: Some(kind),
                    });
                }
            };
        }
    }

    /// Build the initial conversation and freeze the capability snapshot.
    async fn enter(&self, messages: Vec<Message>) -> Result<(Conversation, CapabilitySnapshot), State> {
        let mut initial = Vec::with_capacity(messages.len() + 1);
        if let Some(prompt) = &self.settings.system_prompt
            && !messages.iter().any(|m| m.role == Role::System)
        {
            initial.push(Message::system(prompt.clone()));
        }
        initial.extend(messages);

        let conversation = Conversation::from_messages(initial).map_err(|e| State::Failed {
            kind: ErrorKind::InvalidArguments,
            message: e.to_string(),
        })?;

        let snapshot = self.registry.load_capabilities().await.map_err(|e| State::Failed {
            kind: ErrorKind::RegistryUnavailable,
            message: e.to_string(),
        })?;
        debug!(capabilities = snapshot.len(), "Capability snapshot frozen");

        Ok((conversation, snapshot))
    }

    /// One model call. Text is forwarded as it streams in.
    async fn await_model(
        &self,
        ctx: &RequestContext,
        emitter: &Emitter<'_>,
        conversation: &mut Conversation,
        tools: &[ToolDefinition],
        usage: &mut Option<Usage>,
    ) -> Result<State, Disconnected> {
        let request = ProviderRequest {
            model: self.settings.model.clone(),
            messages: conversation.messages.clone(),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            tools: tools.to_vec(),
            stream: true,
        };

        let model_unavailable = |message: String| State::Failed {
            kind: ErrorKind::ModelUnavailable,
            message,
        };

        let mut chunks = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(Disconnected),
            result = self.provider.stream(request) => match result {
                Ok(rx) => rx,
                Err(e) => return Ok(model_unavailable(e.to_string())),
            },
        };

        let mut text = String::new();
        let mut calls: Vec<MessageToolCall> = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(Disconnected),
                next = chunks.recv() => next,
            };
            let Some(result) = next else { break };

            let chunk = match result {
                Ok(chunk) => chunk,
                Err(e) => return Ok(model_unavailable(e.to_string())),
            };

            if let Some(content) = chunk.content
                && !content.is_empty()
            {
                text.push_str(&content);
                emitter.send(StreamEvent::TextDelta { content }).await?;
            }

            // Providers deliver whole calls; never merge two of them.
            calls.extend(chunk.tool_calls);

            if let Some(u) = chunk.usage {
                usage.get_or_insert_with(Usage::default).add(&u);
            }

            if chunk.done {
                break;
            }
        }

        if calls.is_empty() {
            debug!(chars = text.len(), "Model answered with text");
            conversation.push(Message::assistant(text.clone()));
            return Ok(State::Finalizing { message: text });
        }

        // Tool results pair with calls by id, so a blank id gets one.
        let turn = conversation.len();
        for (i, call) in calls.iter_mut().enumerate() {
            if call.id.trim().is_empty() {
                call.id = format!("call_{turn}_{i}");
            }
        }

        debug!(calls = calls.len(), "Model requested capability calls");
        conversation.push(Message::assistant_with_calls(text, calls.clone()));
        Ok(State::ExecutingCalls(calls))
    }

    /// Run every call of one turn. Results land in the conversation in request order.
    async fn execute_calls(
        &self,
        ctx: &RequestContext,
        emitter: &Emitter<'_>,
        snapshot: &CapabilitySnapshot,
        conversation: &mut Conversation,
        calls: Vec<MessageToolCall>,
    ) -> Result<(), Disconnected> {
        if self.settings.parallel_tool_calls {
            for call in &calls {
                emitter.send(started_event(call)).await?;
            }

            let mut pending: FuturesOrdered<_> = calls
                .into_iter()
                .map(|call| self.call_one(ctx, snapshot, call))
                .collect();

            while let Some((call, result)) = pending.next().await {
                self.record(emitter, conversation, call, result).await?;
            }
        } else {
            for call in calls {
                emitter.send(started_event(&call)).await?;
                let (call, result) = self.call_one(ctx, snapshot, call).await;
                self.record(emitter, conversation, call, result).await?;
            }
        }

        Ok(())
    }

    async fn call_one(
        &self,
        ctx: &RequestContext,
        snapshot: &CapabilitySnapshot,
        call: MessageToolCall,
    ) -> (MessageToolCall, CapabilityCallResult) {
        let rejected = |kind: ErrorKind, message: String| CapabilityCallResult {
            id: call.id.clone(),
            outcome: CallOutcome::Error { kind, message },
            duration_ms: 0,
        };

        let arguments = match parse_arguments(&call.arguments) {
            Ok(v) => v,
            Err(e) => {
                let result = rejected(
                    ErrorKind::InvalidArguments,
                    format!("arguments are not valid JSON: {e}"),
                );
                return (call, result);
            }
        };

        let Some(definition) = snapshot.get(&call.name) else {
            let result = rejected(
                ErrorKind::InvalidArguments,
                format!("unknown capability '{}'", call.name),
            );
            return (call, result);
        };

        let request = CapabilityCallRequest {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        };
        let result = self.executor.execute(definition, request, ctx).await;
        (call, result)
    }

    async fn record(
        &self,
        emitter: &Emitter<'_>,
        conversation: &mut Conversation,
        call: MessageToolCall,
        result: CapabilityCallResult,
    ) -> Result<(), Disconnected> {
        conversation.push(Message::tool_result(
            call.id.clone(),
            result.outcome.to_tool_content(),
        ));
        emitter
            .send(StreamEvent::ToolCallResult {
                id: call.id,
                name: call.name,
                outcome: result.outcome,
                duration_ms: result.duration_ms,
            })
            .await
    }
}

/// Sends events, cancelling the request when the receiver is gone.
struct Emitter<'a> {
    tx: &'a mpsc::Sender<StreamEvent>,
    ctx: &'a RequestContext,
}

impl Emitter<'_> {
    async fn send(&self, event: StreamEvent) -> Result<(), Disconnected> {
        self.tx.send(event).await.map_err(|_| {
            debug!("Event receiver dropped, cancelling request");
            self.ctx.cancel.cancel();
            Disconnected
        })
    }
}

fn started_event(call: &MessageToolCall) -> StreamEvent {
    StreamEvent::ToolCallStarted {
        id: call.id.clone(),
        name: call.name.clone(),
        arguments: parse_arguments(&call.arguments)
            .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone())),
    }
}

/// Model-produced argument text. Blank means no arguments.
fn parse_arguments(raw: &str) -> Result<serde_json::Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(raw)
}
