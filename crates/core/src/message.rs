//! Message and Conversation domain types.
//!
//! These are the value objects that flow through one request:
//! caller turns → orchestrator buffer → provider → tool results → final answer.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
    /// Capability execution result
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content. `None` for an assistant turn that only requests calls.
    #[serde(default)]
    pub content: Option<String>,

    /// Capability calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, Some(content.into()))
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Some(content.into()))
    }

    /// Create an assistant turn that requests capability calls.
    ///
    /// Empty text is stored as `None`.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<MessageToolCall>) -> Self {
        let content = content.into();
        let mut msg = Self::new(
            Role::Assistant,
            if content.is_empty() { None } else { Some(content) },
        );
        msg.tool_calls = calls;
        msg
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, Some(content.into()))
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, Some(content.into()));
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Text content, empty when absent.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// A capability call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this call, echoed back on the tool-role result
    pub id: String,

    /// Name of the capability to invoke
    pub name: String,

    /// Arguments as a raw JSON string, exactly as the model produced them
    pub arguments: String,
}

/// Violations of the assistant/tool pairing rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PairingError {
    #[error("message {index}: tool message is missing tool_call_id")]
    MissingCallId { index: usize },

    #[error("message {index}: tool_call_id '{id}' does not match an open call of the preceding assistant turn")]
    UnmatchedCallId { index: usize, id: String },

    #[error("message {index}: only assistant messages may carry tool calls")]
    CallsOnNonAssistant { index: usize },
}

/// The ordered message buffer owned by one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a conversation from existing turns, checking the pairing rule.
    pub fn from_messages(messages: Vec<Message>) -> Result<Self, PairingError> {
        let conv = Self { messages };
        conv.validate()?;
        Ok(conv)
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The most recent message, if any.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Check that every tool-role message answers an unresolved call of the
    /// immediately preceding assistant turn.
    pub fn validate(&self) -> Result<(), PairingError> {
        let mut open: HashSet<&str> = HashSet::new();

        for (index, msg) in self.messages.iter().enumerate() {
            match msg.role {
                Role::Tool => {
                    let id = msg
                        .tool_call_id
                        .as_deref()
                        .ok_or(PairingError::MissingCallId { index })?;
                    if !open.remove(id) {
                        return Err(PairingError::UnmatchedCallId {
                            index,
                            id: id.to_string(),
                        });
                    }
                }
                Role::Assistant => {
                    open = msg.tool_calls.iter().map(|c| c.id.as_str()).collect();
                }
                Role::User | Role::System => {
                    if !msg.tool_calls.is_empty() {
                        return Err(PairingError::CallsOnNonAssistant { index });
                    }
                    open.clear();
                }
            }
        }

        Ok(())
    }

    /// Get the total token count estimate (rough: 4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.text().len() / 4).sum()
    }
}
