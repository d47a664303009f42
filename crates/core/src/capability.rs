//! Capabilities: externally invocable actions the model may request.
//!
//! A [`CapabilityDefinition`] is data, not code: it describes an outbound HTTP
//! call (method, URL template, headers, auth, timeout, retry policy). The
//! definitions come from a [`crate::store::CapabilityStore`] and an executor
//! turns one model-issued call into one (retried) HTTP interaction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::context::RequestContext;
use crate::error::ErrorKind;
use crate::provider::ToolDefinition;

/// A capability as stored in the backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    /// Unique within a registry snapshot
    pub name: String,

    /// Sent to the model verbatim
    #[serde(default)]
    pub description: String,

    /// JSON Schema the call arguments must satisfy
    #[serde(default = "default_parameter_schema")]
    pub parameter_schema: serde_json::Value,

    pub endpoint: Endpoint,

    #[serde(default)]
    pub auth: AuthScheme,

    /// Per-call timeout; the executor default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Retry policy; the executor default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

fn default_parameter_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl CapabilityDefinition {
    /// Project this definition into the function-calling schema.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameter_schema.clone(),
        }
    }
}

/// Where and how a capability is called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(default)]
    pub method: HttpMethod,

    /// URL with `{argument}` placeholders
    pub url_template: String,

    /// Header name → value template with `{argument}` placeholders
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Optional body template; without one, unused arguments are sent as a
    /// JSON body (POST/PUT/PATCH) or as query parameters (GET/DELETE)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_template: Option<String>,

    /// How a 2xx response body is parsed
    #[serde(default)]
    pub response_format: ResponseFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether unused arguments travel in the body rather than the query string.
    pub fn carries_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Json,
    Text,
}

/// Authentication applied to the outbound request.
///
/// Credential values may reference environment variables as `${NAME}`.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthScheme {
    #[default]
    None,
    ApiKey { header_name: String, value: String },
    Bearer { token: String },
    Basic { user: String, pass: String },
}

impl std::fmt::Debug for AuthScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::ApiKey { header_name, .. } => f
                .debug_struct("ApiKey")
                .field("header_name", header_name)
                .field("value", &"[REDACTED]")
                .finish(),
            Self::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"[REDACTED]")
                .finish(),
            Self::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("pass", &"[REDACTED]")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `backoff_ms * attempt`
    Linear,
    /// `backoff_ms * 2^(attempt - 1)`
    #[default]
    Exponential,
}

impl Backoff {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay(self, backoff_ms: u64, attempt: u32) -> std::time::Duration {
        let attempt = attempt.max(1);
        let ms = match self {
            Self::Linear => backoff_ms.saturating_mul(u64::from(attempt)),
            Self::Exponential => {
                backoff_ms.saturating_mul(1u64 << (attempt - 1).min(20))
            }
        };
        std::time::Duration::from_millis(ms)
    }
}

/// One model-issued call, with arguments already parsed from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCallRequest {
    /// Opaque, echoed back on the result
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCallResult {
    pub id: String,
    pub outcome: CallOutcome,
    pub duration_ms: u64,
}

/// How a capability call ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    Success { payload: serde_json::Value },
    Error { kind: ErrorKind, message: String },
    Timeout { timeout_ms: u64 },
}

impl CallOutcome {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Content of the tool-role message that carries this outcome back to the
    /// model. A success is the serialized payload and nothing else.
    pub fn to_tool_content(&self) -> String {
        match self {
            Self::Success { payload } => payload.to_string(),
            Self::Error { kind, message } => serde_json::json!({
                "error": { "kind": kind, "message": message }
            })
            .to_string(),
            Self::Timeout { timeout_ms } => serde_json::json!({
                "error": {
                    "kind": "Timeout",
                    "message": format!("capability did not respond within {timeout_ms}ms"),
                }
            })
            .to_string(),
        }
    }
}

/// Executes a single capability call.
///
/// Implementations never fail the request: every failure mode is expressed
/// as a [`CallOutcome`].
#[async_trait]
pub trait CapabilityExecutor: Send + Sync {
    async fn execute(
        &self,
        definition: &CapabilityDefinition,
        call: CapabilityCallRequest,
        ctx: &RequestContext,
    ) -> CapabilityCallResult;
}
