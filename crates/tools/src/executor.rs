//! HTTP capability executor.
//!
//! One call becomes: validate arguments, render the request, then up to
//! `max_attempts` outbound attempts. Each attempt runs under the capability
//! timeout. A timeout ends the call immediately; network errors and
//! 5xx/408/429 responses are retried with backoff; any other non-2xx status
//! fails the call without retrying.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use toolrelay_core::capability::{
    Backoff, CallOutcome, CapabilityCallRequest, CapabilityCallResult,
    CapabilityDefinition, CapabilityExecutor, HttpMethod, ResponseFormat,
};
use toolrelay_core::context::RequestContext;
use toolrelay_core::error::{ErrorKind, ToolError};
use tracing::{Instrument, debug, info, warn};

use crate::auth;
use crate::schema::{self, SchemaCache};
use crate::template::{self, Encoding};

/// Header carrying the request correlation id on outbound calls.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Longest slice of an error response body quoted back to the model.
const ERROR_BODY_PREVIEW: usize = 512;

type CredentialLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Defaults for capabilities that do not declare their own timeout or retry policy.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub default_timeout: Duration,
    pub default_max_attempts: u32,
    pub default_backoff_ms: u64,
    pub backoff: Backoff,
    pub max_response_bytes: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(10_000),
            default_max_attempts: 3,
            default_backoff_ms: 200,
            backoff: Backoff::Exponential,
            max_response_bytes: 2 * 1024 * 1024,
        }
    }
}

/// The production [`CapabilityExecutor`], backed by `reqwest`.
pub struct HttpExecutor {
    client: reqwest::Client,
    settings: ExecutorSettings,
    credentials: CredentialLookup,
    schemas: SchemaCache,
}

/// A rendered request, reusable across attempts.
#[derive(Debug)]
struct Prepared {
    method: Method,
    url: Url,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Option<String>,
}

/// Why one attempt failed.
enum AttemptError {
    Retryable(String),
    Fatal(ToolError),
}

impl HttpExecutor {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    pub fn with_client(client: reqwest::Client, settings: ExecutorSettings) -> Self {
        Self {
            client,
            settings,
            credentials: Arc::new(|name| std::env::var(name).ok()),
            schemas: SchemaCache::default(),
        }
    }

    /// Replace the `${NAME}` credential resolver (the process environment by default).
    pub fn with_credential_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.credentials = Arc::new(lookup);
        self
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    async fn run(&self, def: &CapabilityDefinition, call: &CapabilityCallRequest, ctx: &RequestContext) -> CallOutcome {
        let validated = self
            .schemas
            .get_or_compile(&def.name, &def.parameter_schema)
            .and_then(|compiled| schema::validate_arguments(&compiled, &call.arguments));
        if let Err(e) = validated {
            debug!(error = %e, "Arguments rejected before dispatch");
            return CallOutcome::error(e.kind(), e.to_string());
        }

        let prepared = match prepare(def, &call.arguments) {
            Ok(p) => p,
            Err(e) => return CallOutcome::error(e.kind(), e.to_string()),
        };

        let timeout = def
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.settings.default_timeout);
        let (max_attempts, backoff_ms) = match def.retry_policy {
            Some(policy) => (policy.max_attempts.max(1), policy.backoff_ms),
            None => (self.settings.default_max_attempts.max(1), self.settings.default_backoff_ms),
        };

        let mut last_failure = String::new();
        for attempt in 1..=max_attempts {
            let builder = match self.build(def, &prepared, ctx) {
                Ok(b) => b,
                Err(e) => return CallOutcome::error(e.kind(), e.to_string()),
            };

            match tokio::time::timeout(timeout, self.attempt(builder, def)).await {
                Err(_) => {
                    warn!(attempt, timeout_ms = timeout.as_millis() as u64, "Capability call timed out");
                    return CallOutcome::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    };
                }
                Ok(Ok(payload)) => {
                    debug!(attempt, "Capability call succeeded");
                    return CallOutcome::Success { payload };
                }
                Ok(Err(AttemptError::Fatal(e))) => {
                    warn!(attempt, error = %e, "Capability call failed");
                    return CallOutcome::error(e.kind(), e.to_string());
                }
                Ok(Err(AttemptError::Retryable(reason))) => {
                    warn!(attempt, max_attempts, reason = %reason, "Capability attempt failed");
                    last_failure = reason;
                    if attempt < max_attempts {
                        tokio::time::sleep(self.settings.backoff.delay(backoff_ms, attempt)).await;
                    }
                }
            }
        }

        let e = ToolError::ExecutionFailed {
            capability: def.name.clone(),
            reason: format!("gave up after {max_attempts} attempt(s): {last_failure}"),
        };
        CallOutcome::error(e.kind(), e.to_string())
    }

    fn build(&self, def: &CapabilityDefinition, prepared: &Prepared, ctx: &RequestContext) -> Result<RequestBuilder, ToolError> {
        let mut builder = self
            .client
            .request(prepared.method.clone(), prepared.url.clone())
            .header(REQUEST_ID_HEADER, &ctx.request_id);

        for (name, value) in &prepared.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !prepared.query.is_empty() {
            builder = builder.query(&prepared.query);
        }
        if let Some(body) = &prepared.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        auth::apply(builder, &def.auth, self.credentials.as_ref()).map_err(|e| ToolError::ExecutionFailed {
            capability: def.name.clone(),
            reason: e.to_string(),
        })
    }

    async fn attempt(&self, builder: RequestBuilder, def: &CapabilityDefinition) -> Result<Value, AttemptError> {
        let mut response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                AttemptError::Fatal(ToolError::ExecutionFailed {
                    capability: def.name.clone(),
                    reason: format!("invalid request: {e}"),
                })
            } else {
                AttemptError::Retryable(format!("network error: {e}"))
            }
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);

        let mut body = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    if body.len() + chunk.len() > self.settings.max_response_bytes {
                        return Err(AttemptError::Fatal(ToolError::MalformedResponse(format!(
                            "response body exceeds {} bytes",
                            self.settings.max_response_bytes
                        ))));
                    }
                    body.extend_from_slice(&chunk);
                }
                Ok(None) => break,
                Err(e) => return Err(AttemptError::Retryable(format!("error reading response: {e}"))),
            }
        }

        debug!(status = status.as_u16(), bytes = body.len(), "Capability responded");

        if status.is_success() {
            return parse_body(&body, content_type.as_deref(), def.endpoint.response_format)
                .map_err(AttemptError::Fatal);
        }

        let reason = format!("HTTP {}: {}", status.as_u16(), preview(&body));
        if is_retryable(status) {
            Err(AttemptError::Retryable(reason))
        } else {
            Err(AttemptError::Fatal(ToolError::ExecutionFailed {
                capability: def.name.clone(),
                reason,
            }))
        }
    }
}

#[async_trait]
impl CapabilityExecutor for HttpExecutor {
    async fn execute(
        &self,
        definition: &CapabilityDefinition,
        call: CapabilityCallRequest,
        ctx: &RequestContext,
    ) -> CapabilityCallResult {
        let started = Instant::now();
        let span = tracing::info_span!(
            parent: &ctx.span,
            "capability",
            capability = %definition.name,
            call_id = %call.id,
        );

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                CallOutcome::error(ErrorKind::ExecutionFailed, "request cancelled")
            }
            outcome = self.run(definition, &call, ctx).instrument(span.clone()) => outcome,
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        span.in_scope(|| {
            info!(
                success = outcome.is_success(),
                duration_ms,
                "Capability call finished"
            )
        });

        CapabilityCallResult {
            id: call.id,
            outcome,
            duration_ms,
        }
    }
}

/// Render URL, headers, body and query for a validated call.
fn prepare(def: &CapabilityDefinition, arguments: &Value) -> Result<Prepared, ToolError> {
    let empty = Map::new();
    let args = arguments.as_object().unwrap_or(&empty);
    let endpoint = &def.endpoint;

    let url = template::render(&endpoint.url_template, args, Encoding::Url)?;
    let mut used = url.used;

    let mut headers = Vec::with_capacity(endpoint.headers.len());
    for (name, value) in &endpoint.headers {
        let rendered = template::render(value, args, Encoding::Raw)?;
        used.extend(rendered.used);
        headers.push((name.clone(), rendered.text));
    }

    let parsed_url = Url::parse(&url.text).map_err(|e| ToolError::ExecutionFailed {
        capability: def.name.clone(),
        reason: format!("invalid URL '{}': {e}", url.text),
    })?;

    let leftover: Map<String, Value> = args
        .iter()
        .filter(|(k, v)| !used.contains(k.as_str()) && !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut query = Vec::new();
    let body = match &endpoint.body_template {
        Some(body_template) => Some(template::render(body_template, args, Encoding::Json)?.text),
        None if endpoint.method.carries_body() => {
            Some(Value::Object(leftover).to_string())
        }
        None => {
            query = leftover
                .iter()
                .map(|(k, v)| (k.clone(), template::query_value(v)))
                .collect();
            None
        }
    };

    Ok(Prepared {
        method: to_method(endpoint.method),
        url: parsed_url,
        headers,
        query,
        body,
    })
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

/// Turn a 2xx body into the success payload.
fn parse_body(body: &[u8], content_type: Option<&str>, format: ResponseFormat) -> Result<Value, ToolError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    let as_text = || {
        String::from_utf8(body.to_vec())
            .map(Value::String)
            .map_err(|_| ToolError::MalformedResponse("response body is not valid UTF-8".into()))
    };

    let is_text = content_type.is_some_and(|ct| ct.starts_with("text/"));
    match format {
        ResponseFormat::Text => as_text(),
        ResponseFormat::Json if is_text => as_text(),
        ResponseFormat::Json => serde_json::from_slice(body)
            .map_err(|e| ToolError::MalformedResponse(format!("response is not valid JSON: {e}"))),
    }
}

fn preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.chars().count() <= ERROR_BODY_PREVIEW {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(ERROR_BODY_PREVIEW).collect();
        format!("{cut}…")
    }
}

impl std::fmt::Debug for HttpExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpExecutor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
