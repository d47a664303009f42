//! End-to-end tests for the ToolRelay pipeline.
//!
//! Capability store → registry → orchestrator → HTTP executor, with a
//! scripted model provider and capabilities served by a wiremock server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use http_body_util::BodyExt;
use serde_json::json;
use tokio::sync::mpsc;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use toolrelay_agent::{Orchestrator, OrchestratorSettings, StreamEvent};
use toolrelay_config::GatewayConfig;
use toolrelay_core::capability::{CallOutcome, CapabilityDefinition};
use toolrelay_core::context::RequestContext;
use toolrelay_core::error::{ErrorKind, ProviderError};
use toolrelay_core::message::{Message, MessageToolCall, Role};
use toolrelay_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use toolrelay_core::store::CapabilityStore;
use toolrelay_gateway::{GatewayState, build_router};
use toolrelay_store::{FileStore, InMemoryStore};
use toolrelay_tools::{ExecutorSettings, HttpExecutor, ToolRegistry};

// ── Scripted provider ────────────────────────────────────────────────────

/// Returns scripted responses in order; repeats the last one when exhausted
/// if `repeat_last` is set.
struct ScriptedProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    repeat_last: bool,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            repeat_last: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn always(response: ProviderResponse) -> Self {
        Self {
            responses: Mutex::new(vec![response]),
            repeat_last: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut responses = self.responses.lock().unwrap();
        if self.repeat_last && responses.len() == 1 {
            return Ok(responses[0].clone());
        }
        assert!(!responses.is_empty(), "ScriptedProvider exhausted");
        Ok(responses.remove(0))
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: usage(),
        model: "mock".into(),
    }
}

fn call_response(id: &str, name: &str, args: serde_json::Value) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_calls(
            "",
            vec![MessageToolCall {
                id: id.into(),
                name: name.into(),
                arguments: args.to_string(),
            }],
        ),
        usage: usage(),
        model: "mock".into(),
    }
}

// ── Wiring ───────────────────────────────────────────────────────────────

fn settings(max_round_trips: usize) -> OrchestratorSettings {
    OrchestratorSettings {
        model: "mock".into(),
        temperature: 0.0,
        max_tokens: None,
        max_round_trips,
        system_prompt: Some("You are a test assistant.".into()),
        unable_to_complete_message: "I was unable to complete this request.".into(),
        event_buffer: 32,
        parallel_tool_calls: true,
    }
}

fn executor() -> HttpExecutor {
    HttpExecutor::new(ExecutorSettings {
        default_timeout: Duration::from_secs(5),
        default_max_attempts: 3,
        default_backoff_ms: 1,
        ..ExecutorSettings::default()
    })
    .with_credential_lookup(|name| (name == "WEATHER_TOKEN").then(|| "tok-e2e".to_string()))
}

fn orchestrator(
    provider: Arc<ScriptedProvider>,
    store: Arc<dyn CapabilityStore>,
    max_round_trips: usize,
) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        provider,
        Arc::new(ToolRegistry::uncached(store)),
        Arc::new(executor()),
        settings(max_round_trips),
    ))
}

/// A TOML capability file pointing `lookup-weather` at the mock server.
fn weather_file(dir: &tempfile::TempDir, server: &MockServer) -> FileStore {
    let path = dir.path().join("capabilities.toml");
    let toml = format!(
        r#"
[[capabilities]]
name = "lookup-weather"
description = "Current weather for a city"
parameter_schema = {{ type = "object", properties = {{ city = {{ type = "string" }} }}, required = ["city"] }}
auth = {{ type = "bearer", token = "${{WEATHER_TOKEN}}" }}
timeout_ms = 2000
retry_policy = {{ max_attempts = 3, backoff_ms = 1 }}

[capabilities.endpoint]
method = "GET"
url_template = "{uri}/weather/{{city}}"
"#,
        uri = server.uri()
    );
    std::fs::write(&path, toml).unwrap();
    FileStore::new(path)
}

async fn run(orch: &Arc<Orchestrator>, request_id: &str, text: &str) -> Vec<StreamEvent> {
    let mut rx: mpsc::Receiver<StreamEvent> =
        orch.run_stream(RequestContext::new(request_id), vec![Message::user(text)]);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn types(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::event_type).collect()
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_simple_chat() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_response("Hello! How can I help?")]));
    let orch = orchestrator(provider.clone(), Arc::new(InMemoryStore::new()), 8);

    let events = run(&orch, "e2e-1", "hello").await;

    assert_eq!(types(&events), vec!["text_delta", "done"]);
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Done { message, round_trips: 1, tool_calls_made: 0, .. }) if message == "Hello! How can I help?"
    ));
    assert!(provider.requests()[0].tools.is_empty());
}

#[tokio::test]
async fn e2e_weather_lookup_payload_reaches_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weather/Paris"))
        .and(header("authorization", "Bearer tok-e2e"))
        .and(header("x-request-id", "e2e-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tempC": 18})))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![
        call_response("call_1", "lookup-weather", json!({"city": "Paris"})),
        text_response("It's 18°C in Paris."),
    ]));
    let orch = orchestrator(provider.clone(), Arc::new(weather_file(&dir, &server)), 8);

    let events = run(&orch, "e2e-2", "What's the weather in Paris?").await;

    assert_eq!(
        types(&events),
        vec!["tool_call_started", "tool_call_result", "text_delta", "done"]
    );
    assert!(matches!(
        &events[1],
        StreamEvent::ToolCallResult { outcome: CallOutcome::Success { payload }, .. } if payload == &json!({"tempC": 18})
    ));

    let requests = provider.requests();
    assert_eq!(requests[0].tools[0].name, "lookup-weather");
    let tool_msg = requests[1].messages.last().unwrap();
    assert_eq!(tool_msg.role, Role::Tool);
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(tool_msg.text(), r#"{"tempC":18}"#);
}

#[tokio::test]
async fn e2e_unauthorized_capability_still_completes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weather/Paris"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![
        call_response("call_1", "lookup-weather", json!({"city": "Paris"})),
        text_response("Sorry, I couldn't reach the weather service."),
    ]));
    let orch = orchestrator(provider.clone(), Arc::new(weather_file(&dir, &server)), 8);

    let events = run(&orch, "e2e-3", "weather?").await;

    assert!(matches!(
        &events[1],
        StreamEvent::ToolCallResult { outcome: CallOutcome::Error { kind: ErrorKind::ExecutionFailed, .. }, .. }
    ));
    assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));

    let tool_msg = provider.requests()[1].messages.last().cloned().unwrap();
    let content: serde_json::Value = serde_json::from_str(tool_msg.text()).unwrap();
    assert_eq!(content["error"]["kind"], "ExecutionFailed");
    assert!(content["error"]["message"].as_str().unwrap().contains("401"));
}

#[tokio::test]
async fn e2e_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weather/Oslo"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/weather/Oslo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tempC": -2})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![
        call_response("call_1", "lookup-weather", json!({"city": "Oslo"})),
        text_response("Cold."),
    ]));
    let orch = orchestrator(provider.clone(), Arc::new(weather_file(&dir, &server)), 8);

    let events = run(&orch, "e2e-4", "weather in Oslo?").await;
    assert!(matches!(
        &events[1],
        StreamEvent::ToolCallResult { outcome: CallOutcome::Success { .. }, .. }
    ));
    assert_eq!(provider.requests()[1].messages.last().unwrap().text(), r#"{"tempC":-2}"#);
}

#[tokio::test]
async fn e2e_slow_capability_times_out_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"tempC": 1}))
                .set_delay(Duration::from_millis(800)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let def: CapabilityDefinition = serde_json::from_value(json!({
        "name": "lookup-weather",
        "description": "Slow weather",
        "endpoint": {"url_template": format!("{}/weather/{{city}}", server.uri())},
        "timeout_ms": 100,
        "retry_policy": {"max_attempts": 3, "backoff_ms": 1}
    }))
    .unwrap();

    let provider = Arc::new(ScriptedProvider::new(vec![
        call_response("call_1", "lookup-weather", json!({"city": "Rome"})),
        text_response("The weather service is slow."),
    ]));
    let orch = orchestrator(provider.clone(), Arc::new(InMemoryStore::with_definitions(vec![def])), 8);

    let events = run(&orch, "e2e-5", "weather in Rome?").await;
    assert!(matches!(
        &events[1],
        StreamEvent::ToolCallResult { outcome: CallOutcome::Timeout { timeout_ms: 100 }, .. }
    ));
    let tool_msg = provider.requests()[1].messages.last().cloned().unwrap();
    assert!(tool_msg.text().contains("Timeout"));
}

#[tokio::test]
async fn e2e_round_trip_cap_forces_done() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tempC": 18})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::always(call_response(
        "call_loop",
        "lookup-weather",
        json!({"city": "Paris"}),
    )));
    let orch = orchestrator(provider.clone(), Arc::new(weather_file(&dir, &server)), 3);

    let events = run(&orch, "e2e-6", "loop forever").await;

    assert_eq!(provider.requests().len(), 3);
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Done { message, round_trips: 3, tool_calls_made: 3, .. })
            if message == "I was unable to complete this request."
    ));
}

#[tokio::test]
async fn e2e_registry_down_is_error_event_and_http_500() {
    let store = Arc::new(InMemoryStore::new());
    store.set_online(false);
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let orch = orchestrator(provider.clone(), store.clone(), 8);

    let events = run(&orch, "e2e-7", "hello").await;
    assert!(matches!(
        events.as_slice(),
        [StreamEvent::Error { kind: ErrorKind::RegistryUnavailable, request_id, .. }] if request_id == "e2e-7"
    ));
    assert!(provider.requests().is_empty());

    let app = build_router(Arc::new(GatewayState {
        orchestrator: orch,
        registry: Arc::new(ToolRegistry::uncached(store)),
        config: GatewayConfig::default(),
    }));
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/agent")
        .header("content-type", "application/json")
        .header("x-request-id", "e2e-7b")
        .body(Body::from(r#"{"messages":[{"role":"user","content":"hello"}]}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), 500);
    assert_eq!(response.headers()["x-request-id"], "e2e-7b");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["code"], 500);
}

#[tokio::test]
async fn e2e_gateway_streams_tool_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/weather/Paris"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tempC": 18})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn CapabilityStore> = Arc::new(weather_file(&dir, &server));
    let provider = Arc::new(ScriptedProvider::new(vec![
        call_response("call_1", "lookup-weather", json!({"city": "Paris"})),
        text_response("18°C."),
    ]));
    let orch = orchestrator(provider, store.clone(), 8);
    let app = build_router(Arc::new(GatewayState {
        orchestrator: orch,
        registry: Arc::new(ToolRegistry::uncached(store)),
        config: GatewayConfig::default(),
    }));

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/agent/chat")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"message":"weather in Paris?"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), 200);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    let order: Vec<usize> = [
        "event: tool_call_started",
        "event: tool_call_result",
        "event: text_delta",
        "event: done",
    ]
    .iter()
    .map(|needle| body.find(needle).unwrap_or_else(|| panic!("missing {needle} in {body}")))
    .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]));
    assert!(body.contains(r#""tempC":18"#));
}
