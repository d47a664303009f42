//! HTTP gateway for ToolRelay.
//!
//! Routes:
//! - `POST /api/agent` (alias `/api/agent/chat`): run a chat request, reply as SSE
//! - `GET /api/tools`: the current capability snapshot
//! - `GET /health`: liveness
//!
//! Every response carries an `x-request-id` header; the same id tags the
//! request's log lines and any `error` event.

pub mod announce;
pub mod bridge;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Extension, Request, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use toolrelay_agent::{Orchestrator, OrchestratorSettings, StreamEvent};
use toolrelay_config::{AppConfig, ExecutorConfig, GatewayConfig, RegistryBackend, RegistryConfig};
use toolrelay_core::context::RequestContext;
use toolrelay_core::error::StoreError;
use toolrelay_core::message::{Conversation, Message};
use toolrelay_core::provider::ToolDefinition;
use toolrelay_core::store::CapabilityStore;
use toolrelay_store::{FileStore, InMemoryStore, SqliteStore};
use toolrelay_tools::{ExecutorSettings, HttpExecutor, ToolRegistry};

use crate::bridge::{EventBridge, sse_frame};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<ToolRegistry>,
    pub config: GatewayConfig,
}

pub type SharedState = Arc<GatewayState>;

/// Correlation id of the current request, set by the request-id middleware.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Build the Axum router with all gateway routes.
///
/// Layers, outermost first: HTTP trace logging, CORS, request-id, body limit.
pub fn build_router(state: SharedState) -> Router {
    let body_limit = state.config.max_body_bytes;
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/agent", post(chat_handler))
        .route("/api/agent/chat", post(chat_handler))
        .route("/api/tools", get(tools_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, request_id.clone()])
        .expose_headers([request_id])
        .max_age(Duration::from_secs(3600))
}

/// Open the capability store named by `[registry]`.
pub async fn open_store(config: &RegistryConfig) -> Result<Arc<dyn CapabilityStore>, StoreError> {
    let store: Arc<dyn CapabilityStore> = match config.backend {
        RegistryBackend::Sqlite => {
            let path = config.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
            }
            let url = format!("sqlite://{}", path.display());
            Arc::new(SqliteStore::new(&url).await?)
        }
        RegistryBackend::File => Arc::new(FileStore::new(config.resolved_path())),
        RegistryBackend::Memory => Arc::new(InMemoryStore::new()),
    };
    info!(backend = %config.backend, store = store.name(), "Capability store opened");
    Ok(store)
}

pub fn executor_settings(config: &ExecutorConfig) -> ExecutorSettings {
    ExecutorSettings {
        default_timeout: Duration::from_millis(config.default_timeout_ms),
        default_max_attempts: config.default_max_attempts,
        default_backoff_ms: config.default_backoff_ms,
        backoff: config.backoff,
        max_response_bytes: config.max_response_bytes,
    }
}

/// Wire provider, registry and executor from configuration.
pub async fn build_state(config: &AppConfig) -> Result<SharedState, Box<dyn std::error::Error>> {
    let router = toolrelay_providers::build_from_config(config);
    let provider = router
        .default()
        .ok_or_else(|| format!("provider '{}' is not configured", config.default_provider))?;

    let store = open_store(&config.registry).await?;
    let registry = Arc::new(ToolRegistry::new(
        store,
        Duration::from_secs(config.registry.cache_ttl_secs),
    ));
    let executor = Arc::new(HttpExecutor::new(executor_settings(&config.executor)));

    let orchestrator = Arc::new(Orchestrator::new(
        provider,
        registry.clone(),
        executor,
        OrchestratorSettings::from_config(config),
    ));

    Ok(Arc::new(GatewayState {
        orchestrator,
        registry,
        config: config.gateway.clone(),
    }))
}

/// Start the gateway HTTP server and run until Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = build_state(&config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let port = listener.local_addr()?.port();
    info!(addr = %addr, provider = %config.default_provider, model = %config.default_model, "Gateway starting");

    if config.announce.enabled {
        let announce_config = config.announce.clone();
        tokio::spawn(async move {
            announce::announce(&announce_config, port).await;
        });
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("Could not install Ctrl-C handler; shutdown signal disabled");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// --- Middleware ---

/// Take the caller's `x-request-id` or generate one, and echo it back.
async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    req.extensions_mut().insert(RequestId(id.clone()));
    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

// --- Handlers ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        code: status.as_u16(),
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Body of a chat request: full `messages`, or a single user `message`.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    message: Option<String>,
}

impl ChatRequest {
    fn into_messages(self) -> Vec<Message> {
        match self.message {
            Some(text) if self.messages.is_empty() && !text.trim().is_empty() => vec![Message::user(text)],
            _ => self.messages,
        }
    }
}

async fn chat_handler(
    State(state): State<SharedState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(rejection) => {
            let status = match rejection.status() {
                StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
                _ => StatusCode::BAD_REQUEST,
            };
            return error_response(status, rejection.body_text());
        }
    };

    let messages = payload.into_messages();
    if messages.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "request must contain at least one message");
    }
    let messages = match Conversation::from_messages(messages) {
        Ok(conv) => conv.messages,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let ctx = RequestContext::new(request_id);
    ctx.span.in_scope(|| info!(messages = messages.len(), "Chat request accepted"));

    let mut rx = state.orchestrator.run_stream(ctx.clone(), messages);

    // Nothing is written until the first event, so an early failure is still a 500.
    let first = match rx.recv().await {
        Some(StreamEvent::Error { message, .. }) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, message);
        }
        None => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "orchestrator stopped unexpectedly");
        }
        Some(event) => event,
    };

    let stream = EventBridge::new(&ctx, rx)
        .with_first(first)
        .map(|event| sse_frame(&event));

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

#[derive(Serialize)]
struct ToolsResponse {
    store: String,
    count: usize,
    tools: Vec<ToolDefinition>,
}

async fn tools_handler(State(state): State<SharedState>) -> Response {
    match state.registry.load_capabilities().await {
        Ok(snapshot) => Json(ToolsResponse {
            store: state.registry.store_name().to_string(),
            count: snapshot.len(),
            tools: snapshot.to_model_schema(),
        })
        .into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use toolrelay_core::capability::CapabilityDefinition;
    use toolrelay_core::error::ProviderError;
    use toolrelay_core::provider::{Provider, ProviderRequest, ProviderResponse};

    /// Replies with fixed text, or fails when `reply` is `None`.
    struct FixedProvider {
        reply: Option<String>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            match &self.reply {
                Some(text) => Ok(ProviderResponse {
                    message: Message::assistant(text.clone()),
                    usage: None,
                    model: "fixed".into(),
                }),
                None => Err(ProviderError::Network("connection refused".into())),
            }
        }
    }

    fn weather() -> CapabilityDefinition {
        serde_json::from_value(serde_json::json!({
            "name": "lookup-weather",
            "description": "Current weather for a city",
            "parameter_schema": {"type": "object", "properties": {"city": {"type": "string"}}},
            "endpoint": {"url_template": "https://weather.test/{city}"}
        }))
        .unwrap()
    }

    fn app_with(reply: Option<&str>, store: Arc<InMemoryStore>) -> Router {
        let provider = Arc::new(FixedProvider {
            reply: reply.map(str::to_string),
            calls: Mutex::new(0),
        });
        let registry = Arc::new(ToolRegistry::uncached(store));
        let orchestrator = Arc::new(Orchestrator::new(
            provider,
            registry.clone(),
            Arc::new(HttpExecutor::new(ExecutorSettings::default())),
            OrchestratorSettings::default(),
        ));
        build_router(Arc::new(GatewayState {
            orchestrator,
            registry,
            config: GatewayConfig::default(),
        }))
    }

    fn app(reply: &str) -> Router {
        app_with(Some(reply), Arc::new(InMemoryStore::with_definitions(vec![weather()])))
    }

    fn chat(body: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri("/api/agent")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let req = axum::http::Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app("hi").oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn chat_streams_sse_frames() {
        let response = app("hello there")
            .oneshot(chat(r#"{"messages":[{"role":"user","content":"hello"}]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/event-stream"));

        let body = body_text(response).await;
        let delta = body.find("event: text_delta").unwrap();
        let done = body.find("event: done").unwrap();
        assert!(delta < done);
        assert!(body.contains(r#""message":"hello there""#));
    }

    #[tokio::test]
    async fn chat_alias_and_single_message_form() {
        let req = axum::http::Request::builder()
            .method("POST")
            .uri("/api/agent/chat")
            .header("content-type", "application/json")
            .header(REQUEST_ID_HEADER, "caller-id-7")
            .body(Body::from(r#"{"message":"hello"}"#))
            .unwrap();
        let response = app("hi").oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "caller-id-7");
    }

    #[tokio::test]
    async fn malformed_input_is_400() {
        for body in ["{not json", r#"{"messages":[]}"#, r#"{"messages":[{"role":"tool","content":"x"}]}"#] {
            let response = app("hi").oneshot(chat(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
            let err: ErrorBody = serde_json::from_str(&body_text(response).await).unwrap();
            assert_eq!(err.code, 400);
            assert!(!err.message.is_empty());
        }
    }

    #[tokio::test]
    async fn registry_down_is_500_before_streaming() {
        let store = Arc::new(InMemoryStore::with_definitions(vec![weather()]));
        store.set_online(false);
        let response = app_with(Some("hi"), store)
            .oneshot(chat(r#"{"message":"hello"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let err: ErrorBody = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(err.code, 500);
    }

    #[tokio::test]
    async fn model_down_is_500_before_streaming() {
        let response = app_with(None, Arc::new(InMemoryStore::new()))
            .oneshot(chat(r#"{"message":"hello"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn tools_lists_snapshot() {
        let req = axum::http::Request::builder()
            .uri("/api/tools")
            .body(Body::empty())
            .unwrap();
        let response = app("hi").oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["tools"][0]["name"], "lookup-weather");
    }

    #[test]
    fn executor_settings_follow_config() {
        let config = ExecutorConfig {
            default_timeout_ms: 250,
            ..ExecutorConfig::default()
        };
        assert_eq!(executor_settings(&config).default_timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn memory_backend_opens_empty() {
        let config = RegistryConfig {
            backend: RegistryBackend::Memory,
            ..RegistryConfig::default()
        };
        let store = open_store(&config).await.unwrap();
        assert!(store.fetch_all().await.unwrap().is_empty());
    }
}
