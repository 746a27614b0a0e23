//! HTTP API gateway for reqgate.
//!
//! Exposes the orchestrator over REST:
//!
//! - `POST /v1/chat/completions`              — run a constrained completion
//! - `GET  /v1/chat/completions/status/{key}` — snapshot an in-flight session
//! - `POST /v1/chat/completions/stop/{key}`   — request cooperative stop
//! - `POST /v1/models/add`                    — register a model at runtime
//! - `GET  /health`                           — liveness
//!
//! Configuration errors become 400 responses; session-level failures ride in
//! the 200 response body (the `errors` field of the choice), per the wire
//! contract.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use reqgate_config::AppConfig;
use reqgate_core::message::Message;
use reqgate_core::model::ModelSpec;
use reqgate_core::provider::Params;
use reqgate_core::requirement::Requirement;
use reqgate_engine::{CompletionRequest, CompletionResponse, Engine};

/// Shared state for the gateway.
pub struct GatewayState {
    pub engine: Arc<Engine>,
    /// The running configuration, kept in sync with the registry so model
    /// additions survive restarts.
    pub config: Mutex<AppConfig>,
    /// Where to persist configuration changes; None disables persistence.
    pub config_path: Option<PathBuf>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(engine: Arc<Engine>, config: AppConfig, config_path: Option<PathBuf>) -> SharedState {
        Arc::new(Self {
            engine,
            config: Mutex::new(config),
            config_path,
        })
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/chat/completions", post(completions_handler))
        .route(
            "/v1/chat/completions/status/{key}",
            get(status_handler),
        )
        .route("/v1/chat/completions/stop/{key}", post(stop_handler))
        .route("/v1/models/add", post(add_model_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the gateway until the process is shut down.
pub async fn serve(state: SharedState, host: &str, port: u16) -> std::io::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "reqgate gateway listening");
    axum::serve(listener, build_router(state)).await
}

// ── Request types ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CompletionBody {
    model: String,
    #[serde(default)]
    requirements: Vec<Requirement>,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    initial_response: Option<CompletionResponse>,
    /// Everything else is a completion parameter, forwarded as-is.
    #[serde(flatten)]
    params: Params,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn completions_handler(
    State(state): State<SharedState>,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    // Parse by hand so an unknown requirement type surfaces as a 400 with
    // the serde error text rather than a bare rejection.
    let body: CompletionBody = match serde_json::from_value(body) {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Rejecting malformed completion request");
            return error_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    let request = CompletionRequest {
        model: body.model,
        requirements: body.requirements,
        messages: body.messages,
        params: body.params,
        key: body.key,
        initial_response: body.initial_response,
    };

    match state.engine.create_completion(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    }
}

async fn status_handler(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> axum::response::Response {
    match state.engine.status(&key) {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "key not found"),
    }
}

async fn stop_handler(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> Json<serde_json::Value> {
    let stopped = state.engine.stop(&key);
    Json(json!({"stopped": stopped}))
}

async fn add_model_handler(
    State(state): State<SharedState>,
    Json(body): Json<serde_json::Value>,
) -> axum::response::Response {
    let spec: ModelSpec = match serde_json::from_value(body) {
        Ok(spec) => spec,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let name = spec.name().to_string();

    state.engine.add_model(spec.clone());

    // Keep the on-disk configuration in sync with the running registry.
    {
        let mut config = state.config.lock().expect("config lock poisoned");
        config.upsert_model(spec);
        if let Some(path) = &state.config_path {
            if let Err(e) = config.save_to(path) {
                warn!(error = %e, "Failed to persist configuration");
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!("model registered but not persisted: {e}"),
                );
            }
        }
    }

    info!(model = %name, "Model added or updated");
    Json(json!({"message": format!("Model {name} added or updated successfully")}))
        .into_response()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(json!({"error": message}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use reqgate_core::error::ProviderError;
    use reqgate_core::provider::{Draft, Provider};
    use tower::ServiceExt;

    struct CannedProvider(&'static str);

    #[async_trait]
    impl Provider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            _messages: &[Message],
            _params: &Params,
        ) -> Result<Draft, ProviderError> {
            Ok(Draft {
                id: "d-1".into(),
                message: Message::assistant(self.0),
                finish_reason: "end_turn".into(),
                attempts: Vec::new(),
            })
        }
    }

    fn test_state() -> SharedState {
        let engine = Engine::new(vec![]);
        let spec: ModelSpec = serde_json::from_value(json!({
            "provider": "openai_compat",
            "name": "M",
            "provider_model": "mock"
        }))
        .unwrap();
        engine
            .registry()
            .register_provider(spec, Arc::new(CannedProvider("The sky is blue.")));
        GatewayState::new(engine, AppConfig::default(), None)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(json!(null));
        (status, value)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let router = build_router(test_state());
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn completion_happy_path() {
        let router = build_router(test_state());
        let (status, body) = send(
            router,
            post_json(
                "/v1/chat/completions",
                json!({
                    "model": "M",
                    "messages": [{"role": "user", "content": "color?"}],
                    "requirements": [{"type": "Contains", "value": ["blue"]}],
                    "max_tokens": 64
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["done"], json!(true));
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(
            body["choices"][0]["message"]["content"],
            "The sky is blue."
        );
        assert_eq!(body["choices"][0]["prospects"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_model_is_400() {
        let router = build_router(test_state());
        let (status, body) = send(
            router,
            post_json("/v1/chat/completions", json!({"model": "nope", "messages": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn unknown_requirement_type_is_400() {
        let router = build_router(test_state());
        let (status, body) = send(
            router,
            post_json(
                "/v1/chat/completions",
                json!({
                    "model": "M",
                    "messages": [],
                    "requirements": [{"type": "Sentiment", "value": []}]
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn status_of_unknown_key_is_404() {
        let router = build_router(test_state());
        let request = Request::builder()
            .uri("/v1/chat/completions/status/ghost")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(router, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "key not found");
    }

    #[tokio::test]
    async fn stop_of_unknown_key_acks_false() {
        let router = build_router(test_state());
        let (status, body) = send(
            router,
            post_json("/v1/chat/completions/stop/ghost", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stopped"], json!(false));
    }

    #[tokio::test]
    async fn add_model_registers_into_engine() {
        let state = test_state();
        let router = build_router(state.clone());
        let (status, body) = send(
            router,
            post_json(
                "/v1/models/add",
                json!({
                    "provider": "reqgate",
                    "name": "checked",
                    "provider_model": "M",
                    "requirements": [{"type": "Contains", "value": ["blue"]}]
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().contains("checked"));
        assert!(state.engine.registry().spec("checked").is_some());
        assert_eq!(
            state.config.lock().unwrap().models.len(),
            1
        );

        // The new model serves completions through the loopback.
        let router = build_router(state.clone());
        let (status, body) = send(
            router,
            post_json(
                "/v1/chat/completions",
                json!({"model": "checked", "messages": [{"role": "user", "content": "color?"}]}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["done"], json!(true));
    }

    #[tokio::test]
    async fn add_model_with_unknown_kind_is_400() {
        let router = build_router(test_state());
        let (status, _) = send(
            router,
            post_json("/v1/models/add", json!({"provider": "mystery", "name": "m"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
