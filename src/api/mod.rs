//! HTTP control API: the user actions of the bridge, plus status

use crate::adapter::StepInput;
use crate::config::ApiConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::sequencer::SequencerHandle;
use crate::step::StepRegistry;
use crate::wallet::WalletHub;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub sequencer: SequencerHandle,
    pub registry: Arc<StepRegistry>,
    pub wallets: Arc<WalletHub>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/step-types", get(list_step_types))
        .route("/steps", get(get_steps).post(add_step))
        .route("/steps/:index", delete(remove_step))
        .route("/steps/:index/type", put(select_step_type))
        .route("/steps/:index/input", put(set_input))
        .route("/execute", post(execute))
        .route("/reset", post(reset))
        .route("/wallets", get(get_wallets))
        .route("/wallets/refresh", post(refresh_wallets))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> BridgeResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BridgeError::Config(format!("Cannot bind API address {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| BridgeError::Internal(format!("API server failed: {}", e)))
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = match &self {
            BridgeError::NotFound { .. } => StatusCode::NOT_FOUND,
            BridgeError::StepBusy { .. } => StatusCode::CONFLICT,
            BridgeError::InvalidAmount(_) | BridgeError::UnsupportedPair { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn list_step_types(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list().to_vec())
}

async fn get_steps(State(state): State<AppState>) -> Result<impl IntoResponse, BridgeError> {
    Ok(Json(state.sequencer.snapshot().await?))
}

async fn add_step(State(state): State<AppState>) -> Result<impl IntoResponse, BridgeError> {
    let descriptor = state.sequencer.add_step().await?;
    Ok((StatusCode::CREATED, Json(descriptor)))
}

async fn remove_step(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<impl IntoResponse, BridgeError> {
    Ok(Json(state.sequencer.remove_step(index).await?))
}

async fn select_step_type(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(body): Json<SelectTypeRequest>,
) -> Result<impl IntoResponse, BridgeError> {
    Ok(Json(state.sequencer.select_step_type(index, body.title).await?))
}

async fn set_input(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(input): Json<StepInput>,
) -> Result<impl IntoResponse, BridgeError> {
    state.sequencer.set_input(index, input).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn execute(State(state): State<AppState>) -> Result<impl IntoResponse, BridgeError> {
    state.sequencer.execute().await?;
    Ok(StatusCode::ACCEPTED)
}

async fn reset(State(state): State<AppState>) -> Result<impl IntoResponse, BridgeError> {
    state.sequencer.reset().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_wallets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.wallets.summaries().await)
}

async fn refresh_wallets(State(state): State<AppState>) -> impl IntoResponse {
    state.wallets.refresh_all().await;
    Json(state.wallets.summaries().await)
}

// Request / response types

#[derive(Deserialize)]
struct SelectTypeRequest {
    title: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SequencerConfig;
    use crate::sequencer::SequencerEngine;
    use crate::testing::{FakeAdapter, FakeResolver};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn app() -> Router {
        let registry = Arc::new(StepRegistry::default());
        let wallets = Arc::new(WalletHub::default());
        let (engine, sequencer) = SequencerEngine::new(
            registry.clone(),
            Arc::new(FakeResolver::new(FakeAdapter::new())),
            wallets.clone(),
            &SequencerConfig::default(),
            CancellationToken::new(),
        );
        tokio::spawn(engine.run());

        router(AppState {
            sequencer,
            registry,
            wallets,
        })
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn step_types_are_listed_in_order() {
        let app = app();
        let (status, body) = call(&app, "GET", "/step-types", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["title"], "Ethereum → Terra");
        assert_eq!(body[5]["kind"], "deposit_to_anchor");
    }

    #[tokio::test]
    async fn add_retype_and_remove_a_step() {
        let app = app();

        let (status, added) = call(&app, "POST", "/steps", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(added["id"], 0);

        let (status, retyped) = call(
            &app,
            "PUT",
            "/steps/0/type",
            Some(json!({ "title": "Terra → Solana" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(retyped["title"], "Terra → Solana");

        let (status, _) = call(
            &app,
            "PUT",
            "/steps/0/input",
            Some(json!({ "amount": "12.5" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (_, steps) = call(&app, "GET", "/steps", None).await;
        assert_eq!(steps["steps"][0]["input"]["amount"], "12.5");
        assert_eq!(steps["last_completed_index"], Value::Null);

        let (status, _) = call(&app, "DELETE", "/steps/0", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, "DELETE", "/steps/0", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn unknown_step_type_is_not_found() {
        let app = app();
        call(&app, "POST", "/steps", None).await;
        let (status, _) = call(
            &app,
            "PUT",
            "/steps/0/type",
            Some(json!({ "title": "Ethereum → Mars" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_and_empty_wallets() {
        let app = app();
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (_, wallets) = call(&app, "GET", "/wallets", None).await;
        assert_eq!(wallets, json!([]));

        let (status, _) = call(&app, "POST", "/execute", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
}
