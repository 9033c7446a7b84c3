//! Control HTTP API
//!
//! Thin surface over the engine: lifecycle toggles, manual tick, config
//! read/write and the full state snapshot. All core behavior lives in the
//! engine; handlers only translate between HTTP and engine calls.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{ExecutionConfigUpdate, StrategyConfig};
use crate::engine::Engine;

/// Uniform response envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Create the API router with all endpoints
pub fn create_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/api/health", get(get_health))
        .route("/api/bot/start", post(start_bot))
        .route("/api/bot/stop", post(stop_bot))
        .route("/api/bot/tick", post(manual_tick))
        .route("/api/config", get(get_config).post(update_config))
        .route("/api/execution", get(get_execution).post(update_execution))
        .route("/api/state", get(get_state))
        .with_state(engine)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    running: bool,
    tick_count: u64,
    last_tick_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// GET /api/health - Liveness and tick counters
async fn get_health(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(ApiResponse::success(HealthResponse {
        status: "ok",
        running: engine.is_running(),
        tick_count: engine.tick_count(),
        last_tick_at: engine.last_tick_at().await,
    }))
}

/// POST /api/bot/start - Idempotent lifecycle start
async fn start_bot(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    engine.start().await;
    Json(ApiResponse::success("started"))
}

/// POST /api/bot/stop - Cooperative stop, waits for the in-flight tick
async fn stop_bot(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    engine.stop().await;
    Json(ApiResponse::success("stopped"))
}

/// POST /api/bot/tick - Execute one full cycle synchronously
async fn manual_tick(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    engine.tick().await;
    Json(ApiResponse::success(engine.tick_count()))
}

/// GET /api/config - Current strategy configuration
async fn get_config(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(ApiResponse::success(engine.strategy_config().await))
}

/// POST /api/config - Validate-and-replace; rejection leaves state unchanged
async fn update_config(
    State(engine): State<Arc<Engine>>,
    Json(config): Json<StrategyConfig>,
) -> impl IntoResponse {
    match engine.update_strategy_config(config).await {
        Ok(updated) => (StatusCode::OK, Json(ApiResponse::success(updated))),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(err.to_string())),
        ),
    }
}

/// GET /api/execution - Mode and masked credential
async fn get_execution(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(ApiResponse::success(engine.execution_config_view().await))
}

/// POST /api/execution - Mode switch and credential set; never echoes the
/// credential back in full
async fn update_execution(
    State(engine): State<Arc<Engine>>,
    Json(update): Json<ExecutionConfigUpdate>,
) -> impl IntoResponse {
    Json(ApiResponse::success(
        engine.update_execution_config(update).await,
    ))
}

/// GET /api/state - Full engine snapshot
async fn get_state(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    Json(ApiResponse::success(engine.state().await))
}
