// =============================================================================
// REST API Endpoints: Axum 0.7
// =============================================================================
//
// Read-only JSON views over the candle store and feed status. All endpoints
// live under `/api/v1/`. Handlers copy data out of the store under its read
// lock and never touch the feed task.
//
// CORS is configured permissively so a browser chart can poll from any origin.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::{AppState, FeedStatusSnapshot};

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/candles", get(candles))
        .route("/api/v1/candles/live", get(live_candle))
        .route("/api/v1/status", get(status))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    uptime_secs: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        uptime_secs: state.uptime_secs(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Candles
// =============================================================================

#[derive(Debug, Deserialize)]
struct CandleQuery {
    limit: Option<usize>,
}

/// Most recent completed candles, oldest first. `limit` defaults to the
/// configured read limit and is clamped to the store capacity.
async fn candles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CandleQuery>,
) -> impl IntoResponse {
    let default_limit = state.runtime_config.read().default_read_limit;
    let limit = query
        .limit
        .unwrap_or(default_limit)
        .min(state.candle_store.capacity());
    Json(state.candle_store.read_last(limit))
}

async fn live_candle(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.candle_store.live())
}

// =============================================================================
// Feed status
// =============================================================================

async fn status(State(state): State<Arc<AppState>>) -> Json<FeedStatusSnapshot> {
    Json(state.feed_status.snapshot())
}
