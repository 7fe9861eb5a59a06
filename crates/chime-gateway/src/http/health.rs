use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — liveness probe plus the engine's tick health.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let engine = state.engine_health.snapshot();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "engine": {
            "poll_seconds": state.config.engine.poll_seconds,
            "last_tick_at": engine.last_tick_at.map(|t| t.to_rfc3339()),
            "consecutive_failures": engine.consecutive_failures,
        },
    }))
}
