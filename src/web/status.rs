//! Health and status handlers.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use tracing::trace;

use crate::state::{AppState, WorkerHealth};

#[derive(Serialize)]
pub struct StatusResponse {
    status: &'static str,
    version: String,
    commit: String,
    workers: BTreeMap<&'static str, WorkerHealth>,
}

/// Health check endpoint
pub(super) async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Status endpoint: overall condition plus the per-worker health board
pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let workers: BTreeMap<&'static str, WorkerHealth> =
        state.health.snapshot().into_iter().collect();
    let status = if state.health.any_failing() { "degraded" } else { "ok" };

    Json(StatusResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_SHORT").to_string(),
        workers,
    })
}
