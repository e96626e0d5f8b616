//! Liveness and readiness probes. Unauthenticated by design.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// GET `/health`.
pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// GET `/health/live` — the process is alive.
pub async fn live() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// GET `/health/ready` — the process can serve traffic.
///
/// Reports the repair backlog so operators see index lag building up.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let backlog = state.writer.repair_backlog().await;
    Json(json!({
        "status": "ok",
        "indexRepairBacklog": backlog,
    }))
}
