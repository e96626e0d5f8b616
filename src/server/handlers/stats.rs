//! Registry statistics.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;

use super::gate;
use crate::limiter::EndpointClass;
use crate::server::error::ApiError;
use crate::state::AppState;

/// GET `/stats` — aggregate counts, anonymous-capable.
pub async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let gate = gate(&state, &headers, EndpointClass::PublicRead, false).await?;
    let stats = state
        .discovery
        .stats(&gate.ctx)
        .await
        .map_err(|err| ApiError::new(err, gate.ctx.request_id))?;
    Ok(Json(stats))
}
