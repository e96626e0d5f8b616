//! Well-known discovery surface.

use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use super::gate;
use crate::limiter::EndpointClass;
use crate::server::error::ApiError;
use crate::state::AppState;

/// `?cursor=&top=` cursor paging for the well-known index.
#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    /// Opaque resume cursor from a previous page.
    pub cursor: Option<String>,
    /// Requested page size; clamped by the service.
    pub top: Option<u32>,
}

/// GET `/.well-known/agents/index.json` — the paginated public index.
pub async fn index(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<IndexQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = gate(&state, &headers, EndpointClass::PublicRead, false).await?;
    let response = state
        .discovery
        .well_known_index(&gate.ctx, query.cursor, query.top)
        .await
        .map_err(|err| ApiError::new(err, gate.ctx.request_id))?;
    Ok(Json(response))
}

/// GET `/.well-known/agent.json` — the registry's own card.
pub async fn registry_card(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let _gate = gate(&state, &headers, EndpointClass::PublicRead, false).await?;
    Ok(Json(state.discovery.registry_card()))
}
