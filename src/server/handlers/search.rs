//! Search handler.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use super::gate;
use crate::discovery::SearchParams;
use crate::limiter::EndpointClass;
use crate::server::error::ApiError;
use crate::state::AppState;

/// POST `/agents/search` request body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBody {
    /// Free-text query.
    pub q: Option<String>,
    /// Structured filters.
    #[serde(default)]
    pub filters: SearchFilters,
    /// Requested page size.
    pub top: Option<u32>,
    /// Offset into the ranked results.
    #[serde(default)]
    pub skip: usize,
}

/// The `filters` sub-object.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    /// Require every listed tag.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Restrict to one publisher display name.
    pub publisher: Option<String>,
    /// Restrict to one preferred transport.
    pub transport: Option<String>,
    /// Require every listed security scheme type.
    #[serde(default)]
    pub security: Vec<String>,
    /// Restrict by visibility flag.
    pub public: Option<bool>,
}

/// POST `/agents/search` — ranked search within the caller's visibility.
pub async fn search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SearchBody>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = gate(&state, &headers, EndpointClass::AuthRead, true).await?;
    let principal = gate.principal.as_ref().expect("gate enforced auth");

    let params = SearchParams {
        q: body.q,
        tags: body.filters.tags,
        publisher: body.filters.publisher,
        transport: body.filters.transport,
        security: body.filters.security,
        public: body.filters.public,
        skip: body.skip,
        top: body.top,
    };
    let response = state
        .discovery
        .search(&gate.ctx, principal, params)
        .await
        .map_err(|err| ApiError::new(err, gate.ctx.request_id))?;
    Ok(Json(response))
}
