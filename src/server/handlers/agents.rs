//! Agent read and publish handlers.

use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::header;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use super::gate;
use super::read_class;
use crate::error::RegistryError;
use crate::limiter::EndpointClass;
use crate::publish::PublishInput;
use crate::server::error::ApiError;
use crate::state::AppState;
use crate::types::AgentId;

/// `?top=&skip=` offset paging.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Requested page size; clamped by the service.
    pub top: Option<u32>,
    /// Offset into the ordered listing.
    #[serde(default)]
    pub skip: usize,
}

/// GET `/agents/public` — cross-tenant public listing, anonymous-capable.
pub async fn list_public(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = gate(&state, &headers, EndpointClass::PublicRead, false).await?;
    let response = state
        .discovery
        .list_public(&gate.ctx, page.skip, page.top)
        .await
        .map_err(|err| ApiError::new(err, gate.ctx.request_id))?;
    Ok(Json(response))
}

/// GET `/agents/entitled` — public-in-tenant plus entitled.
pub async fn list_entitled(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = gate(&state, &headers, EndpointClass::AuthRead, true).await?;
    let principal = gate.principal.as_ref().expect("gate enforced auth");
    let response = state
        .discovery
        .list_entitled(&gate.ctx, principal, page.skip, page.top)
        .await
        .map_err(|err| ApiError::new(err, gate.ctx.request_id))?;
    Ok(Json(response))
}

/// GET `/agents/{id}` — record plus head card, iff visible.
pub async fn get_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = gate(&state, &headers, read_class(&headers), false).await?;
    let detail = state
        .discovery
        .get_agent(&gate.ctx, gate.principal.as_ref(), AgentId(id))
        .await
        .map_err(|err| ApiError::new(err, gate.ctx.request_id))?;
    Ok(Json(detail))
}

/// GET `/agents/{id}/card` — canonical card bytes, iff visible.
///
/// The body is the canonical JSON form, so its SHA-256 equals the stored
/// content hash.
pub async fn get_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let gate = gate(&state, &headers, read_class(&headers), false).await?;
    let card = state
        .discovery
        .get_card(&gate.ctx, gate.principal.as_ref(), AgentId(id))
        .await
        .map_err(|err| ApiError::new(err, gate.ctx.request_id))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        card.canonical,
    )
        .into_response())
}

/// POST `/agents/publish` body: exactly one of `card`/`cardUrl`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PublishBody {
    /// Inline card.
    pub card: Option<serde_json::Value>,
    /// Card to fetch.
    pub card_url: Option<String>,
    /// Requested visibility.
    #[serde(default)]
    pub public: bool,
    /// Administrator-only publisher override.
    pub publisher_override: Option<String>,
}

/// Publish response shape.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    /// The agent record.
    pub agent_id: AgentId,
    /// The stored version.
    pub version_id: crate::types::VersionId,
    /// Whether a new version was created.
    pub created: bool,
}

/// POST `/agents/publish` — 201 on a new version, 200 on dedupe.
pub async fn publish(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PublishBody>,
) -> Result<Response, ApiError> {
    let gate = gate(&state, &headers, EndpointClass::Write, true).await?;
    let principal = gate.principal.as_ref().expect("gate enforced auth");

    let input = match (body.card, body.card_url) {
        (Some(card), None) => PublishInput::ByValue(card),
        (None, Some(card_url)) => PublishInput::ByUrl(card_url),
        _ => {
            return Err(ApiError::new(
                RegistryError::invalid_card("card", "exactly one of 'card' or 'cardUrl' is required"),
                gate.ctx.request_id,
            ));
        }
    };

    let outcome = state
        .publish
        .publish(
            &gate.ctx,
            principal,
            input,
            body.public,
            body.publisher_override,
        )
        .await
        .map_err(|err| ApiError::new(err, gate.ctx.request_id))?;

    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(PublishResponse {
            agent_id: outcome.agent_id,
            version_id: outcome.version_id,
            created: outcome.created,
        }),
    )
        .into_response())
}
