//! Peer administration handlers. Administrator only.

use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use super::gate;
use super::Gate;
use crate::error::RegistryError;
use crate::limiter::EndpointClass;
use crate::server::error::ApiError;
use crate::state::AppState;
use crate::store::PeerUpdate;
use crate::types::PeerId;
use crate::types::PeerRegistry;
use crate::types::PeerStatus;
use crate::types::Principal;
use crate::types::Role;

/// Peer as exposed over the API; the auth token never leaves the store.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerView {
    /// Surrogate id.
    pub id: PeerId,
    /// Display name.
    pub name: String,
    /// Root URL.
    pub base_url: String,
    /// Seconds between scheduled pulls.
    pub sync_interval_s: u64,
    /// When the last sync finished.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub status: PeerStatus,
    /// Error from the last failed sync.
    pub last_error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<PeerRegistry> for PeerView {
    fn from(peer: PeerRegistry) -> Self {
        Self {
            id: peer.id,
            name: peer.name,
            base_url: peer.base_url,
            sync_interval_s: peer.sync_interval_s,
            last_sync_at: peer.last_sync_at,
            status: peer.status,
            last_error: peer.last_error,
            created_at: peer.created_at,
        }
    }
}

/// POST `/peers` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePeerBody {
    /// Display name; federated entries land under `peer:{name}`.
    pub name: String,
    /// Root URL of the peer registry.
    pub base_url: String,
    /// Bearer token for index and card fetches.
    pub auth_token: Option<String>,
    /// Seconds between scheduled pulls; the configured default when absent.
    pub sync_interval_s: Option<u64>,
}

/// POST `/peers/{id}` body; absent fields stay unchanged.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePeerBody {
    /// New display name.
    pub name: Option<String>,
    /// New root URL.
    pub base_url: Option<String>,
    /// Replacement auth token.
    pub auth_token: Option<String>,
    /// New sync interval.
    pub sync_interval_s: Option<u64>,
    /// Enable, disable, or reset out of the error state.
    pub status: Option<PeerStatus>,
}

fn require_admin(gate: &Gate) -> Result<&Principal, ApiError> {
    let principal = gate.principal.as_ref().expect("gate enforced auth");
    if principal.has_role(Role::Administrator) {
        Ok(principal)
    } else {
        Err(ApiError::new(
            RegistryError::forbidden("peer administration requires Administrator"),
            gate.ctx.request_id,
        ))
    }
}

/// GET `/peers` — all configured peers.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let gate = gate(&state, &headers, EndpointClass::SyncAdmin, true).await?;
    require_admin(&gate)?;
    let peers = state
        .peers
        .list_peers()
        .await
        .map_err(|err| ApiError::new(err.into(), gate.ctx.request_id))?;
    Ok(Json(
        peers.into_iter().map(PeerView::from).collect::<Vec<_>>(),
    ))
}

/// POST `/peers` — register a peer; 201.
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreatePeerBody>,
) -> Result<Response, ApiError> {
    let gate = gate(&state, &headers, EndpointClass::SyncAdmin, true).await?;
    require_admin(&gate)?;

    if !body.base_url.starts_with("http://") && !body.base_url.starts_with("https://") {
        return Err(ApiError::new(
            RegistryError::forbidden("baseUrl must be an http(s) URL"),
            gate.ctx.request_id,
        ));
    }
    let peer = PeerRegistry {
        id: PeerId::new(),
        name: body.name,
        base_url: body.base_url.trim_end_matches('/').to_string(),
        auth_token: body.auth_token,
        sync_interval_s: body
            .sync_interval_s
            .unwrap_or(state.config.federation.default_sync_interval.as_secs()),
        last_sync_at: None,
        last_cursor: None,
        status: PeerStatus::Active,
        last_error: None,
        created_at: state.clock.now(),
    };
    let created = state
        .peers
        .create_peer(peer)
        .await
        .map_err(|err| ApiError::new(err.into(), gate.ctx.request_id))?;
    state.federation.reconcile_now().await;
    Ok((StatusCode::CREATED, Json(PeerView::from(created))).into_response())
}

/// GET `/peers/{id}`.
pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = gate(&state, &headers, EndpointClass::SyncAdmin, true).await?;
    require_admin(&gate)?;
    let peer = state
        .peers
        .get_peer(PeerId(id))
        .await
        .map_err(|err| ApiError::new(err.into(), gate.ctx.request_id))?
        .ok_or_else(|| ApiError::new(RegistryError::NotFound, gate.ctx.request_id))?;
    Ok(Json(PeerView::from(peer)))
}

/// POST `/peers/{id}` — partial update.
pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdatePeerBody>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = gate(&state, &headers, EndpointClass::SyncAdmin, true).await?;
    require_admin(&gate)?;
    let update = PeerUpdate {
        name: body.name,
        base_url: body.base_url,
        auth_token: body.auth_token.map(Some),
        sync_interval_s: body.sync_interval_s,
        status: body.status,
    };
    let peer = state
        .peers
        .update_peer(PeerId(id), update)
        .await
        .map_err(|err| ApiError::new(err.into(), gate.ctx.request_id))?
        .ok_or_else(|| ApiError::new(RegistryError::NotFound, gate.ctx.request_id))?;
    state.federation.reconcile_now().await;
    Ok(Json(PeerView::from(peer)))
}

/// DELETE `/peers/{id}` — 204.
pub async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let gate = gate(&state, &headers, EndpointClass::SyncAdmin, true).await?;
    require_admin(&gate)?;
    let deleted = state
        .peers
        .delete_peer(PeerId(id))
        .await
        .map_err(|err| ApiError::new(err.into(), gate.ctx.request_id))?;
    if !deleted {
        return Err(ApiError::new(RegistryError::NotFound, gate.ctx.request_id));
    }
    state.federation.reconcile_now().await;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// POST `/peers/{id}/sync` — trigger an immediate sync; 202.
pub async fn trigger_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let gate = gate(&state, &headers, EndpointClass::SyncAdmin, true).await?;
    require_admin(&gate)?;
    state
        .federation
        .trigger_sync(PeerId(id))
        .await
        .map_err(|err| ApiError::new(err, gate.ctx.request_id))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"status": "accepted"})),
    )
        .into_response())
}

/// GET `/peers/{id}/runs` — recent sync history, newest first.
pub async fn runs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = gate(&state, &headers, EndpointClass::SyncAdmin, true).await?;
    require_admin(&gate)?;
    let runs = state
        .peers
        .list_runs(Some(PeerId(id)), 50)
        .await
        .map_err(|err| ApiError::new(err.into(), gate.ctx.request_id))?;
    Ok(Json(runs))
}
