//! Axum router configuration.
//!
//! Modular router organization with focused sub-routers per API surface.
//!
//! ```text
//! /
//! ├── /.well-known/*    - Public discovery index and registry card
//! ├── /agents/*         - List, get, search, publish
//! ├── /peers/*          - Peer administration (Administrator)
//! ├── /stats            - Aggregate counts
//! └── /health/*         - Liveness and readiness probes
//! ```

use axum::routing::get;
use axum::routing::post;
use axum::Router;

use super::handlers::agents;
use super::handlers::health;
use super::handlers::peers;
use super::handlers::search;
use super::handlers::stats;
use super::handlers::well_known;
use crate::state::AppState;

/// Build the complete router over `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/.well-known/agents/index.json",
            get(well_known::index),
        )
        .route("/.well-known/agent.json", get(well_known::registry_card))
        .route("/stats", get(stats::stats))
        .nest("/health", health_router())
        .nest("/agents", agents_router())
        .nest("/peers", peers_router())
        .with_state(state)
}

/// Health probes.
///
/// Routes:
/// - `GET /health` - Basic health check
/// - `GET /health/ready` - Readiness probe (can serve traffic)
/// - `GET /health/live` - Liveness probe (process is alive)
fn health_router() -> Router<AppState> {
    Router::new()
        .route("/", get(health::health))
        .route("/ready", get(health::ready))
        .route("/live", get(health::live))
}

/// Agent discovery and publishing.
///
/// Routes:
/// - `GET  /agents/public` - Cross-tenant public listing
/// - `GET  /agents/entitled` - Tenant listing: public plus entitled
/// - `GET  /agents/{id}` - Record plus head card
/// - `GET  /agents/{id}/card` - Canonical card bytes
/// - `POST /agents/search` - Ranked search within visibility
/// - `POST /agents/publish` - Publish by value or URL
fn agents_router() -> Router<AppState> {
    Router::new()
        .route("/public", get(agents::list_public))
        .route("/entitled", get(agents::list_entitled))
        .route("/search", post(search::search))
        .route("/publish", post(agents::publish))
        .route("/{id}", get(agents::get_agent))
        .route("/{id}/card", get(agents::get_card))
}

/// Peer administration. Every route requires Administrator.
///
/// Routes:
/// - `GET    /peers` - List peers
/// - `POST   /peers` - Register a peer
/// - `GET    /peers/{id}` - Peer detail
/// - `POST   /peers/{id}` - Partial update
/// - `DELETE /peers/{id}` - Remove a peer
/// - `POST   /peers/{id}/sync` - Trigger an immediate sync
/// - `GET    /peers/{id}/runs` - Recent sync history
fn peers_router() -> Router<AppState> {
    Router::new()
        .route("/", get(peers::list).post(peers::create))
        .route(
            "/{id}",
            get(peers::get).post(peers::update).delete(peers::delete),
        )
        .route("/{id}/sync", post(peers::trigger_sync))
        .route("/{id}/runs", get(peers::runs))
}
