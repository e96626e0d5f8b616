//! Request handlers.
//!
//! Every handler runs the same pipeline: resolve the principal (AuthZ),
//! charge the rate limiter, then dispatch into a service with a fresh
//! request context. Stages are explicit rather than middleware so the
//! ordering is visible at the call site.

pub mod agents;
pub mod health;
pub mod peers;
pub mod search;
pub mod stats;
pub mod well_known;

use axum::http::HeaderMap;

use super::error::ApiError;
use super::extract::bearer;
use super::extract::client_key;
use crate::context::RequestContext;
use crate::error::RegistryError;
use crate::limiter::EndpointClass;
use crate::state::AppState;
use crate::types::Principal;

/// Outcome of the AuthZ → RateLimit prefix of the pipeline.
pub(crate) struct Gate {
    /// The resolved principal; `None` only for anonymous-capable classes.
    pub principal: Option<Principal>,
    /// Fresh per-request context.
    pub ctx: RequestContext,
}

/// Run authentication, scope enforcement, and rate limiting for one request.
///
/// `require_auth` makes anonymous callers fail with 401 even on classes
/// that would otherwise admit them.
pub(crate) async fn gate(
    state: &AppState,
    headers: &HeaderMap,
    class: EndpointClass,
    require_auth: bool,
) -> Result<Gate, ApiError> {
    let ctx = state.ctx();
    let request_id = ctx.request_id;
    let fail = move |error: RegistryError| ApiError::new(error, request_id);

    let principal = state
        .authz
        .authenticate(bearer(headers).as_deref())
        .await
        .map_err(fail)?;

    match &principal {
        Some(principal) => state.authz.require_scope(principal, class).map_err(fail)?,
        None if require_auth || !matches!(class, EndpointClass::PublicRead) => {
            return Err(fail(RegistryError::Unauthenticated));
        }
        None => {}
    }

    let caller = principal
        .as_ref()
        .map(|p| p.id.clone())
        .unwrap_or_else(|| client_key(headers));
    state.limiter.check(&caller, class).map_err(fail)?;

    Ok(Gate { principal, ctx })
}

/// The read class for endpoints that serve both anonymous and authenticated
/// callers: presenting a token moves the caller into the richer budget.
pub(crate) fn read_class(headers: &HeaderMap) -> EndpointClass {
    if bearer(headers).is_some() {
        EndpointClass::AuthRead
    } else {
        EndpointClass::PublicRead
    }
}
