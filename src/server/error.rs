//! HTTP error mapping.
//!
//! Every error response carries `{error, code, detail, requestId}`. Detail
//! strings never contain stack traces or internal identifiers; internal
//! errors log the reason and answer with a generic body.

use axum::http::header;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::error::CardViolation;
use crate::error::RegistryError;

/// A registry error paired with the request it failed.
#[derive(Debug)]
pub struct ApiError {
    /// What failed.
    pub error: RegistryError,
    /// Correlation id echoed to the caller.
    pub request_id: Uuid,
}

impl ApiError {
    /// Pair `error` with `request_id`.
    pub fn new(error: RegistryError, request_id: Uuid) -> Self {
        Self { error, request_id }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: &'static str,
    code: &'static str,
    detail: String,
    request_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    violations: Option<Vec<CardViolation>>,
}

fn status_for(error: &RegistryError) -> StatusCode {
    match error {
        RegistryError::InvalidCard { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        RegistryError::Unauthenticated => StatusCode::UNAUTHORIZED,
        RegistryError::Forbidden { .. } => StatusCode::FORBIDDEN,
        RegistryError::NotFound => StatusCode::NOT_FOUND,
        RegistryError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        RegistryError::InvalidCursor => StatusCode::BAD_REQUEST,
        RegistryError::Overloaded { .. } | RegistryError::Upstream { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        RegistryError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        RegistryError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn title_for(error: &RegistryError) -> &'static str {
    match error {
        RegistryError::InvalidCard { .. } => "Invalid agent card",
        RegistryError::Unauthenticated => "Authentication required",
        RegistryError::Forbidden { .. } => "Forbidden",
        RegistryError::NotFound => "Not found",
        RegistryError::RateLimited { .. } => "Rate limit exceeded",
        RegistryError::InvalidCursor => "Invalid cursor",
        RegistryError::Overloaded { .. } => "Service overloaded",
        RegistryError::DeadlineExceeded => "Deadline exceeded",
        RegistryError::Upstream { .. } => "Upstream unavailable",
        RegistryError::Internal { .. } => "Internal error",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.error);

        let (detail, violations) = match &self.error {
            RegistryError::InvalidCard { violations } => (
                format!("{} validation violation(s)", violations.len()),
                Some(violations.clone()),
            ),
            RegistryError::Internal { reason } => {
                error!(request_id = %self.request_id, reason, "internal error");
                ("internal error".to_string(), None)
            }
            other => (other.to_string(), None),
        };

        let body = ErrorBody {
            error: title_for(&self.error),
            code: self.error.code(),
            detail,
            request_id: self.request_id,
            violations,
        };

        let mut response = (status, Json(body)).into_response();
        if let RegistryError::RateLimited { retry_after_ms } = &self.error {
            let seconds = retry_after_ms.div_ceil(1000).max(1);
            if let Ok(value) = header::HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        if matches!(self.error, RegistryError::Unauthenticated) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}
