//! The closed error taxonomy for registry operations.
//!
//! Every service operation returns one of these kinds. The HTTP boundary
//! translates them to status codes in `server::error`; nothing below the
//! boundary reasons about HTTP. Visibility failures are always reported as
//! `NotFound` so existence never leaks across tenants.

use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

/// A single field-level violation found while validating an Agent Card.
///
/// The validator accumulates all violations instead of stopping at the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardViolation {
    /// JSON path of the offending field, e.g. `skills[2].tags`.
    pub path: String,
    /// Human-readable reason.
    pub reason: String,
}

impl CardViolation {
    /// Build a violation for `path` with the given reason.
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for CardViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{}: {}", self.path, self.reason)
        }
    }
}

/// Registry error taxonomy.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RegistryError {
    /// The submitted Agent Card failed structural or semantic validation.
    #[snafu(display("invalid agent card: {} violation(s)", violations.len()))]
    InvalidCard {
        /// All violations found, not just the first.
        violations: Vec<CardViolation>,
    },

    /// The request carried no usable credential.
    #[snafu(display("authentication required"))]
    Unauthenticated,

    /// The caller is authenticated but not permitted to perform the operation.
    #[snafu(display("forbidden: {reason}"))]
    Forbidden {
        /// Why the operation was refused.
        reason: String,
    },

    /// The entity is absent, or invisible to this caller.
    #[snafu(display("not found"))]
    NotFound,

    /// The caller exceeded its per-class request budget.
    #[snafu(display("rate limit exceeded, retry after {retry_after_ms}ms"))]
    RateLimited {
        /// Hint for the `Retry-After` header, in milliseconds.
        retry_after_ms: u64,
    },

    /// A pagination cursor could not be decoded.
    #[snafu(display("invalid pagination cursor"))]
    InvalidCursor,

    /// A shared resource (index queue, store, cache) is transiently saturated.
    #[snafu(display("overloaded: {reason}"))]
    Overloaded {
        /// Which resource saturated.
        reason: String,
    },

    /// The request budget was exhausted before the operation completed.
    #[snafu(display("request deadline exceeded"))]
    DeadlineExceeded,

    /// A peer registry or the token verifier failed.
    #[snafu(display("upstream failure: {reason}"))]
    Upstream {
        /// What the upstream reported.
        reason: String,
    },

    /// An invariant was broken inside the registry itself.
    #[snafu(display("internal error: {reason}"))]
    Internal {
        /// Description for the logs; never exposed in response detail.
        reason: String,
    },
}

impl RegistryError {
    /// Shorthand for a single-violation `InvalidCard`.
    pub fn invalid_card(path: impl Into<String>, reason: impl Into<String>) -> Self {
        RegistryError::InvalidCard {
            violations: vec![CardViolation::new(path, reason)],
        }
    }

    /// Shorthand for `Forbidden`.
    pub fn forbidden(reason: impl Into<String>) -> Self {
        RegistryError::Forbidden {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for this kind.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::InvalidCard { .. } => "invalid_card",
            RegistryError::Unauthenticated => "unauthenticated",
            RegistryError::Forbidden { .. } => "forbidden",
            RegistryError::NotFound => "not_found",
            RegistryError::RateLimited { .. } => "rate_limited",
            RegistryError::InvalidCursor => "invalid_cursor",
            RegistryError::Overloaded { .. } => "overloaded",
            RegistryError::DeadlineExceeded => "deadline_exceeded",
            RegistryError::Upstream { .. } => "upstream",
            RegistryError::Internal { .. } => "internal",
        }
    }
}

/// Crate-wide result alias.
pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
