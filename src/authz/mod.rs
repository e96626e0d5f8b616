//! Authorization gate (C11).
//!
//! Resolves bearer tokens into [`Principal`]s through the token-verifier
//! port, then enforces scopes per endpoint class, roles per operation, and
//! the tenant binding: a principal's tenant comes from its token and is
//! authoritative, so requests addressing another tenant are refused.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;
use tracing::debug;

use crate::clock::Clock;
use crate::error::RegistryError;
use crate::error::Result;
use crate::limiter::EndpointClass;
use crate::types::Principal;
use crate::types::PrincipalKind;
use crate::types::Role;
use crate::types::TenantId;

/// Scope required for authenticated reads.
pub const SCOPE_READ: &str = "registry:read";
/// Scope required for publish and entitlement writes.
pub const SCOPE_WRITE: &str = "registry:write";
/// Scope required for peer administration.
pub const SCOPE_ADMIN: &str = "registry:admin";

/// Verification failure from the token-verifier port.
#[derive(Debug, Snafu)]
pub enum AuthError {
    /// The token is unknown or malformed.
    #[snafu(display("token rejected"))]
    InvalidToken,

    /// The token was valid once but its expiry has passed.
    #[snafu(display("token expired"))]
    Expired,

    /// The verifier itself failed (network, JWKS refresh).
    #[snafu(display("verifier failure: {reason}"))]
    Verifier {
        /// What the verifier reported.
        reason: String,
    },
}

/// Claims extracted from a verified token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedToken {
    /// Subject identifier.
    pub sub: String,
    /// Tenant binding.
    pub tenant: String,
    /// Role names; unknown names are ignored.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Expiry; verified tokens past this instant are rejected.
    #[serde(default)]
    pub exp: Option<DateTime<Utc>>,
    /// Consumer (client application) binding.
    #[serde(default)]
    pub consumer: Option<String>,
    /// Whether the subject is a service identity.
    #[serde(default)]
    pub service: bool,
}

/// Token verifier port. OAuth2/JWT verification happens behind it; the core
/// only consumes the resulting claims.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify a bearer token and return its claims.
    async fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError>;
}

/// Table-driven verifier for embedded deployments and tests.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: RwLock<HashMap<String, VerifiedToken>>,
}

impl StaticTokenVerifier {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `token` as resolving to `claims`.
    pub fn insert(&self, token: impl Into<String>, claims: VerifiedToken) {
        self.tokens.write().insert(token.into(), claims);
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        self.tokens
            .read()
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

/// The authorization gate in front of every service call.
pub struct AuthzGate {
    verifier: Arc<dyn TokenVerifier>,
    clock: Arc<dyn Clock>,
}

impl AuthzGate {
    /// Gate using `verifier` for token resolution.
    pub fn new(verifier: Arc<dyn TokenVerifier>, clock: Arc<dyn Clock>) -> Self {
        Self { verifier, clock }
    }

    /// Resolve an optional bearer token into an optional principal.
    ///
    /// `None` stays `None` (anonymous); a present but unverifiable token is
    /// `Unauthenticated`.
    pub async fn authenticate(&self, bearer: Option<&str>) -> Result<Option<Principal>> {
        let Some(token) = bearer else {
            return Ok(None);
        };
        let claims = self.verifier.verify(token).await.map_err(|err| {
            debug!(error = %err, "token verification failed");
            RegistryError::Unauthenticated
        })?;
        if let Some(exp) = claims.exp {
            if exp <= self.clock.now() {
                return Err(RegistryError::Unauthenticated);
            }
        }

        let roles: BTreeSet<Role> = claims
            .roles
            .iter()
            .filter_map(|r| r.parse().ok())
            .collect();
        Ok(Some(Principal {
            id: claims.sub,
            tenant: TenantId::new(claims.tenant),
            kind: if claims.service {
                PrincipalKind::Service
            } else {
                PrincipalKind::User
            },
            roles,
            scopes: claims.scopes.into_iter().collect(),
            consumer_id: claims.consumer,
        }))
    }

    /// Require a principal; anonymous callers get `Unauthenticated`.
    pub fn require_authenticated<'p>(
        &self,
        principal: Option<&'p Principal>,
    ) -> Result<&'p Principal> {
        principal.ok_or(RegistryError::Unauthenticated)
    }

    /// Require the scope that guards `class`. Public reads need none.
    pub fn require_scope(&self, principal: &Principal, class: EndpointClass) -> Result<()> {
        let required = match class {
            EndpointClass::PublicRead => return Ok(()),
            EndpointClass::AuthRead => SCOPE_READ,
            EndpointClass::Write => SCOPE_WRITE,
            EndpointClass::SyncAdmin => SCOPE_ADMIN,
        };
        if principal.has_scope(required) {
            Ok(())
        } else {
            Err(RegistryError::forbidden(format!(
                "missing scope '{required}'"
            )))
        }
    }

    /// Require `role` or any stronger role.
    pub fn require_role(&self, principal: &Principal, role: Role) -> Result<()> {
        if principal.has_role(role) {
            Ok(())
        } else {
            Err(RegistryError::forbidden(format!("requires role '{role}'")))
        }
    }

    /// Enforce the tenant binding: when the request names a tenant it must
    /// be the principal's own.
    pub fn bind_tenant(&self, principal: &Principal, requested: Option<&TenantId>) -> Result<()> {
        match requested {
            Some(tenant) if tenant != &principal.tenant => Err(RegistryError::forbidden(
                "request addresses another tenant",
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn claims(roles: &[&str], scopes: &[&str]) -> VerifiedToken {
        VerifiedToken {
            sub: "alice".to_string(),
            tenant: "tenant-a".to_string(),
            roles: roles.iter().map(|s| s.to_string()).collect(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            exp: None,
            consumer: None,
            service: false,
        }
    }

    fn gate() -> (AuthzGate, Arc<StaticTokenVerifier>, Arc<ManualClock>) {
        let verifier = Arc::new(StaticTokenVerifier::new());
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        (
            AuthzGate::new(verifier.clone(), clock.clone()),
            verifier,
            clock,
        )
    }

    #[tokio::test]
    async fn test_anonymous_stays_anonymous() {
        let (gate, _, _) = gate();
        assert!(gate.authenticate(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthenticated() {
        let (gate, _, _) = gate();
        let err = gate.authenticate(Some("nope")).await;
        assert!(matches!(err, Err(RegistryError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_expired_token_is_unauthenticated() {
        let (gate, verifier, clock) = gate();
        let mut token = claims(&["user"], &[SCOPE_READ]);
        token.exp = Some(clock.now() - chrono::Duration::seconds(1));
        verifier.insert("stale", token);
        let err = gate.authenticate(Some("stale")).await;
        assert!(matches!(err, Err(RegistryError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_roles_and_scopes_resolve() {
        let (gate, verifier, _) = gate();
        verifier.insert(
            "good",
            claims(&["catalog_manager", "made-up-role"], &[SCOPE_WRITE]),
        );
        let principal = gate.authenticate(Some("good")).await.unwrap().unwrap();
        assert!(principal.has_role(Role::CatalogManager));
        assert_eq!(principal.roles.len(), 1);
        assert!(gate
            .require_scope(&principal, EndpointClass::Write)
            .is_ok());
        assert!(gate
            .require_scope(&principal, EndpointClass::SyncAdmin)
            .is_err());
    }

    #[tokio::test]
    async fn test_tenant_binding_is_authoritative() {
        let (gate, verifier, _) = gate();
        verifier.insert("good", claims(&["user"], &[SCOPE_READ]));
        let principal = gate.authenticate(Some("good")).await.unwrap().unwrap();

        assert!(gate.bind_tenant(&principal, None).is_ok());
        assert!(gate
            .bind_tenant(&principal, Some(&TenantId::new("tenant-a")))
            .is_ok());
        let err = gate.bind_tenant(&principal, Some(&TenantId::new("tenant-b")));
        assert!(matches!(err, Err(RegistryError::Forbidden { .. })));
    }
}
