//! Authenticated callers.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use super::agent::EntitlementSubject;
use super::agent::TenantId;

/// Registry roles, in increasing order of privilege.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only consumer.
    User,
    /// May publish and manage agents.
    CatalogManager,
    /// Full control, including peers and publisher overrides.
    Administrator,
}

impl std::str::FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" | "User" => Ok(Role::User),
            "catalog_manager" | "CatalogManager" => Ok(Role::CatalogManager),
            "administrator" | "Administrator" => Ok(Role::Administrator),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::CatalogManager => "catalog_manager",
            Role::Administrator => "administrator",
        };
        f.write_str(s)
    }
}

/// Whether the caller is an interactive user or a service identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// Interactive user.
    User,
    /// Machine identity.
    Service,
}

/// An authenticated caller, produced by the authorization gate from a
/// verified token. Not persisted beyond cached projections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Token subject.
    pub id: String,
    /// Authoritative tenant binding.
    pub tenant: TenantId,
    /// User or service.
    pub kind: PrincipalKind,
    /// Granted roles.
    pub roles: BTreeSet<Role>,
    /// Granted scopes.
    pub scopes: BTreeSet<String>,
    /// Consumer (client application) the principal acts for, if any.
    pub consumer_id: Option<String>,
}

impl Principal {
    /// Whether the principal holds `role` or any stronger role.
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.iter().any(|held| *held >= role)
    }

    /// Whether the principal is an Administrator.
    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Administrator)
    }

    /// Whether the principal carries the scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Every entitlement subject this principal resolves to: its own id,
    /// its consumer, and each held role. Union semantics at query time.
    pub fn entitlement_subjects(&self) -> Vec<EntitlementSubject> {
        let mut subjects = vec![EntitlementSubject::Principal(self.id.clone())];
        if let Some(consumer) = &self.consumer_id {
            subjects.push(EntitlementSubject::Consumer(consumer.clone()));
        }
        for role in &self.roles {
            subjects.push(EntitlementSubject::Role(*role));
        }
        subjects
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: &[Role]) -> Principal {
        Principal {
            id: "alice".to_string(),
            tenant: TenantId::new("tenant-a"),
            kind: PrincipalKind::User,
            roles: roles.iter().copied().collect(),
            scopes: BTreeSet::new(),
            consumer_id: Some("acme-app".to_string()),
        }
    }

    #[test]
    fn test_role_ordering_implies_privilege() {
        assert!(principal(&[Role::Administrator]).has_role(Role::CatalogManager));
        assert!(principal(&[Role::CatalogManager]).has_role(Role::CatalogManager));
        assert!(!principal(&[Role::User]).has_role(Role::CatalogManager));
    }

    #[test]
    fn test_entitlement_subjects_union() {
        let subjects = principal(&[Role::User, Role::CatalogManager]).entitlement_subjects();
        assert!(subjects.contains(&EntitlementSubject::Principal("alice".to_string())));
        assert!(subjects.contains(&EntitlementSubject::Consumer("acme-app".to_string())));
        assert!(subjects.contains(&EntitlementSubject::Role(Role::User)));
        assert_eq!(subjects.len(), 4);
    }

    #[test]
    fn test_role_parses_both_spellings() {
        assert_eq!("CatalogManager".parse::<Role>(), Ok(Role::CatalogManager));
        assert_eq!("administrator".parse::<Role>(), Ok(Role::Administrator));
        assert!("owner".parse::<Role>().is_err());
    }
}
