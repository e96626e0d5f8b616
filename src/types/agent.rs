//! Agent records, versions, publishers, and entitlements.
//!
//! Records are the mutable head pointer for an agent within a tenant;
//! versions are immutable and content-addressed. No bidirectional object
//! graphs: records hold `latest_version_id`, versions hold `agent_id`.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use super::peer::PeerId;
use super::principal::Role;

macro_rules! surrogate_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mint a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

surrogate_id!(
    /// Surrogate id of an agent record.
    AgentId
);
surrogate_id!(
    /// Surrogate id of an immutable agent version.
    VersionId
);
surrogate_id!(
    /// Surrogate id of a publisher within a tenant.
    PublisherId
);

/// Top-level isolation boundary. Tenants own publishers and consumers.
///
/// Tenant ids arrive from verified tokens and are treated as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Wrap a tenant identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved tenant that owns federated entries pulled from peers.
    pub fn federation() -> Self {
        Self("federation".to_string())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 over the canonical JSON bytes of an Agent Card.
///
/// This is the deduplication key: publishing the same bytes twice is an
/// idempotent no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Hex representation, lowercase.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in self.0 {
            use std::fmt::Write;
            let _ = write!(out, "{byte:02x}");
        }
        out
    }

    /// Parse from a lowercase/uppercase hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hi = (chunk[0] as char).to_digit(16)?;
            let lo = (chunk[1] as char).to_digit(16)?;
            bytes[i] = ((hi << 4) | lo) as u8;
        }
        Some(Self(bytes))
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom("expected 64 hex characters"))
    }
}

/// How a version's card bytes arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardSource {
    /// Submitted inline in the publish request body.
    ByValue,
    /// Fetched from a publisher-supplied URL.
    ByUrl,
    /// Pulled from a peer registry during federation sync.
    Federated,
}

/// Logical producer identity within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publisher {
    /// Surrogate id.
    pub id: PublisherId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Display name; must match `provider.organization` on published cards
    /// unless the caller is an Administrator.
    pub display_name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// The mutable head pointer for an agent in a tenant.
///
/// Unique within `(tenant_id, publisher_id, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Surrogate id.
    pub id: AgentId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Owning publisher.
    pub publisher_id: PublisherId,
    /// Agent name, unique per publisher.
    pub name: String,
    /// The current version; always references an existing version of this agent.
    pub latest_version_id: VersionId,
    /// Whether the agent is visible outside its tenant.
    pub public: bool,
    /// Set iff the latest version arrived via federation sync.
    pub federated_from: Option<PeerId>,
    /// Soft-delete flag; hidden records are invisible everywhere.
    pub hidden: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Bumped on every version-creating publish; never on dedupe no-ops.
    pub updated_at: DateTime<Utc>,
}

/// An immutable, content-addressed snapshot of an Agent Card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentVersion {
    /// Surrogate id.
    pub id: VersionId,
    /// Owning record.
    pub agent_id: AgentId,
    /// The card's declared semver version string.
    pub version: String,
    /// The card exactly as published (unknown fields preserved).
    pub card: serde_json::Value,
    /// SHA-256 of the canonical JSON bytes.
    pub content_hash: ContentHash,
    /// How the bytes arrived.
    pub source: CardSource,
    /// The fetch URL for `by_url` and `federated` sources.
    pub source_url: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Who an entitlement grants visibility to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntitlementSubject {
    /// A single authenticated principal, by subject id.
    Principal(String),
    /// A consumer (client application) registered in the tenant.
    Consumer(String),
    /// Every principal holding the role within the tenant.
    Role(Role),
}

/// A positive grant making a non-public agent visible inside its tenant.
///
/// Grants are additive; revocation sets `revoked_at`. Resolution is the
/// union across the caller's principal id, consumer id, and roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    /// Surrogate id.
    pub id: Uuid,
    /// Tenant the grant lives in.
    pub tenant_id: TenantId,
    /// Who the grant applies to.
    pub subject: EntitlementSubject,
    /// The agent made visible.
    pub agent_id: AgentId,
    /// When the grant became active.
    pub granted_at: DateTime<Utc>,
    /// Set when revoked; an entitlement with `revoked_at` is inert.
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Entitlement {
    /// Whether the grant is currently in force.
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}
