//! Persistence ports (C3 Agent Store, C4 Entitlement Store, peers).
//!
//! The core talks to its relational store through these traits. The
//! in-memory adapter in [`memory`] serializes writes behind a single lock,
//! which stands in for the row-level locking a relational backend provides:
//! publishes to the same `(tenant, publisher, name)` are linearized either
//! way.

pub mod memory;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use snafu::Snafu;

use crate::types::AgentId;
use crate::types::AgentRecord;
use crate::types::AgentVersion;
use crate::types::CardSource;
use crate::types::ContentHash;
use crate::types::Cursor;
use crate::types::Entitlement;
use crate::types::EntitlementSubject;
use crate::types::Page;
use crate::types::PeerId;
use crate::types::PeerRegistry;
use crate::types::PeerStatus;
use crate::types::Publisher;
use crate::types::PublisherId;
use crate::types::SyncRun;
use crate::types::TenantId;
use crate::types::VersionId;

pub use memory::MemoryAgentStore;
pub use memory::MemoryEntitlementStore;
pub use memory::MemoryPeerStore;

/// Store-level failure.
#[derive(Debug, Snafu)]
pub enum StoreError {
    /// Referenced row does not exist.
    #[snafu(display("row not found"))]
    RowNotFound,

    /// A uniqueness or state constraint was violated.
    #[snafu(display("conflict: {reason}"))]
    Conflict {
        /// Which constraint.
        reason: String,
    },

    /// The agent's declared version string already exists with different
    /// content. `(agent_id, version)` is unique.
    #[snafu(display("version '{version}' already published with different content"))]
    VersionContentMismatch {
        /// The conflicting version string.
        version: String,
    },

    /// A federated record was addressed by a local publish.
    #[snafu(display("federated agents cannot be mutated locally"))]
    FederatedImmutable,

    /// Backend failure.
    #[snafu(display("store backend error: {reason}"))]
    Backend {
        /// What went wrong.
        reason: String,
    },
}

impl From<StoreError> for crate::error::RegistryError {
    fn from(err: StoreError) -> Self {
        use crate::error::CardViolation;
        use crate::error::RegistryError;
        match err {
            StoreError::RowNotFound => RegistryError::NotFound,
            StoreError::VersionContentMismatch { version } => RegistryError::InvalidCard {
                violations: vec![CardViolation::new(
                    "version",
                    format!("version '{version}' already published with different content"),
                )],
            },
            StoreError::FederatedImmutable => {
                RegistryError::forbidden("federated agents cannot be mutated locally")
            }
            StoreError::Conflict { reason } => RegistryError::Forbidden { reason },
            StoreError::Backend { reason } => RegistryError::Internal { reason },
        }
    }
}

/// Input to [`AgentStore::upsert_version`].
#[derive(Debug, Clone)]
pub struct UpsertVersion {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Resolved publisher.
    pub publisher_id: PublisherId,
    /// Agent name within the publisher.
    pub name: String,
    /// Declared card version string.
    pub version: String,
    /// The card exactly as published.
    pub card: serde_json::Value,
    /// SHA-256 of the canonical card bytes.
    pub content_hash: ContentHash,
    /// How the bytes arrived.
    pub source: CardSource,
    /// The fetch URL for `by_url` and `federated` sources.
    pub source_url: Option<String>,
    /// Requested record visibility; applied when a version is created.
    pub public: bool,
    /// Set for federated upserts.
    pub federated_from: Option<PeerId>,
}

/// Result of [`AgentStore::upsert_version`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// The record's id, existing or freshly created.
    pub agent_id: AgentId,
    /// The matching version: new on `created`, the deduplicated one otherwise.
    pub version_id: VersionId,
    /// Whether a new version was created. False means the same canonical
    /// bytes were already stored and nothing changed.
    pub created: bool,
}

/// Visibility filter for tenant-scoped listing.
#[derive(Debug, Clone, Default)]
pub struct TenantListFilter {
    /// Restrict to one publisher.
    pub publisher: Option<PublisherId>,
    /// Restrict to public records only.
    pub public_only: bool,
    /// When set, keep records that are public or whose id is in the set
    /// (the caller's resolved entitlements).
    pub entitled: Option<HashSet<AgentId>>,
}

/// Agent record, version, and publisher persistence (C3).
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Look up or create the publisher named `display_name` in `tenant`.
    async fn resolve_publisher(
        &self,
        tenant: &TenantId,
        display_name: &str,
    ) -> Result<Publisher, StoreError>;

    /// Fetch a publisher by id.
    async fn get_publisher(&self, id: PublisherId) -> Result<Option<Publisher>, StoreError>;

    /// Insert a version under `(tenant, publisher, name)`, creating the
    /// record on first publish. Identical canonical bytes deduplicate to the
    /// existing version with `created=false` and no `updated_at` bump.
    /// Publishes are linearized per record.
    async fn upsert_version(&self, req: UpsertVersion) -> Result<UpsertOutcome, StoreError>;

    /// Undo a version insert that could not be indexed: removes the version
    /// and restores the previous head, deleting the record if this was its
    /// only version. Publish is atomic from the caller's point of view.
    async fn rollback_version(
        &self,
        agent_id: AgentId,
        version_id: VersionId,
    ) -> Result<(), StoreError>;

    /// Fetch a record by id, including hidden ones.
    async fn get_record(&self, id: AgentId) -> Result<Option<AgentRecord>, StoreError>;

    /// Fetch a record by its natural key.
    async fn get_by_name(
        &self,
        tenant: &TenantId,
        publisher: PublisherId,
        name: &str,
    ) -> Result<Option<AgentRecord>, StoreError>;

    /// Fetch a version by id.
    async fn get_version(&self, id: VersionId) -> Result<Option<AgentVersion>, StoreError>;

    /// Fetch the head version of an agent.
    async fn get_latest(&self, agent_id: AgentId) -> Result<Option<AgentVersion>, StoreError>;

    /// All versions of an agent, oldest first.
    async fn list_versions(&self, agent_id: AgentId) -> Result<Vec<AgentVersion>, StoreError>;

    /// Public, non-hidden records across all tenants, newest-updated first.
    async fn list_public(
        &self,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<Page<AgentRecord>, StoreError>;

    /// Non-hidden records in one tenant, filtered, newest-updated first.
    async fn list_for_tenant(
        &self,
        tenant: &TenantId,
        filter: TenantListFilter,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<Page<AgentRecord>, StoreError>;

    /// All federated records pulled from `peer`, including hidden ones.
    async fn list_federated(&self, peer: PeerId) -> Result<Vec<AgentRecord>, StoreError>;

    /// Soft-delete a record: it disappears from every read path but its
    /// versions remain. Used for federation retraction.
    async fn soft_delete(&self, agent_id: AgentId) -> Result<(), StoreError>;

    /// Number of visible records owned by a publisher, for quota checks.
    async fn count_for_publisher(&self, publisher: PublisherId) -> Result<usize, StoreError>;

    /// `(total, public)` visible record counts, for registry statistics.
    async fn count_agents(&self) -> Result<(usize, usize), StoreError>;
}

/// Entitlement persistence and resolution (C4).
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Grant `subject` visibility of `agent_id`. Granting over an active
    /// grant is a no-op returning the existing grant; granting after a
    /// revocation creates a fresh grant with a later `granted_at`.
    async fn grant(
        &self,
        tenant: &TenantId,
        subject: EntitlementSubject,
        agent_id: AgentId,
        now: DateTime<Utc>,
    ) -> Result<Entitlement, StoreError>;

    /// Revoke an active grant. Returns false when no active grant existed.
    async fn revoke(
        &self,
        tenant: &TenantId,
        subject: &EntitlementSubject,
        agent_id: AgentId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Union of agents visible to any of `subjects` within `tenant`.
    async fn entitled_agents(
        &self,
        tenant: &TenantId,
        subjects: &[EntitlementSubject],
    ) -> Result<HashSet<AgentId>, StoreError>;

    /// All grants referencing an agent, active and revoked.
    async fn list_for_agent(&self, agent_id: AgentId) -> Result<Vec<Entitlement>, StoreError>;
}

/// Fields an administrator may change on a peer registry.
#[derive(Debug, Clone, Default)]
pub struct PeerUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New base URL.
    pub base_url: Option<String>,
    /// Replace the auth token; `Some(None)` clears it.
    pub auth_token: Option<Option<String>>,
    /// New sync interval in seconds.
    pub sync_interval_s: Option<u64>,
    /// Enable/disable, or reset out of the error state.
    pub status: Option<PeerStatus>,
}

/// Peer registry and sync-run persistence.
#[async_trait]
pub trait PeerStore: Send + Sync {
    /// Insert a peer. Fails on duplicate name.
    async fn create_peer(&self, peer: PeerRegistry) -> Result<PeerRegistry, StoreError>;

    /// Apply an update; returns the new state, or None if absent.
    async fn update_peer(
        &self,
        id: PeerId,
        update: PeerUpdate,
    ) -> Result<Option<PeerRegistry>, StoreError>;

    /// Fetch a peer by id.
    async fn get_peer(&self, id: PeerId) -> Result<Option<PeerRegistry>, StoreError>;

    /// All peers, any status.
    async fn list_peers(&self) -> Result<Vec<PeerRegistry>, StoreError>;

    /// Delete a peer. Returns false if absent.
    async fn delete_peer(&self, id: PeerId) -> Result<bool, StoreError>;

    /// Record the outcome of a sync attempt and stamp the peer's
    /// `last_sync_at`/`last_error`/`status` accordingly.
    async fn record_run(&self, run: SyncRun) -> Result<(), StoreError>;

    /// Recent sync runs, newest first, optionally for one peer.
    async fn list_runs(
        &self,
        peer: Option<PeerId>,
        limit: usize,
    ) -> Result<Vec<SyncRun>, StoreError>;
}
