//! Peer registries and synchronization runs.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Surrogate id of a peer registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Mint a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Peer lifecycle state.
///
/// ```text
/// [active] --tick--> syncing --ok/partial--> [active]
///                       |--error--> [error] --manual reset--> [active]
/// [active|error] --disable--> [disabled] --enable--> [active]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    /// Eligible for scheduled and manual sync.
    Active,
    /// Excluded from sync until re-enabled.
    Disabled,
    /// Last sync failed at the index level; manual reset required.
    Error,
}

/// A remote registry this one pulls federated agents from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRegistry {
    /// Surrogate id.
    pub id: PeerId,
    /// Short name; federated entries land under publisher `peer:{name}`.
    pub name: String,
    /// Root URL; the well-known index lives below it.
    pub base_url: String,
    /// Opaque bearer token sent on index and card fetches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Seconds between scheduled pulls.
    pub sync_interval_s: u64,
    /// When the last sync finished, regardless of outcome.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Resume cursor from the last index walk, if the peer supplied one.
    pub last_cursor: Option<String>,
    /// Lifecycle state.
    pub status: PeerStatus,
    /// Error message from the last failed sync.
    pub last_error: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// What initiated a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// The per-peer ticker fired.
    Scheduled,
    /// An administrator requested an immediate sync.
    Manual,
}

/// Result of one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The local federated set now mirrors the peer's advertised set.
    Ok,
    /// The index walk succeeded but one or more items failed.
    Partial,
    /// The index itself could not be fetched or parsed.
    Error,
    /// The peer was disabled mid-sync; results were discarded.
    Cancelled,
}

/// Append-only record of one synchronization attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    /// Surrogate id.
    pub id: Uuid,
    /// The peer that was synced.
    pub peer_id: PeerId,
    /// What initiated the run.
    pub trigger: SyncTrigger,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Finish time; absent only while in flight.
    pub finished_at: Option<DateTime<Utc>>,
    /// How the run ended.
    pub outcome: SyncOutcome,
    /// Agents created locally.
    pub added: u32,
    /// Agents whose content hash changed.
    pub updated: u32,
    /// Agents retracted because the peer no longer advertises them.
    pub removed: u32,
    /// Error detail for `error` and `partial` outcomes.
    pub error: Option<String>,
}
