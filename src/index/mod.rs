//! Search index (C5).
//!
//! The index holds a searchable projection of agent records, keyed by
//! `agent_id`. Writers go through [`writer::IndexWriter`], which provides
//! per-key ordering, backpressure, retry, and the repair log. Reads go
//! straight to the [`SearchIndex`] port.

pub mod memory;
pub mod writer;

use std::collections::BTreeMap;
use std::collections::HashSet;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

use crate::types::AgentCard;
use crate::types::AgentId;
use crate::types::AgentRecord;
use crate::types::PeerId;
use crate::types::PublisherId;
use crate::types::TenantId;

pub use memory::MemoryIndex;
pub use memory::MemoryRepairLog;
pub use writer::IndexWriter;
pub use writer::WriterConfig;

/// Index-level failure.
#[derive(Debug, Snafu)]
pub enum IndexError {
    /// The writer queue is full and the enqueue timeout elapsed.
    #[snafu(display("index queue saturated"))]
    Saturated,

    /// The writer is stopping and no longer accepts work.
    #[snafu(display("index writer is shut down"))]
    ShutDown,

    /// Applying an operation failed.
    #[snafu(display("index apply failed: {reason}"))]
    Apply {
        /// What the backend reported.
        reason: String,
    },
}

/// The indexed projection of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentView {
    /// Record id; the index key.
    pub agent_id: AgentId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Owning publisher.
    pub publisher_id: PublisherId,
    /// Publisher display name, for the `publisher` filter.
    pub publisher_name: String,
    /// Agent name.
    pub name: String,
    /// Card description.
    pub description: String,
    /// Deduplicated skill tags.
    pub tags: Vec<String>,
    /// Capability flags, known and unknown.
    pub capabilities: BTreeMap<String, bool>,
    /// Declared security scheme types.
    pub security_types: Vec<String>,
    /// Preferred transport.
    pub transport: String,
    /// Card version string of the indexed head.
    pub version: String,
    /// Visibility flag.
    pub public: bool,
    /// Set for federated entries.
    pub federated_from: Option<PeerId>,
    /// Recency key for result ordering.
    pub updated_at: DateTime<Utc>,
    /// Combined free text: name, description, skill text.
    pub text: String,
}

impl AgentView {
    /// Project a record plus its head card into the indexed shape.
    pub fn project(record: &AgentRecord, publisher_name: &str, card: &AgentCard) -> Self {
        Self {
            agent_id: record.id,
            tenant_id: record.tenant_id.clone(),
            publisher_id: record.publisher_id,
            publisher_name: publisher_name.to_string(),
            name: record.name.clone(),
            description: card.description.clone(),
            tags: card.all_tags(),
            capabilities: card.capabilities.as_flags(),
            security_types: card
                .security_schemes
                .iter()
                .map(|s| s.scheme_type.clone())
                .collect(),
            transport: card.interface.preferred_transport.clone(),
            version: card.version.clone(),
            public: record.public,
            federated_from: record.federated_from,
            updated_at: record.updated_at,
            text: card.full_text(),
        }
    }
}

/// One queued index mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexOp {
    /// Insert or replace the projection for an agent.
    Upsert(Box<AgentView>),
    /// Remove an agent from the index.
    Delete(AgentId),
}

impl IndexOp {
    /// The agent this operation touches; operations on the same agent are
    /// applied in FIFO order.
    pub fn agent_id(&self) -> AgentId {
        match self {
            IndexOp::Upsert(view) => view.agent_id,
            IndexOp::Delete(id) => *id,
        }
    }
}

/// Who may see which records in a search.
#[derive(Debug, Clone)]
pub enum SearchVisibility {
    /// Only public records, any tenant. The anonymous view.
    PublicOnly,
    /// Records of one tenant that are public or explicitly entitled, plus
    /// public records from other tenants.
    Tenant {
        /// The caller's tenant.
        tenant: TenantId,
        /// Resolved entitlement union for the caller.
        entitled: HashSet<AgentId>,
    },
}

/// A search request after authorization.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Free-text query; empty means filter-only.
    pub q: Option<String>,
    /// Require every listed tag.
    pub tags: Vec<String>,
    /// Restrict to one publisher display name.
    pub publisher: Option<String>,
    /// Restrict to one preferred transport.
    pub transport: Option<String>,
    /// Require every listed security scheme type.
    pub security: Vec<String>,
    /// Restrict by visibility flag.
    pub public: Option<bool>,
    /// Caller's visibility set.
    pub visibility: SearchVisibility,
    /// Offset into the ranked result list.
    pub skip: usize,
    /// Page size, already clamped.
    pub limit: usize,
}

/// One page of ranked results.
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// The matching projections for this page.
    pub items: Vec<AgentView>,
    /// Total matches across all pages.
    pub total: usize,
    /// Offset of the next page, when more results exist.
    pub next_skip: Option<usize>,
}

/// Document index port.
///
/// Implementations must apply `upsert`/`delete` idempotently by `agent_id`
/// and keep reads lock-free with respect to writers.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or replace a projection.
    async fn upsert(&self, view: AgentView) -> Result<(), IndexError>;

    /// Remove a projection; absent ids are a no-op.
    async fn delete(&self, agent_id: AgentId) -> Result<(), IndexError>;

    /// Ranked, visibility-filtered search.
    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, IndexError>;
}

/// Durable log of index operations that exhausted their retries.
///
/// A background reconciler drains it until the index accepts every entry.
#[async_trait]
pub trait RepairLog: Send + Sync {
    /// Append a failed operation.
    async fn append(&self, op: IndexOp);

    /// Remove and return up to `max` operations, oldest first.
    async fn drain(&self, max: usize) -> Vec<IndexOp>;

    /// Current backlog depth.
    async fn len(&self) -> usize;
}
