//! One synchronization pass against one peer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use tracing::info;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::cache::tenant_pattern;
use crate::cache::ResponseCache;
use crate::cache::WELL_KNOWN_PATTERN;
use crate::card::CardFetcher;
use crate::card::CardValidator;
use crate::card::RedirectMode;
use crate::clock::Clock;
use crate::context::RequestContext;
use crate::index::AgentView;
use crate::index::IndexOp;
use crate::index::IndexWriter;
use crate::publish::verify_card_signature;
use crate::store::AgentStore;
use crate::store::PeerStore;
use crate::store::UpsertVersion;
use crate::types::AgentRecord;
use crate::types::CardSource;
use crate::types::ContentHash;
use crate::types::PeerRegistry;
use crate::types::PeerStatus;
use crate::types::SyncOutcome;
use crate::types::SyncRun;
use crate::types::SyncTrigger;
use crate::types::TenantId;

// ============================================================================
// Constants (fixed limits)
// ============================================================================

/// Maximum index pages followed per sync.
const MAX_SYNC_PAGES: usize = 1000;

/// Wall-clock budget for one sync pass.
const SYNC_BUDGET: Duration = Duration::from_secs(300);

/// Error from a sync pass that produced no usable index.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The peer's well-known index could not be fetched.
    #[error("index fetch failed: {reason}")]
    IndexFetch {
        /// What failed.
        reason: String,
    },

    /// The peer's well-known index did not parse.
    #[error("index parse failed: {reason}")]
    IndexParse {
        /// What failed.
        reason: String,
    },
}

/// One advertised entry of a peer's well-known index.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteEntry {
    name: String,
    publisher: String,
    content_hash: ContentHash,
    card_url: String,
}

/// One page of a peer's well-known index.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteIndexPage {
    #[serde(default)]
    items: Vec<RemoteEntry>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Executes sync passes. Scheduling and collapse live in the manager.
pub struct FederationSync {
    fetcher: Arc<CardFetcher>,
    validator: CardValidator,
    agents: Arc<dyn AgentStore>,
    peers: Arc<dyn PeerStore>,
    writer: Arc<IndexWriter>,
    cache: Arc<dyn ResponseCache>,
    clock: Arc<dyn Clock>,
}

impl FederationSync {
    /// Wire the sync executor over its collaborators.
    pub fn new(
        fetcher: Arc<CardFetcher>,
        agents: Arc<dyn AgentStore>,
        peers: Arc<dyn PeerStore>,
        writer: Arc<IndexWriter>,
        cache: Arc<dyn ResponseCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fetcher,
            validator: CardValidator,
            agents,
            peers,
            writer,
            cache,
            clock,
        }
    }

    /// Run one sync pass against `peer` and persist its [`SyncRun`].
    ///
    /// Index-level failure is `error`; item-level failures make the run
    /// `partial`; a peer disabled between index read and apply yields
    /// `cancelled` with every result discarded.
    pub async fn sync_peer(&self, peer: &PeerRegistry, trigger: SyncTrigger) -> SyncRun {
        let started_at = self.clock.now();
        let ctx = RequestContext::with_budget(SYNC_BUDGET);
        info!(peer = %peer.name, ?trigger, "starting peer sync");

        let advertised = match self.fetch_index(&ctx, peer).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(peer = %peer.name, error = %err, "peer index unavailable");
                return self
                    .finish(
                        peer,
                        trigger,
                        started_at,
                        SyncOutcome::Error,
                        0,
                        0,
                        0,
                        Some(err.to_string()),
                    )
                    .await;
            }
        };

        // Advertised set R, keyed the way entries are stored locally.
        let mut remote: HashMap<String, RemoteEntry> = HashMap::new();
        for entry in advertised {
            remote.insert(format!("{}/{}", entry.publisher, entry.name), entry);
        }

        // Local federated set L for this peer, with head hashes.
        let local_records = match self.agents.list_federated(peer.id).await {
            Ok(records) => records,
            Err(err) => {
                return self
                    .finish(
                        peer,
                        trigger,
                        started_at,
                        SyncOutcome::Error,
                        0,
                        0,
                        0,
                        Some(err.to_string()),
                    )
                    .await;
            }
        };
        let mut local: HashMap<String, (AgentRecord, Option<ContentHash>)> = HashMap::new();
        for record in local_records {
            let hash = match self.agents.get_latest(record.id).await {
                Ok(version) => version.map(|v| v.content_hash),
                Err(_) => None,
            };
            local.insert(record.name.clone(), (record, hash));
        }

        // A disable racing the index read cancels the run: results are
        // discarded, only the run row remains.
        if self.peer_disabled(peer).await {
            info!(peer = %peer.name, "peer disabled mid-sync, discarding results");
            return self
                .finish(peer, trigger, started_at, SyncOutcome::Cancelled, 0, 0, 0, None)
                .await;
        }

        let tenant = TenantId::federation();
        let publisher_name = format!("peer:{}", peer.name);
        let mut added = 0u32;
        let mut updated = 0u32;
        let mut removed = 0u32;
        let mut item_errors: Vec<String> = Vec::new();

        for (key, entry) in &remote {
            let existing = local.get(key);
            let unchanged = matches!(
                existing,
                Some((record, Some(hash))) if !record.hidden && *hash == entry.content_hash
            );
            if unchanged {
                continue;
            }
            match self
                .apply_entry(&ctx, peer, &tenant, &publisher_name, key, entry)
                .await
            {
                Ok(()) => match existing {
                    Some((record, _)) if !record.hidden => updated += 1,
                    _ => added += 1,
                },
                Err(reason) => {
                    warn!(peer = %peer.name, agent = %key, reason, "federated entry skipped");
                    item_errors.push(format!("{key}: {reason}"));
                }
            }
        }

        // Retract what the peer no longer advertises.
        for (key, (record, _)) in &local {
            if remote.contains_key(key) || record.hidden {
                continue;
            }
            match self.agents.soft_delete(record.id).await {
                Ok(()) => {
                    let _ = self.writer.enqueue(IndexOp::Delete(record.id)).await;
                    removed += 1;
                }
                Err(err) => item_errors.push(format!("{key}: retraction failed: {err}")),
            }
        }

        if added + updated + removed > 0 {
            self.cache.del_pattern(&tenant_pattern(&tenant)).await;
            self.cache.del_pattern(WELL_KNOWN_PATTERN).await;
        }

        let outcome = if item_errors.is_empty() {
            SyncOutcome::Ok
        } else {
            SyncOutcome::Partial
        };
        let error = (!item_errors.is_empty()).then(|| item_errors.join("; "));
        self.finish(peer, trigger, started_at, outcome, added, updated, removed, error)
            .await
    }

    /// Walk the peer's well-known index until exhausted or [`MAX_SYNC_PAGES`].
    async fn fetch_index(
        &self,
        ctx: &RequestContext,
        peer: &PeerRegistry,
    ) -> Result<Vec<RemoteEntry>, SyncError> {
        let base = format!(
            "{}/.well-known/agents/index.json",
            peer.base_url.trim_end_matches('/')
        );
        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;

        for page_index in 0..MAX_SYNC_PAGES {
            let url_str = match &cursor {
                Some(cursor) => format!("{base}?cursor={cursor}"),
                None => base.clone(),
            };
            let url = Url::parse(&url_str).map_err(|_| SyncError::IndexFetch {
                reason: format!("invalid index url '{url_str}'"),
            })?;
            let budget = ctx.io_budget().map_err(|_| SyncError::IndexFetch {
                reason: "sync budget exhausted".to_string(),
            })?;
            let fetched = tokio::time::timeout(
                budget,
                self.fetcher
                    .fetch(&url, peer.auth_token.as_deref(), RedirectMode::SameHost),
            )
            .await
            .map_err(|_| SyncError::IndexFetch {
                reason: "index fetch timed out".to_string(),
            })?
            .map_err(|err| SyncError::IndexFetch {
                reason: err.to_string(),
            })?;

            let page: RemoteIndexPage =
                serde_json::from_slice(&fetched.bytes).map_err(|err| SyncError::IndexParse {
                    reason: err.to_string(),
                })?;
            debug!(peer = %peer.name, page_index, items = page.items.len(), "index page fetched");
            entries.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(entries)
    }

    /// Fetch, validate, upsert, and index one advertised card.
    async fn apply_entry(
        &self,
        ctx: &RequestContext,
        peer: &PeerRegistry,
        tenant: &TenantId,
        publisher_name: &str,
        local_name: &str,
        entry: &RemoteEntry,
    ) -> Result<(), String> {
        let url = Url::parse(&entry.card_url).map_err(|_| "invalid card url".to_string())?;
        let budget = ctx
            .io_budget()
            .map_err(|_| "sync budget exhausted".to_string())?;
        let fetched = tokio::time::timeout(
            budget,
            self.fetcher
                .fetch(&url, peer.auth_token.as_deref(), RedirectMode::SameHost),
        )
        .await
        .map_err(|_| "card fetch timed out".to_string())?
        .map_err(|err| format!("card fetch failed: {err}"))?;

        let raw: serde_json::Value = serde_json::from_slice(&fetched.bytes)
            .map_err(|_| "card is not valid JSON".to_string())?;
        let valid = self.validator.validate(&raw).map_err(|violations| {
            format!(
                "card invalid: {}",
                violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })?;

        // Signature verification is fatal for federated cards.
        if let Some(signature) = &valid.card.signature {
            verify_card_signature(&self.fetcher, ctx, signature)
                .await
                .map_err(|reason| format!("signature rejected: {reason}"))?;
        }

        let publisher = self
            .agents
            .resolve_publisher(tenant, publisher_name)
            .await
            .map_err(|err| err.to_string())?;
        let outcome = self
            .agents
            .upsert_version(UpsertVersion {
                tenant_id: tenant.clone(),
                publisher_id: publisher.id,
                name: local_name.to_string(),
                version: valid.card.version.clone(),
                card: valid.raw.clone(),
                content_hash: valid.content_hash,
                source: CardSource::Federated,
                source_url: Some(entry.card_url.clone()),
                public: true,
                federated_from: Some(peer.id),
            })
            .await
            .map_err(|err| err.to_string())?;

        let record = self
            .agents
            .get_record(outcome.agent_id)
            .await
            .map_err(|err| err.to_string())?
            .ok_or_else(|| "record vanished after upsert".to_string())?;
        let view = AgentView::project(&record, &publisher.display_name, &valid.card);
        self.writer
            .enqueue(IndexOp::Upsert(Box::new(view)))
            .await
            .map_err(|err| format!("index enqueue failed: {err}"))?;
        Ok(())
    }

    async fn peer_disabled(&self, peer: &PeerRegistry) -> bool {
        matches!(
            self.peers.get_peer(peer.id).await,
            Ok(Some(current)) if current.status == PeerStatus::Disabled
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        peer: &PeerRegistry,
        trigger: SyncTrigger,
        started_at: chrono::DateTime<chrono::Utc>,
        outcome: SyncOutcome,
        added: u32,
        updated: u32,
        removed: u32,
        error: Option<String>,
    ) -> SyncRun {
        let run = SyncRun {
            id: Uuid::new_v4(),
            peer_id: peer.id,
            trigger,
            started_at,
            finished_at: Some(self.clock.now()),
            outcome,
            added,
            updated,
            removed,
            error,
        };
        if let Err(err) = self.peers.record_run(run.clone()).await {
            warn!(peer = %peer.name, error = %err, "failed to persist sync run");
        }
        info!(
            peer = %peer.name,
            ?outcome,
            added,
            updated,
            removed,
            "peer sync finished"
        );
        run
    }
}
