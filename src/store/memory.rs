//! In-memory store adapters.
//!
//! Suitable for embedded deployments and tests. Every mutation takes the
//! write lock, so concurrent publishes to the same record are linearized
//! exactly as a row-locked relational backend would do it.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::AgentStore;
use super::EntitlementStore;
use super::PeerStore;
use super::PeerUpdate;
use super::StoreError;
use super::TenantListFilter;
use super::UpsertOutcome;
use super::UpsertVersion;
use crate::clock::Clock;
use crate::types::AgentId;
use crate::types::AgentRecord;
use crate::types::AgentVersion;
use crate::types::CardSource;
use crate::types::Cursor;
use crate::types::Entitlement;
use crate::types::EntitlementSubject;
use crate::types::Page;
use crate::types::PeerId;
use crate::types::PeerRegistry;
use crate::types::PeerStatus;
use crate::types::Publisher;
use crate::types::PublisherId;
use crate::types::SyncOutcome;
use crate::types::SyncRun;
use crate::types::TenantId;
use crate::types::VersionId;

#[derive(Default)]
struct AgentStoreInner {
    publishers: HashMap<PublisherId, Publisher>,
    publisher_by_key: HashMap<(TenantId, String), PublisherId>,
    records: HashMap<AgentId, AgentRecord>,
    record_by_key: HashMap<(TenantId, PublisherId, String), AgentId>,
    versions: HashMap<VersionId, AgentVersion>,
    versions_by_agent: HashMap<AgentId, Vec<VersionId>>,
    version_by_hash: HashMap<(AgentId, [u8; 32]), VersionId>,
}

/// In-memory agent/version/publisher store.
pub struct MemoryAgentStore {
    inner: RwLock<AgentStoreInner>,
    clock: Arc<dyn Clock>,
}

impl MemoryAgentStore {
    /// Empty store using `clock` for timestamps.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(AgentStoreInner::default()),
            clock,
        }
    }
}

fn page_records(
    mut matched: Vec<AgentRecord>,
    cursor: Option<Cursor>,
    limit: usize,
) -> Page<AgentRecord> {
    matched.sort_by(|a, b| {
        (b.updated_at, b.id.0)
            .partial_cmp(&(a.updated_at, a.id.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let start_filtered: Vec<AgentRecord> = match cursor {
        Some(cursor) => matched
            .into_iter()
            .filter(|r| cursor.admits(r.updated_at, r.id.0))
            .collect(),
        None => matched,
    };
    let has_more = start_filtered.len() > limit;
    let items: Vec<AgentRecord> = start_filtered.into_iter().take(limit).collect();
    let next_cursor = if has_more {
        items.last().map(|last| {
            Cursor {
                updated_at: last.updated_at,
                id: last.id.0,
            }
            .encode()
        })
    } else {
        None
    };
    Page { items, next_cursor }
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
    async fn resolve_publisher(
        &self,
        tenant: &TenantId,
        display_name: &str,
    ) -> Result<Publisher, StoreError> {
        let mut inner = self.inner.write();
        let key = (tenant.clone(), display_name.to_string());
        if let Some(id) = inner.publisher_by_key.get(&key) {
            return Ok(inner.publishers[id].clone());
        }
        let publisher = Publisher {
            id: PublisherId::new(),
            tenant_id: tenant.clone(),
            display_name: display_name.to_string(),
            created_at: self.clock.now(),
        };
        inner.publisher_by_key.insert(key, publisher.id);
        inner.publishers.insert(publisher.id, publisher.clone());
        Ok(publisher)
    }

    async fn get_publisher(&self, id: PublisherId) -> Result<Option<Publisher>, StoreError> {
        Ok(self.inner.read().publishers.get(&id).cloned())
    }

    async fn upsert_version(&self, req: UpsertVersion) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.inner.write();
        if !inner.publishers.contains_key(&req.publisher_id) {
            return Err(StoreError::Backend {
                reason: "publisher does not exist".to_string(),
            });
        }

        let now = self.clock.now();
        let key = (
            req.tenant_id.clone(),
            req.publisher_id,
            req.name.clone(),
        );

        let agent_id = match inner.record_by_key.get(&key).copied() {
            Some(agent_id) => {
                let record = &inner.records[&agent_id];
                // Invariant: federated records are only replaced by sync.
                if record.federated_from.is_some() && req.source != CardSource::Federated {
                    return Err(StoreError::FederatedImmutable);
                }
                agent_id
            }
            None => AgentId::new(),
        };

        // Dedupe on identical canonical bytes: idempotent no-op.
        if let Some(existing) = inner
            .version_by_hash
            .get(&(agent_id, req.content_hash.0))
            .copied()
        {
            return Ok(UpsertOutcome {
                agent_id,
                version_id: existing,
                created: false,
            });
        }

        // `(agent_id, version)` is unique: same string, different bytes.
        if let Some(ids) = inner.versions_by_agent.get(&agent_id) {
            if ids
                .iter()
                .any(|id| inner.versions[id].version == req.version)
            {
                return Err(StoreError::VersionContentMismatch {
                    version: req.version,
                });
            }
        }

        let version = AgentVersion {
            id: VersionId::new(),
            agent_id,
            version: req.version,
            card: req.card,
            content_hash: req.content_hash,
            source: req.source,
            source_url: req.source_url,
            created_at: now,
        };

        match inner.records.get_mut(&agent_id) {
            Some(record) => {
                record.latest_version_id = version.id;
                record.public = req.public;
                record.updated_at = now;
                record.hidden = false;
                record.federated_from = req.federated_from;
            }
            None => {
                inner.record_by_key.insert(key, agent_id);
                inner.records.insert(
                    agent_id,
                    AgentRecord {
                        id: agent_id,
                        tenant_id: req.tenant_id,
                        publisher_id: req.publisher_id,
                        name: req.name,
                        latest_version_id: version.id,
                        public: req.public,
                        federated_from: req.federated_from,
                        hidden: false,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }

        inner
            .version_by_hash
            .insert((agent_id, version.content_hash.0), version.id);
        inner
            .versions_by_agent
            .entry(agent_id)
            .or_default()
            .push(version.id);
        let version_id = version.id;
        inner.versions.insert(version_id, version);

        Ok(UpsertOutcome {
            agent_id,
            version_id,
            created: true,
        })
    }

    async fn rollback_version(
        &self,
        agent_id: AgentId,
        version_id: VersionId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let Some(version) = inner.versions.remove(&version_id) else {
            return Err(StoreError::RowNotFound);
        };
        inner
            .version_by_hash
            .remove(&(agent_id, version.content_hash.0));
        if let Some(ids) = inner.versions_by_agent.get_mut(&agent_id) {
            ids.retain(|id| *id != version_id);
        }

        let remaining = inner
            .versions_by_agent
            .get(&agent_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        match remaining.last().copied() {
            Some(previous_head) => {
                let created_at = inner.versions[&previous_head].created_at;
                if let Some(record) = inner.records.get_mut(&agent_id) {
                    record.latest_version_id = previous_head;
                    record.updated_at = created_at;
                }
            }
            None => {
                if let Some(record) = inner.records.remove(&agent_id) {
                    inner.record_by_key.remove(&(
                        record.tenant_id,
                        record.publisher_id,
                        record.name,
                    ));
                }
                inner.versions_by_agent.remove(&agent_id);
            }
        }
        Ok(())
    }

    async fn get_record(&self, id: AgentId) -> Result<Option<AgentRecord>, StoreError> {
        Ok(self.inner.read().records.get(&id).cloned())
    }

    async fn get_by_name(
        &self,
        tenant: &TenantId,
        publisher: PublisherId,
        name: &str,
    ) -> Result<Option<AgentRecord>, StoreError> {
        let inner = self.inner.read();
        let key = (tenant.clone(), publisher, name.to_string());
        Ok(inner
            .record_by_key
            .get(&key)
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn get_version(&self, id: VersionId) -> Result<Option<AgentVersion>, StoreError> {
        Ok(self.inner.read().versions.get(&id).cloned())
    }

    async fn get_latest(&self, agent_id: AgentId) -> Result<Option<AgentVersion>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .records
            .get(&agent_id)
            .and_then(|record| inner.versions.get(&record.latest_version_id))
            .cloned())
    }

    async fn list_versions(&self, agent_id: AgentId) -> Result<Vec<AgentVersion>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .versions_by_agent
            .get(&agent_id)
            .map(|ids| ids.iter().map(|id| inner.versions[id].clone()).collect())
            .unwrap_or_default())
    }

    async fn list_public(
        &self,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<Page<AgentRecord>, StoreError> {
        let inner = self.inner.read();
        let matched: Vec<AgentRecord> = inner
            .records
            .values()
            .filter(|r| r.public && !r.hidden)
            .cloned()
            .collect();
        Ok(page_records(matched, cursor, limit))
    }

    async fn list_for_tenant(
        &self,
        tenant: &TenantId,
        filter: TenantListFilter,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Result<Page<AgentRecord>, StoreError> {
        let inner = self.inner.read();
        let matched: Vec<AgentRecord> = inner
            .records
            .values()
            .filter(|r| !r.hidden && &r.tenant_id == tenant)
            .filter(|r| filter.publisher.map_or(true, |p| r.publisher_id == p))
            .filter(|r| !filter.public_only || r.public)
            .filter(|r| match &filter.entitled {
                Some(entitled) => r.public || entitled.contains(&r.id),
                None => true,
            })
            .cloned()
            .collect();
        Ok(page_records(matched, cursor, limit))
    }

    async fn list_federated(&self, peer: PeerId) -> Result<Vec<AgentRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .records
            .values()
            .filter(|r| r.federated_from == Some(peer))
            .cloned()
            .collect())
    }

    async fn soft_delete(&self, agent_id: AgentId) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .get_mut(&agent_id)
            .ok_or(StoreError::RowNotFound)?;
        record.hidden = true;
        record.updated_at = self.clock.now();
        Ok(())
    }

    async fn count_for_publisher(&self, publisher: PublisherId) -> Result<usize, StoreError> {
        Ok(self
            .inner
            .read()
            .records
            .values()
            .filter(|r| r.publisher_id == publisher && !r.hidden)
            .count())
    }

    async fn count_agents(&self) -> Result<(usize, usize), StoreError> {
        let inner = self.inner.read();
        let total = inner.records.values().filter(|r| !r.hidden).count();
        let public = inner
            .records
            .values()
            .filter(|r| !r.hidden && r.public)
            .count();
        Ok((total, public))
    }
}

/// In-memory entitlement store.
#[derive(Default)]
pub struct MemoryEntitlementStore {
    grants: RwLock<Vec<Entitlement>>,
}

impl MemoryEntitlementStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn grant(
        &self,
        tenant: &TenantId,
        subject: EntitlementSubject,
        agent_id: AgentId,
        now: DateTime<Utc>,
    ) -> Result<Entitlement, StoreError> {
        let mut grants = self.grants.write();
        if let Some(active) = grants.iter().find(|e| {
            e.is_active()
                && &e.tenant_id == tenant
                && e.subject == subject
                && e.agent_id == agent_id
        }) {
            return Ok(active.clone());
        }
        let entitlement = Entitlement {
            id: Uuid::new_v4(),
            tenant_id: tenant.clone(),
            subject,
            agent_id,
            granted_at: now,
            revoked_at: None,
        };
        grants.push(entitlement.clone());
        Ok(entitlement)
    }

    async fn revoke(
        &self,
        tenant: &TenantId,
        subject: &EntitlementSubject,
        agent_id: AgentId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut grants = self.grants.write();
        let mut revoked = false;
        for grant in grants.iter_mut() {
            if grant.is_active()
                && &grant.tenant_id == tenant
                && &grant.subject == subject
                && grant.agent_id == agent_id
            {
                grant.revoked_at = Some(now);
                revoked = true;
            }
        }
        Ok(revoked)
    }

    async fn entitled_agents(
        &self,
        tenant: &TenantId,
        subjects: &[EntitlementSubject],
    ) -> Result<HashSet<AgentId>, StoreError> {
        let grants = self.grants.read();
        Ok(grants
            .iter()
            .filter(|e| e.is_active() && &e.tenant_id == tenant)
            .filter(|e| subjects.contains(&e.subject))
            .map(|e| e.agent_id)
            .collect())
    }

    async fn list_for_agent(&self, agent_id: AgentId) -> Result<Vec<Entitlement>, StoreError> {
        Ok(self
            .grants
            .read()
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct PeerStoreInner {
    peers: HashMap<PeerId, PeerRegistry>,
    runs: Vec<SyncRun>,
}

/// In-memory peer registry store.
#[derive(Default)]
pub struct MemoryPeerStore {
    inner: RwLock<PeerStoreInner>,
}

impl MemoryPeerStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PeerStore for MemoryPeerStore {
    async fn create_peer(&self, peer: PeerRegistry) -> Result<PeerRegistry, StoreError> {
        let mut inner = self.inner.write();
        if inner.peers.values().any(|p| p.name == peer.name) {
            return Err(StoreError::Conflict {
                reason: format!("peer name '{}' already exists", peer.name),
            });
        }
        inner.peers.insert(peer.id, peer.clone());
        Ok(peer)
    }

    async fn update_peer(
        &self,
        id: PeerId,
        update: PeerUpdate,
    ) -> Result<Option<PeerRegistry>, StoreError> {
        let mut inner = self.inner.write();
        let Some(peer) = inner.peers.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = update.name {
            peer.name = name;
        }
        if let Some(base_url) = update.base_url {
            peer.base_url = base_url;
        }
        if let Some(token) = update.auth_token {
            peer.auth_token = token;
        }
        if let Some(interval) = update.sync_interval_s {
            peer.sync_interval_s = interval;
        }
        if let Some(status) = update.status {
            peer.status = status;
            if status == PeerStatus::Active {
                peer.last_error = None;
            }
        }
        Ok(Some(peer.clone()))
    }

    async fn get_peer(&self, id: PeerId) -> Result<Option<PeerRegistry>, StoreError> {
        Ok(self.inner.read().peers.get(&id).cloned())
    }

    async fn list_peers(&self) -> Result<Vec<PeerRegistry>, StoreError> {
        let inner = self.inner.read();
        let mut peers: Vec<PeerRegistry> = inner.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(peers)
    }

    async fn delete_peer(&self, id: PeerId) -> Result<bool, StoreError> {
        Ok(self.inner.write().peers.remove(&id).is_some())
    }

    async fn record_run(&self, run: SyncRun) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(peer) = inner.peers.get_mut(&run.peer_id) {
            peer.last_sync_at = run.finished_at;
            match run.outcome {
                SyncOutcome::Ok | SyncOutcome::Partial => {
                    if peer.status == PeerStatus::Active {
                        peer.last_error = run.error.clone();
                    }
                }
                SyncOutcome::Error => {
                    if peer.status != PeerStatus::Disabled {
                        peer.status = PeerStatus::Error;
                        peer.last_error = run.error.clone();
                    }
                }
                SyncOutcome::Cancelled => {}
            }
        }
        inner.runs.push(run);
        Ok(())
    }

    async fn list_runs(
        &self,
        peer: Option<PeerId>,
        limit: usize,
    ) -> Result<Vec<SyncRun>, StoreError> {
        let inner = self.inner.read();
        let mut runs: Vec<SyncRun> = inner
            .runs
            .iter()
            .filter(|r| peer.map_or(true, |p| r.peer_id == p))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::content_hash;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn store() -> (MemoryAgentStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        (MemoryAgentStore::new(clock.clone()), clock)
    }

    fn upsert_req(
        tenant: &str,
        publisher: PublisherId,
        name: &str,
        version: &str,
        body: serde_json::Value,
    ) -> UpsertVersion {
        UpsertVersion {
            tenant_id: TenantId::new(tenant),
            publisher_id: publisher,
            name: name.to_string(),
            version: version.to_string(),
            content_hash: content_hash(&body),
            card: body,
            source: CardSource::ByValue,
            source_url: None,
            public: true,
            federated_from: None,
        }
    }

    #[tokio::test]
    async fn test_publish_same_bytes_twice_is_idempotent() {
        let (store, _) = store();
        let tenant = TenantId::new("t1");
        let publisher = store.resolve_publisher(&tenant, "acme").await.unwrap().id;

        let body = json!({"name": "x", "version": "1.0.0"});
        let first = store
            .upsert_version(upsert_req("t1", publisher, "x", "1.0.0", body.clone()))
            .await
            .unwrap();
        let second = store
            .upsert_version(upsert_req("t1", publisher, "x", "1.0.0", body))
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.agent_id, second.agent_id);
        assert_eq!(first.version_id, second.version_id);
        assert_eq!(store.list_versions(first.agent_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dedupe_does_not_bump_updated_at() {
        let (store, clock) = store();
        let tenant = TenantId::new("t1");
        let publisher = store.resolve_publisher(&tenant, "acme").await.unwrap().id;

        let body = json!({"name": "x"});
        let first = store
            .upsert_version(upsert_req("t1", publisher, "x", "1.0.0", body.clone()))
            .await
            .unwrap();
        let before = store.get_record(first.agent_id).await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(60));
        store
            .upsert_version(upsert_req("t1", publisher, "x", "1.0.0", body))
            .await
            .unwrap();
        let after = store.get_record(first.agent_id).await.unwrap().unwrap();
        assert_eq!(before.updated_at, after.updated_at);
    }

    #[tokio::test]
    async fn test_new_version_bumps_head() {
        let (store, clock) = store();
        let tenant = TenantId::new("t1");
        let publisher = store.resolve_publisher(&tenant, "acme").await.unwrap().id;

        let v1 = store
            .upsert_version(upsert_req(
                "t1",
                publisher,
                "x",
                "1.0.0",
                json!({"v": "1.0.0"}),
            ))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(5));
        let v2 = store
            .upsert_version(upsert_req(
                "t1",
                publisher,
                "x",
                "1.1.0",
                json!({"v": "1.1.0"}),
            ))
            .await
            .unwrap();

        assert_eq!(v1.agent_id, v2.agent_id);
        let latest = store.get_latest(v1.agent_id).await.unwrap().unwrap();
        assert_eq!(latest.version, "1.1.0");
        assert_eq!(store.list_versions(v1.agent_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_same_version_different_bytes_conflicts() {
        let (store, _) = store();
        let tenant = TenantId::new("t1");
        let publisher = store.resolve_publisher(&tenant, "acme").await.unwrap().id;

        store
            .upsert_version(upsert_req("t1", publisher, "x", "1.0.0", json!({"a": 1})))
            .await
            .unwrap();
        let err = store
            .upsert_version(upsert_req("t1", publisher, "x", "1.0.0", json!({"a": 2})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionContentMismatch { .. }));
    }

    #[tokio::test]
    async fn test_federated_record_refuses_local_publish() {
        let (store, _) = store();
        let tenant = TenantId::federation();
        let publisher = store
            .resolve_publisher(&tenant, "peer:other")
            .await
            .unwrap()
            .id;
        let peer = PeerId::new();

        let mut req = upsert_req(
            "federation",
            publisher,
            "remote-agent",
            "1.0.0",
            json!({"a": 1}),
        );
        req.source = CardSource::Federated;
        req.federated_from = Some(peer);
        store.upsert_version(req).await.unwrap();

        let err = store
            .upsert_version(upsert_req(
                "federation",
                publisher,
                "remote-agent",
                "2.0.0",
                json!({"a": 2}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::FederatedImmutable));
    }

    #[tokio::test]
    async fn test_rollback_first_version_removes_record() {
        let (store, _) = store();
        let tenant = TenantId::new("t1");
        let publisher = store.resolve_publisher(&tenant, "acme").await.unwrap().id;

        let outcome = store
            .upsert_version(upsert_req("t1", publisher, "x", "1.0.0", json!({"a": 1})))
            .await
            .unwrap();
        store
            .rollback_version(outcome.agent_id, outcome.version_id)
            .await
            .unwrap();
        assert!(store.get_record(outcome.agent_id).await.unwrap().is_none());
        assert!(store
            .get_by_name(&tenant, publisher, "x")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rollback_restores_previous_head() {
        let (store, clock) = store();
        let tenant = TenantId::new("t1");
        let publisher = store.resolve_publisher(&tenant, "acme").await.unwrap().id;

        let v1 = store
            .upsert_version(upsert_req("t1", publisher, "x", "1.0.0", json!({"a": 1})))
            .await
            .unwrap();
        clock.advance(chrono::Duration::seconds(5));
        let v2 = store
            .upsert_version(upsert_req("t1", publisher, "x", "1.1.0", json!({"a": 2})))
            .await
            .unwrap();

        store.rollback_version(v2.agent_id, v2.version_id).await.unwrap();
        let record = store.get_record(v1.agent_id).await.unwrap().unwrap();
        assert_eq!(record.latest_version_id, v1.version_id);
    }

    #[tokio::test]
    async fn test_cursor_pagination_is_stable() {
        let (store, clock) = store();
        let tenant = TenantId::new("t1");
        let publisher = store.resolve_publisher(&tenant, "acme").await.unwrap().id;

        for i in 0..5 {
            store
                .upsert_version(upsert_req(
                    "t1",
                    publisher,
                    &format!("agent-{i}"),
                    "1.0.0",
                    json!({"i": i}),
                ))
                .await
                .unwrap();
            clock.advance(chrono::Duration::seconds(1));
        }

        let first = store.list_public(None, 2).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.items[0].name, "agent-4");
        let cursor = Cursor::decode(first.next_cursor.as_deref().unwrap()).unwrap();
        let second = store.list_public(Some(cursor), 2).await.unwrap();
        assert_eq!(second.items[0].name, "agent-2");
        let cursor = Cursor::decode(second.next_cursor.as_deref().unwrap()).unwrap();
        let last = store.list_public(Some(cursor), 2).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(last.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_hides_everywhere() {
        let (store, _) = store();
        let tenant = TenantId::new("t1");
        let publisher = store.resolve_publisher(&tenant, "acme").await.unwrap().id;
        let outcome = store
            .upsert_version(upsert_req("t1", publisher, "x", "1.0.0", json!({"a": 1})))
            .await
            .unwrap();

        store.soft_delete(outcome.agent_id).await.unwrap();
        assert!(store.list_public(None, 10).await.unwrap().items.is_empty());
        assert_eq!(store.count_agents().await.unwrap(), (0, 0));
        // The record itself survives for version retrieval.
        assert!(store.get_record(outcome.agent_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_grant_revoke_grant_leaves_later_timestamp() {
        let store = MemoryEntitlementStore::new();
        let tenant = TenantId::new("t1");
        let subject = EntitlementSubject::Principal("alice".to_string());
        let agent = AgentId::new();
        let t0 = DateTime::from_timestamp(1_700_000_000, 0).unwrap();

        let first = store
            .grant(&tenant, subject.clone(), agent, t0)
            .await
            .unwrap();
        assert!(store.revoke(&tenant, &subject, agent, t0 + chrono::Duration::seconds(1)).await.unwrap());
        let second = store
            .grant(
                &tenant,
                subject.clone(),
                agent,
                t0 + chrono::Duration::seconds(2),
            )
            .await
            .unwrap();

        assert!(second.granted_at > first.granted_at);
        let entitled = store
            .entitled_agents(&tenant, &[subject])
            .await
            .unwrap();
        assert!(entitled.contains(&agent));
    }

    #[tokio::test]
    async fn test_entitlement_union_across_subjects() {
        let store = MemoryEntitlementStore::new();
        let tenant = TenantId::new("t1");
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let by_principal = AgentId::new();
        let by_role = AgentId::new();

        store
            .grant(
                &tenant,
                EntitlementSubject::Principal("alice".to_string()),
                by_principal,
                now,
            )
            .await
            .unwrap();
        store
            .grant(
                &tenant,
                EntitlementSubject::Role(crate::types::Role::User),
                by_role,
                now,
            )
            .await
            .unwrap();

        let entitled = store
            .entitled_agents(
                &tenant,
                &[
                    EntitlementSubject::Principal("alice".to_string()),
                    EntitlementSubject::Role(crate::types::Role::User),
                ],
            )
            .await
            .unwrap();
        assert_eq!(entitled.len(), 2);
        assert!(entitled.contains(&by_principal) && entitled.contains(&by_role));
    }
}
