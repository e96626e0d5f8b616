//! In-memory search index and repair log.

use std::collections::HashMap;
use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use parking_lot::RwLock;

use super::AgentView;
use super::IndexError;
use super::IndexOp;
use super::RepairLog;
use super::SearchIndex;
use super::SearchPage;
use super::SearchQuery;
use super::SearchVisibility;
use crate::types::AgentId;

/// Relevance weight of a term hit in the agent name.
const NAME_WEIGHT: u32 = 3;
/// Relevance weight of a term hit in the combined text.
const TEXT_WEIGHT: u32 = 1;

/// In-memory inverted-index stand-in: a scored linear scan over projections.
///
/// Adequate for embedded registries; the port allows swapping in a real
/// document index without touching callers.
#[derive(Default)]
pub struct MemoryIndex {
    views: RwLock<HashMap<AgentId, AgentView>>,
}

impl MemoryIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed agents.
    pub fn len(&self) -> usize {
        self.views.read().len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.views.read().is_empty()
    }
}

fn visible(view: &AgentView, visibility: &SearchVisibility) -> bool {
    match visibility {
        SearchVisibility::PublicOnly => view.public,
        SearchVisibility::Tenant { tenant, entitled } => {
            if view.public {
                return true;
            }
            &view.tenant_id == tenant && entitled.contains(&view.agent_id)
        }
    }
}

fn matches_filters(view: &AgentView, query: &SearchQuery) -> bool {
    if !query.tags.is_empty() {
        let has_all = query.tags.iter().all(|t| view.tags.iter().any(|v| v == t));
        if !has_all {
            return false;
        }
    }
    if let Some(publisher) = &query.publisher {
        if &view.publisher_name != publisher {
            return false;
        }
    }
    if let Some(transport) = &query.transport {
        if &view.transport != transport {
            return false;
        }
    }
    if !query.security.is_empty() {
        let has_all = query
            .security
            .iter()
            .all(|s| view.security_types.iter().any(|v| v == s));
        if !has_all {
            return false;
        }
    }
    if let Some(public) = query.public {
        if view.public != public {
            return false;
        }
    }
    true
}

fn score(view: &AgentView, terms: &[String]) -> u32 {
    let name = view.name.to_lowercase();
    let text = view.text.to_lowercase();
    let mut score = 0;
    for term in terms {
        if name.contains(term.as_str()) {
            score += NAME_WEIGHT;
        }
        if text.contains(term.as_str()) {
            score += TEXT_WEIGHT;
        }
    }
    score
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn upsert(&self, view: AgentView) -> Result<(), IndexError> {
        self.views.write().insert(view.agent_id, view);
        Ok(())
    }

    async fn delete(&self, agent_id: AgentId) -> Result<(), IndexError> {
        self.views.write().remove(&agent_id);
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchPage, IndexError> {
        let terms: Vec<String> = query
            .q
            .as_deref()
            .unwrap_or("")
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();

        let views = self.views.read();
        let mut scored: Vec<(u32, AgentView)> = views
            .values()
            .filter(|v| visible(v, &query.visibility))
            .filter(|v| matches_filters(v, query))
            .filter_map(|v| {
                if terms.is_empty() {
                    return Some((0, v.clone()));
                }
                let s = score(v, &terms);
                (s > 0).then(|| (s, v.clone()))
            })
            .collect();
        drop(views);

        // Relevance first, then recency, id as the stable tie-breaker.
        scored.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then(b.updated_at.cmp(&a.updated_at))
                .then(b.agent_id.cmp(&a.agent_id))
        });

        let total = scored.len();
        let items: Vec<AgentView> = scored
            .into_iter()
            .skip(query.skip)
            .take(query.limit)
            .map(|(_, v)| v)
            .collect();
        let consumed = query.skip + items.len();
        let next_skip = (consumed < total && !items.is_empty()).then_some(consumed);

        Ok(SearchPage {
            items,
            total,
            next_skip,
        })
    }
}

/// In-memory repair log.
///
/// The production deployment points this port at a durable queue; the
/// in-memory form still gives the reconciler loop the same contract.
#[derive(Default)]
pub struct MemoryRepairLog {
    ops: Mutex<VecDeque<IndexOp>>,
}

impl MemoryRepairLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepairLog for MemoryRepairLog {
    async fn append(&self, op: IndexOp) {
        self.ops.lock().push_back(op);
    }

    async fn drain(&self, max: usize) -> Vec<IndexOp> {
        let mut ops = self.ops.lock();
        let take = max.min(ops.len());
        ops.drain(..take).collect()
    }

    async fn len(&self) -> usize {
        self.ops.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PublisherId;
    use crate::types::TenantId;
    use chrono::DateTime;
    use std::collections::BTreeMap;
    use std::collections::HashSet;

    fn view(name: &str, tenant: &str, public: bool, tags: &[&str]) -> AgentView {
        AgentView {
            agent_id: AgentId::new(),
            tenant_id: TenantId::new(tenant),
            publisher_id: PublisherId::new(),
            publisher_name: "acme".to_string(),
            name: name.to_string(),
            description: format!("{name} helps with things"),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            capabilities: BTreeMap::new(),
            security_types: vec!["oauth2".to_string()],
            transport: "jsonrpc".to_string(),
            version: "1.0.0".to_string(),
            public,
            federated_from: None,
            updated_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            text: format!("{name} {}", tags.join(" ")),
        }
    }

    fn query(q: Option<&str>, visibility: SearchVisibility) -> SearchQuery {
        SearchQuery {
            q: q.map(str::to_string),
            tags: vec![],
            publisher: None,
            transport: None,
            security: vec![],
            public: None,
            visibility,
            skip: 0,
            limit: 20,
        }
    }

    #[tokio::test]
    async fn test_text_search_matches_tags() {
        let index = MemoryIndex::new();
        index
            .upsert(view("recipe-agent", "t1", true, &["cooking"]))
            .await
            .unwrap();
        index
            .upsert(view("route-agent", "t1", true, &["maps"]))
            .await
            .unwrap();

        let page = index
            .search(&query(Some("cooking"), SearchVisibility::PublicOnly))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].name, "recipe-agent");
    }

    #[tokio::test]
    async fn test_private_records_hidden_from_public_view() {
        let index = MemoryIndex::new();
        let private = view("secret-agent", "t1", false, &["ops"]);
        let private_id = private.agent_id;
        index.upsert(private).await.unwrap();

        let anonymous = index
            .search(&query(None, SearchVisibility::PublicOnly))
            .await
            .unwrap();
        assert_eq!(anonymous.total, 0);

        let wrong_tenant = index
            .search(&query(
                None,
                SearchVisibility::Tenant {
                    tenant: TenantId::new("t2"),
                    entitled: HashSet::from([private_id]),
                },
            ))
            .await
            .unwrap();
        assert_eq!(wrong_tenant.total, 0);

        let entitled = index
            .search(&query(
                None,
                SearchVisibility::Tenant {
                    tenant: TenantId::new("t1"),
                    entitled: HashSet::from([private_id]),
                },
            ))
            .await
            .unwrap();
        assert_eq!(entitled.total, 1);
    }

    #[tokio::test]
    async fn test_filters_compose() {
        let index = MemoryIndex::new();
        index
            .upsert(view("a", "t1", true, &["cooking", "search"]))
            .await
            .unwrap();
        index
            .upsert(view("b", "t1", true, &["cooking"]))
            .await
            .unwrap();

        let mut q = query(None, SearchVisibility::PublicOnly);
        q.tags = vec!["cooking".to_string(), "search".to_string()];
        let page = index.search(&q).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].name, "a");

        let mut q = query(None, SearchVisibility::PublicOnly);
        q.transport = Some("grpc".to_string());
        assert_eq!(index.search(&q).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_agent_id() {
        let index = MemoryIndex::new();
        let mut v = view("a", "t1", true, &["x"]);
        index.upsert(v.clone()).await.unwrap();
        v.description = "updated".to_string();
        index.upsert(v.clone()).await.unwrap();
        assert_eq!(index.len(), 1);

        index.delete(v.agent_id).await.unwrap();
        index.delete(v.agent_id).await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_pagination_reports_next_skip() {
        let index = MemoryIndex::new();
        for i in 0..5 {
            index
                .upsert(view(&format!("agent-{i}"), "t1", true, &["x"]))
                .await
                .unwrap();
        }
        let mut q = query(None, SearchVisibility::PublicOnly);
        q.limit = 2;
        let page = index.search(&q).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.total, 5);
        assert_eq!(page.next_skip, Some(2));

        q.skip = 4;
        let page = index.search(&q).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_skip, None);
    }

    #[tokio::test]
    async fn test_repair_log_drains_fifo() {
        let log = MemoryRepairLog::new();
        let a = AgentId::new();
        let b = AgentId::new();
        log.append(IndexOp::Delete(a)).await;
        log.append(IndexOp::Delete(b)).await;
        assert_eq!(log.len().await, 2);

        let drained = log.drain(1).await;
        assert_eq!(drained, vec![IndexOp::Delete(a)]);
        assert_eq!(log.len().await, 1);
    }
}
