//! Discovery surface (C6).
//!
//! Answers list, search, get, and well-known queries, applying the
//! visibility rule before anything leaves the service: a record is visible
//! when it is public, or when the caller shares its tenant and is entitled.
//! Invisible records are indistinguishable from absent ones.
//!
//! Read-heavy responses are cached per (endpoint, tenant, principal, params)
//! with the TTLs of `CacheTtlConfig`; writers invalidate by tenant pattern.

use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::cache::response_key;
use crate::cache::ResponseCache;
use crate::config::CacheTtlConfig;
use crate::config::RegistryInfo;
use crate::context::RequestContext;
use crate::error::RegistryError;
use crate::error::Result;
use crate::index::SearchIndex;
use crate::index::SearchQuery;
use crate::index::SearchVisibility;
use crate::store::AgentStore;
use crate::store::EntitlementStore;
use crate::store::PeerStore;
use crate::store::TenantListFilter;
use crate::types::AgentId;
use crate::types::AgentRecord;
use crate::types::ContentHash;
use crate::types::Cursor;
use crate::types::Page;
use crate::types::Principal;

/// One agent in a list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    /// Record id.
    pub id: AgentId,
    /// Agent name.
    pub name: String,
    /// Card description.
    pub description: String,
    /// Publisher display name.
    pub publisher: String,
    /// Head version string.
    pub version: String,
    /// Visibility flag.
    pub public: bool,
    /// Whether the entry was pulled from a peer registry.
    pub federated: bool,
    /// Last version-creating publish.
    pub updated_at: DateTime<Utc>,
}

/// Record plus head card, for `GET /agents/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDetail {
    /// Summary fields.
    #[serde(flatten)]
    pub summary: AgentSummary,
    /// The head card exactly as published.
    pub card: serde_json::Value,
}

/// A page of summaries with offset paging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    /// The page items, newest-updated first.
    pub items: Vec<AgentSummary>,
    /// Offset of the next page; absent when exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_skip: Option<usize>,
}

/// Canonical card bytes plus their hash, for `GET /agents/{id}/card`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalCard {
    /// Canonical JSON of the head card.
    pub canonical: String,
    /// SHA-256 over the canonical bytes.
    pub content_hash: ContentHash,
}

/// One entry of the well-known index, the shape peers federate over.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WellKnownEntry {
    /// Record id.
    pub id: AgentId,
    /// Agent name.
    pub name: String,
    /// Publisher display name.
    pub publisher: String,
    /// Head version string.
    pub version: String,
    /// Content hash of the head card.
    pub content_hash: ContentHash,
    /// Where to fetch the full card.
    pub card_url: String,
}

/// Stable registry metadata attached to well-known responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMetadata {
    /// Registry display name.
    pub name: String,
    /// Self-advertised base URL.
    pub base_url: String,
    /// Software version.
    pub version: String,
}

/// The paginated public index at `/.well-known/agents/index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WellKnownIndex {
    /// Registry metadata header.
    pub registry: RegistryMetadata,
    /// Public agents, newest-updated first.
    pub items: Vec<WellKnownEntry>,
    /// Opaque cursor for the next page; absent when exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Search parameters after authorization, before index translation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Free-text query.
    pub q: Option<String>,
    /// Require every listed tag.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Restrict to one publisher display name.
    pub publisher: Option<String>,
    /// Restrict to one preferred transport.
    pub transport: Option<String>,
    /// Require every listed security scheme type.
    #[serde(default)]
    pub security: Vec<String>,
    /// Restrict by visibility flag.
    pub public: Option<bool>,
    /// Offset into the ranked results.
    #[serde(default)]
    pub skip: usize,
    /// Requested page size, clamped by the service.
    pub top: Option<u32>,
}

/// A search response page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    /// Matching agents for this page, ranked.
    pub items: Vec<AgentSummary>,
    /// Offset of the next page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_skip: Option<usize>,
    /// Total matches.
    pub total: usize,
}

/// Registry statistics, for `GET /stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Visible agent records.
    pub agents_total: usize,
    /// Visible public records.
    pub agents_public: usize,
    /// Configured peer registries.
    pub peers: usize,
}

/// The discovery service.
pub struct DiscoveryService {
    agents: Arc<dyn AgentStore>,
    entitlements: Arc<dyn EntitlementStore>,
    peers: Arc<dyn PeerStore>,
    index: Arc<dyn SearchIndex>,
    cache: Arc<dyn ResponseCache>,
    registry: RegistryInfo,
    ttl: CacheTtlConfig,
}

impl DiscoveryService {
    /// Wire the service over its ports.
    pub fn new(
        agents: Arc<dyn AgentStore>,
        entitlements: Arc<dyn EntitlementStore>,
        peers: Arc<dyn PeerStore>,
        index: Arc<dyn SearchIndex>,
        cache: Arc<dyn ResponseCache>,
        registry: RegistryInfo,
        ttl: CacheTtlConfig,
    ) -> Self {
        Self {
            agents,
            entitlements,
            peers,
            index,
            cache,
            registry,
            ttl,
        }
    }

    /// Cross-tenant listing of public agents. May be called anonymously.
    pub async fn list_public(
        &self,
        ctx: &RequestContext,
        skip: usize,
        top: Option<u32>,
    ) -> Result<ListResponse> {
        ctx.check()?;
        let limit = crate::types::clamp_limit(top);
        let key = response_key("public", None, None, &format!("skip={skip}&top={limit}"));
        if let Some(hit) = self.cache_get(&key).await {
            return Ok(hit);
        }

        let page = self.agents.list_public(None, skip + limit + 1).await?;
        let fresh = self.offset_page(page, skip, limit).await?;
        self.cache_put(&key, &fresh, self.ttl.list).await;
        Ok(fresh)
    }

    /// Tenant-scoped listing: public-in-tenant plus entitled.
    pub async fn list_entitled(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        skip: usize,
        top: Option<u32>,
    ) -> Result<ListResponse> {
        ctx.check()?;
        let limit = crate::types::clamp_limit(top);
        let key = response_key(
            "entitled",
            Some(&principal.tenant),
            Some(&principal.id),
            &format!("skip={skip}&top={limit}"),
        );
        if let Some(hit) = self.cache_get(&key).await {
            return Ok(hit);
        }

        let entitled = self
            .entitlements
            .entitled_agents(&principal.tenant, &principal.entitlement_subjects())
            .await?;
        let page = self
            .agents
            .list_for_tenant(
                &principal.tenant,
                TenantListFilter {
                    entitled: Some(entitled),
                    ..TenantListFilter::default()
                },
                None,
                skip + limit + 1,
            )
            .await?;
        let fresh = self.offset_page(page, skip, limit).await?;
        self.cache_put(&key, &fresh, self.ttl.list).await;
        Ok(fresh)
    }

    /// Record plus head card, iff visible to the caller.
    pub async fn get_agent(
        &self,
        ctx: &RequestContext,
        principal: Option<&Principal>,
        id: AgentId,
    ) -> Result<AgentDetail> {
        ctx.check()?;
        let record = self.visible_record(principal, id).await?;
        let version = self
            .agents
            .get_latest(record.id)
            .await?
            .ok_or(RegistryError::NotFound)?;
        let summary = self.summarize(&record).await?;
        Ok(AgentDetail {
            summary,
            card: version.card,
        })
    }

    /// Canonical card bytes, iff visible to the caller.
    pub async fn get_card(
        &self,
        ctx: &RequestContext,
        principal: Option<&Principal>,
        id: AgentId,
    ) -> Result<CanonicalCard> {
        ctx.check()?;
        let cache_tenant = principal.map(|p| p.tenant.clone());
        let key = response_key(
            "card",
            cache_tenant.as_ref(),
            principal.map(|p| p.id.as_str()),
            &id.to_string(),
        );
        if let Some(hit) = self.cache_get(&key).await {
            return Ok(hit);
        }

        let record = self.visible_record(principal, id).await?;
        let version = self
            .agents
            .get_latest(record.id)
            .await?
            .ok_or(RegistryError::NotFound)?;
        let fresh = CanonicalCard {
            canonical: crate::card::canonical_json(&version.card),
            content_hash: version.content_hash,
        };
        self.cache_put(&key, &fresh, self.ttl.card).await;
        Ok(fresh)
    }

    /// The public card fetch behind the well-known surface: public agents
    /// only, never authenticated.
    pub async fn well_known_card(&self, ctx: &RequestContext, id: AgentId) -> Result<CanonicalCard> {
        self.get_card(ctx, None, id).await
    }

    /// Ranked search within the caller's visibility set.
    pub async fn search(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        params: SearchParams,
    ) -> Result<SearchResponse> {
        ctx.check()?;
        let limit = crate::types::clamp_limit(params.top);

        let cache_key = self.ttl.search_enabled.then(|| {
            let fingerprint = serde_json::to_string(&params).unwrap_or_default();
            response_key(
                "search",
                Some(&principal.tenant),
                Some(&principal.id),
                &fingerprint,
            )
        });
        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache_get(key).await {
                return Ok(hit);
            }
        }

        let entitled = self
            .entitlements
            .entitled_agents(&principal.tenant, &principal.entitlement_subjects())
            .await?;
        let query = SearchQuery {
            q: params.q,
            tags: params.tags,
            publisher: params.publisher,
            transport: params.transport,
            security: params.security,
            public: params.public,
            visibility: SearchVisibility::Tenant {
                tenant: principal.tenant.clone(),
                entitled,
            },
            skip: params.skip,
            limit,
        };
        let page = self
            .index
            .search(&query)
            .await
            .map_err(|err| RegistryError::Overloaded {
                reason: format!("search index unavailable: {err}"),
            })?;

        let mut items = Vec::with_capacity(page.items.len());
        for view in &page.items {
            items.push(AgentSummary {
                id: view.agent_id,
                name: view.name.clone(),
                description: view.description.clone(),
                publisher: view.publisher_name.clone(),
                version: view.version.clone(),
                public: view.public,
                federated: view.federated_from.is_some(),
                updated_at: view.updated_at,
            });
        }
        let fresh = SearchResponse {
            items,
            next_skip: page.next_skip,
            total: page.total,
        };
        if let Some(key) = cache_key {
            self.cache_put(&key, &fresh, self.ttl.search).await;
        }
        Ok(fresh)
    }

    /// The paginated public index peers federate over.
    pub async fn well_known_index(
        &self,
        ctx: &RequestContext,
        cursor: Option<String>,
        top: Option<u32>,
    ) -> Result<WellKnownIndex> {
        ctx.check()?;
        let limit = crate::types::clamp_limit(top);
        let params = format!("cursor={}&top={limit}", cursor.as_deref().unwrap_or(""));
        let key = response_key("well_known_index", None, None, &params);
        if let Some(hit) = self.cache_get(&key).await {
            return Ok(hit);
        }

        let cursor = cursor.as_deref().map(Cursor::decode).transpose()?;
        let page = self.agents.list_public(cursor, limit).await?;
        let mut items = Vec::with_capacity(page.items.len());
        for record in &page.items {
            let version = self
                .agents
                .get_latest(record.id)
                .await?
                .ok_or_else(|| RegistryError::Internal {
                    reason: format!("record {} has no head version", record.id),
                })?;
            let publisher = self.publisher_name(record).await?;
            items.push(WellKnownEntry {
                id: record.id,
                name: record.name.clone(),
                publisher,
                version: version.version.clone(),
                content_hash: version.content_hash,
                card_url: format!("{}/agents/{}/card", self.registry.base_url, record.id),
            });
        }
        let fresh = WellKnownIndex {
            registry: self.registry_metadata(),
            items,
            next_cursor: page.next_cursor,
        };
        self.cache_put(&key, &fresh, self.ttl.well_known).await;
        Ok(fresh)
    }

    /// The registry's own card, served at `/.well-known/agent.json`.
    pub fn registry_card(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.registry.name,
            "description": self.registry.description,
            "url": self.registry.base_url,
            "version": env!("CARGO_PKG_VERSION"),
            "capabilities": {},
            "securitySchemes": [
                {"type": "oauth2", "flow": "client_credentials",
                 "tokenUrl": format!("{}/oauth/token", self.registry.base_url)}
            ],
            "skills": [
                {"id": "agent-discovery",
                 "name": "Agent discovery",
                 "description": "List and search registered agents",
                 "tags": ["registry", "discovery"]}
            ],
            "interface": {
                "preferredTransport": "http",
                "defaultInputModes": ["application/json"],
                "defaultOutputModes": ["application/json"]
            }
        })
    }

    /// Visible record counts plus peer count.
    pub async fn stats(&self, ctx: &RequestContext) -> Result<RegistryStats> {
        ctx.check()?;
        let (agents_total, agents_public) = self.agents.count_agents().await?;
        let peers = self.peers.list_peers().await?.len();
        Ok(RegistryStats {
            agents_total,
            agents_public,
            peers,
        })
    }

    fn registry_metadata(&self) -> RegistryMetadata {
        RegistryMetadata {
            name: self.registry.name.clone(),
            base_url: self.registry.base_url.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Fetch a record and apply the visibility rule, folding every failure
    /// into `NotFound` so existence never leaks.
    async fn visible_record(
        &self,
        principal: Option<&Principal>,
        id: AgentId,
    ) -> Result<AgentRecord> {
        let record = self
            .agents
            .get_record(id)
            .await?
            .filter(|r| !r.hidden)
            .ok_or(RegistryError::NotFound)?;
        if record.public {
            return Ok(record);
        }
        let Some(principal) = principal else {
            debug!(agent_id = %id, "anonymous access to non-public agent");
            return Err(RegistryError::NotFound);
        };
        if principal.tenant != record.tenant_id {
            return Err(RegistryError::NotFound);
        }
        let entitled = self
            .entitlements
            .entitled_agents(&principal.tenant, &principal.entitlement_subjects())
            .await?;
        if entitled.contains(&record.id) {
            Ok(record)
        } else {
            Err(RegistryError::NotFound)
        }
    }

    async fn summarize(&self, record: &AgentRecord) -> Result<AgentSummary> {
        let version = self
            .agents
            .get_latest(record.id)
            .await?
            .ok_or_else(|| RegistryError::Internal {
                reason: format!("record {} has no head version", record.id),
            })?;
        let description = version
            .card
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let publisher = self.publisher_name(record).await?;
        Ok(AgentSummary {
            id: record.id,
            name: record.name.clone(),
            description,
            publisher,
            version: version.version.clone(),
            public: record.public,
            federated: record.federated_from.is_some(),
            updated_at: record.updated_at,
        })
    }

    async fn publisher_name(&self, record: &AgentRecord) -> Result<String> {
        Ok(self
            .agents
            .get_publisher(record.publisher_id)
            .await?
            .map(|p| p.display_name)
            .unwrap_or_default())
    }

    async fn offset_page(
        &self,
        page: Page<AgentRecord>,
        skip: usize,
        limit: usize,
    ) -> Result<ListResponse> {
        let fetched = page.items.len();
        let mut items = Vec::new();
        for record in page.items.into_iter().skip(skip).take(limit) {
            items.push(self.summarize(&record).await?);
        }
        let next_skip = (fetched > skip + limit).then_some(skip + limit);
        Ok(ListResponse { items, next_skip })
    }

    async fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.cache.get(key).await?;
        serde_json::from_slice(&bytes).ok()
    }

    async fn cache_put<T: Serialize>(&self, key: &str, value: &T, ttl: std::time::Duration) {
        if let Ok(bytes) = serde_json::to_vec(value) {
            self.cache.set(key, bytes, ttl).await;
        }
    }
}
