//! Application state wiring and component lifecycle.
//!
//! Services are wrapped in `Arc` for cheap cloning across request handlers.
//! Stateful components (index writer, federation manager) expose explicit
//! `start`/`stop` driven from here; nothing relies on process-wide
//! singletons.

use std::sync::Arc;

use crate::authz::AuthzGate;
use crate::authz::TokenVerifier;
use crate::cache::MemoryCache;
use crate::cache::ResponseCache;
use crate::card::CardFetcher;
use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::config::AppConfig;
use crate::context::RequestContext;
use crate::discovery::DiscoveryService;
use crate::entitlements::EntitlementService;
use crate::error::RegistryError;
use crate::error::Result;
use crate::federation::FederationManager;
use crate::federation::FederationSync;
use crate::index::IndexWriter;
use crate::index::MemoryIndex;
use crate::index::MemoryRepairLog;
use crate::index::WriterConfig;
use crate::limiter::RateLimiter;
use crate::publish::PublishConfig;
use crate::publish::PublishService;
use crate::store::MemoryAgentStore;
use crate::store::MemoryEntitlementStore;
use crate::store::MemoryPeerStore;
use crate::store::PeerStore;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<AppConfig>,
    /// Authorization gate.
    pub authz: Arc<AuthzGate>,
    /// Request rate limiter.
    pub limiter: Arc<RateLimiter>,
    /// Discovery service.
    pub discovery: Arc<DiscoveryService>,
    /// Publish service.
    pub publish: Arc<PublishService>,
    /// Entitlement service.
    pub entitlements: Arc<EntitlementService>,
    /// Federation manager.
    pub federation: Arc<FederationManager>,
    /// Peer persistence, for the admin surface.
    pub peers: Arc<dyn PeerStore>,
    /// Agent persistence, exposed for embedding callers.
    pub agents: Arc<dyn crate::store::AgentStore>,
    /// Response cache, exposed for embedding callers.
    pub cache: Arc<dyn ResponseCache>,
    /// Index writer, for lifecycle and the repair gauge.
    pub writer: Arc<IndexWriter>,
    /// Clock shared by every component.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Build a fully wired state over the in-memory adapters.
    ///
    /// This is the embedded deployment shape and the test harness; swapping
    /// in remote backends means constructing the same graph with different
    /// port implementations.
    pub fn in_memory(config: AppConfig, verifier: Arc<dyn TokenVerifier>) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::with_clock(config, verifier, clock)
    }

    /// [`in_memory`](Self::in_memory) with an explicit clock, for tests that
    /// drive time.
    pub fn with_clock(
        config: AppConfig,
        verifier: Arc<dyn TokenVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let agents = Arc::new(MemoryAgentStore::new(clock.clone()));
        let entitlement_store = Arc::new(MemoryEntitlementStore::new());
        let peer_store: Arc<dyn PeerStore> = Arc::new(MemoryPeerStore::new());
        let index = Arc::new(MemoryIndex::new());
        let cache: Arc<dyn ResponseCache> = Arc::new(MemoryCache::new());
        let fetcher = Arc::new(CardFetcher::new().map_err(|err| RegistryError::Internal {
            reason: format!("http client init failed: {err}"),
        })?);

        let writer = Arc::new(IndexWriter::new(
            index.clone(),
            Arc::new(MemoryRepairLog::new()),
            WriterConfig {
                enqueue_timeout: config.index.enqueue_timeout,
                ..WriterConfig::default()
            },
        ));

        let discovery = Arc::new(DiscoveryService::new(
            agents.clone(),
            entitlement_store.clone(),
            peer_store.clone(),
            index.clone(),
            cache.clone(),
            config.registry.clone(),
            config.cache_ttl.clone(),
        ));
        let publish = Arc::new(PublishService::new(
            fetcher.clone(),
            agents.clone(),
            writer.clone(),
            cache.clone(),
            PublishConfig {
                max_agents_per_publisher: config.limits.max_agents_per_publisher,
            },
        ));
        let entitlements = Arc::new(EntitlementService::new(
            agents.clone(),
            entitlement_store,
            cache.clone(),
            clock.clone(),
        ));
        let sync = Arc::new(FederationSync::new(
            fetcher,
            agents.clone(),
            peer_store.clone(),
            writer.clone(),
            cache.clone(),
            clock.clone(),
        ));
        let federation = Arc::new(FederationManager::new(
            peer_store.clone(),
            sync,
            config.federation.clone(),
        ));

        Ok(Self {
            authz: Arc::new(AuthzGate::new(verifier, clock.clone())),
            limiter: Arc::new(RateLimiter::new(config.rate_limits)),
            discovery,
            publish,
            entitlements,
            federation,
            peers: peer_store,
            agents,
            cache,
            writer,
            clock,
            config,
        })
    }

    /// Start background components: index workers and federation tickers.
    pub fn start(&self) {
        self.writer.start();
        self.federation.start();
    }

    /// Stop background components, draining accepted index work.
    pub async fn stop(&self) {
        self.federation.stop().await;
        self.writer.stop().await;
    }

    /// A fresh request context carrying the configured budget.
    pub fn ctx(&self) -> RequestContext {
        RequestContext::with_budget(self.config.limits.request_budget)
    }
}
