//! Federation scheduling: per-peer tickers, collapse, and the global cap.
//!
//! Every active peer gets its own jittered ticker. Manual triggers and
//! ticker fires funnel through the same per-peer gate: one sync in flight,
//! at most one queued, everything beyond that collapsed. A global semaphore
//! caps concurrent syncs across peers.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::sync::FederationSync;
use crate::config::FederationConfig;
use crate::error::RegistryError;
use crate::error::Result;
use crate::store::PeerStore;
use crate::types::PeerId;
use crate::types::PeerStatus;
use crate::types::SyncTrigger;

/// How often the supervisor reconciles tickers with the peer table.
const SUPERVISOR_TICK: Duration = Duration::from_secs(30);

/// Per-peer collapse gate: the lock is the in-flight slot, the flag is the
/// single queued slot.
#[derive(Default)]
struct PeerGate {
    running: tokio::sync::Mutex<()>,
    queued: AtomicBool,
}

struct ManagerInner {
    peers: Arc<dyn PeerStore>,
    sync: Arc<FederationSync>,
    config: FederationConfig,
    semaphore: Arc<Semaphore>,
    gates: Mutex<HashMap<PeerId, Arc<PeerGate>>>,
    tickers: Mutex<HashMap<PeerId, JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl ManagerInner {
    fn gate(&self, peer_id: PeerId) -> Arc<PeerGate> {
        self.gates.lock().entry(peer_id).or_default().clone()
    }

    /// Funnel one sync request through the collapse gate.
    fn request_sync(self: &Arc<Self>, peer_id: PeerId, trigger: SyncTrigger) {
        let gate = self.gate(peer_id);
        if gate.queued.swap(true, Ordering::AcqRel) {
            debug!(peer_id = %peer_id, "sync already queued, collapsing trigger");
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let gate = inner.gate(peer_id);
            let _running = gate.running.lock().await;
            gate.queued.store(false, Ordering::Release);
            if inner.cancel.is_cancelled() {
                return;
            }
            let Ok(_permit) = inner.semaphore.acquire().await else {
                return;
            };
            let peer = match inner.peers.get_peer(peer_id).await {
                Ok(Some(peer)) if peer.status != PeerStatus::Disabled => peer,
                Ok(_) => {
                    debug!(peer_id = %peer_id, "peer gone or disabled, skipping sync");
                    return;
                }
                Err(err) => {
                    warn!(peer_id = %peer_id, error = %err, "peer lookup failed");
                    return;
                }
            };
            inner.sync.sync_peer(&peer, trigger).await;
        });
    }

    /// Reconcile per-peer tickers with the current peer table.
    async fn reconcile_tickers(self: &Arc<Self>) {
        let peers = match self.peers.list_peers().await {
            Ok(peers) => peers,
            Err(err) => {
                warn!(error = %err, "peer listing failed, keeping current tickers");
                return;
            }
        };

        let mut tickers = self.tickers.lock();

        // Drop tickers for peers that vanished or were disabled.
        let live: HashMap<PeerId, PeerStatus> = peers.iter().map(|p| (p.id, p.status)).collect();
        tickers.retain(|peer_id, handle| {
            let keep = matches!(live.get(peer_id), Some(PeerStatus::Active));
            if !keep {
                handle.abort();
                debug!(peer_id = %peer_id, "peer ticker stopped");
            }
            keep
        });

        // Start tickers for newly active peers.
        for peer in peers {
            if peer.status != PeerStatus::Active || tickers.contains_key(&peer.id) {
                continue;
            }
            let interval = if peer.sync_interval_s > 0 {
                Duration::from_secs(peer.sync_interval_s)
            } else {
                self.config.default_sync_interval
            };
            let inner = Arc::clone(self);
            let peer_id = peer.id;
            let cancel = self.cancel.clone();
            tickers.insert(
                peer_id,
                tokio::spawn(async move {
                    loop {
                        // ±10% jitter so peers do not sync in lockstep.
                        let jitter = rand::rng().random_range(0.9..=1.1);
                        let delay = interval.mul_f64(jitter);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => break,
                        }
                        inner.request_sync(peer_id, SyncTrigger::Scheduled);
                    }
                }),
            );
            debug!(peer_id = %peer_id, interval_s = interval.as_secs(), "peer ticker started");
        }
    }
}

/// The federation manager lifecycle handle.
pub struct FederationManager {
    inner: Arc<ManagerInner>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl FederationManager {
    /// Wire the manager; nothing runs until [`start`](Self::start).
    pub fn new(
        peers: Arc<dyn PeerStore>,
        sync: Arc<FederationSync>,
        config: FederationConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_syncs.max(1)));
        Self {
            inner: Arc::new(ManagerInner {
                peers,
                sync,
                config,
                semaphore,
                gates: Mutex::new(HashMap::new()),
                tickers: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Spawn the supervisor loop. Idempotent; a no-op when federation is
    /// disabled by configuration.
    pub fn start(&self) {
        if !self.inner.config.enabled {
            info!("federation disabled by configuration");
            return;
        }
        let mut supervisor = self.supervisor.lock();
        if supervisor.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *supervisor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SUPERVISOR_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = inner.cancel.cancelled() => break,
                }
                inner.reconcile_tickers().await;
            }
        }));
        info!(
            max_parallel = self.inner.config.max_parallel_syncs,
            "federation manager started"
        );
    }

    /// Stop the supervisor and every ticker. In-flight syncs finish on
    /// their own; their results land via the peer store as usual.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
        let handles: Vec<JoinHandle<()>> = {
            let mut tickers = self.inner.tickers.lock();
            tickers.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.abort();
        }
    }

    /// Administrator-triggered immediate sync. Concurrent triggers for the
    /// same peer collapse to one in flight plus at most one queued.
    pub async fn trigger_sync(&self, peer_id: PeerId) -> Result<()> {
        let peer = self
            .inner
            .peers
            .get_peer(peer_id)
            .await?
            .ok_or(RegistryError::NotFound)?;
        if peer.status == PeerStatus::Disabled {
            return Err(RegistryError::forbidden("peer is disabled"));
        }
        self.inner.request_sync(peer_id, SyncTrigger::Manual);
        Ok(())
    }

    /// Force one ticker-reconciliation pass; used right after peer CRUD so
    /// a new peer does not wait a supervisor tick.
    pub async fn reconcile_now(&self) {
        if self.inner.config.enabled {
            self.inner.reconcile_tickers().await;
        }
    }
}
