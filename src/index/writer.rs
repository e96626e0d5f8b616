//! Queued index writer with backpressure, retry, and repair.
//!
//! Mutations are routed to a fixed set of shard queues by `agent_id` hash,
//! giving per-key FIFO application under a bounded worker pool. Enqueue is
//! synchronous with a timeout: when every slot in the target shard stays
//! full past the timeout the caller gets `Saturated`, which the publish
//! pipeline maps to `Overloaded`.
//!
//! Operations that exhaust their retries are appended to the repair log; a
//! background reconciler replays them until the index accepts every entry.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::IndexError;
use super::IndexOp;
use super::RepairLog;
use super::SearchIndex;

// ============================================================================
// Constants (fixed limits)
// ============================================================================

/// First retry delay.
const RETRY_BASE: Duration = Duration::from_millis(200);

/// Retry delay ceiling.
const RETRY_CAP: Duration = Duration::from_secs(5);

/// Attempts before an operation is handed to the repair log.
const RETRY_ATTEMPTS: u32 = 5;

/// Operations replayed per reconciler pass.
const REPAIR_BATCH: usize = 256;

/// Writer tuning knobs.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Number of shard queues and workers.
    pub shards: usize,
    /// Queue depth per shard.
    pub queue_depth: usize,
    /// How long enqueue blocks before reporting saturation.
    pub enqueue_timeout: Duration,
    /// Delay between reconciler passes over the repair log.
    pub repair_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            shards: 4,
            queue_depth: 1024,
            enqueue_timeout: Duration::from_millis(500),
            repair_interval: Duration::from_secs(60),
        }
    }
}

/// Bounded, sharded writer in front of a [`SearchIndex`].
pub struct IndexWriter {
    index: Arc<dyn SearchIndex>,
    repair: Arc<dyn RepairLog>,
    config: WriterConfig,
    senders: Vec<mpsc::Sender<IndexOp>>,
    receivers: Mutex<Vec<mpsc::Receiver<IndexOp>>>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl IndexWriter {
    /// Build a writer over `index` with `repair` as the overflow path.
    ///
    /// Call [`start`](Self::start) before enqueueing.
    pub fn new(
        index: Arc<dyn SearchIndex>,
        repair: Arc<dyn RepairLog>,
        config: WriterConfig,
    ) -> Self {
        let shards = config.shards.max(1);
        let mut senders = Vec::with_capacity(shards);
        let mut receivers = Vec::with_capacity(shards);
        for _ in 0..shards {
            let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
            senders.push(tx);
            receivers.push(rx);
        }
        Self {
            index,
            repair,
            config,
            senders,
            receivers: Mutex::new(receivers),
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the shard workers and the repair reconciler.
    pub fn start(&self) {
        let mut receivers = self.receivers.lock();
        if receivers.is_empty() {
            return;
        }
        let mut handles = self.handles.lock();
        for (shard, rx) in receivers.drain(..).enumerate() {
            let index = Arc::clone(&self.index);
            let repair = Arc::clone(&self.repair);
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(shard_worker(shard, rx, index, repair, cancel)));
        }
        let index = Arc::clone(&self.index);
        let repair = Arc::clone(&self.repair);
        let cancel = self.cancel.clone();
        let interval = self.config.repair_interval;
        handles.push(tokio::spawn(reconciler(index, repair, interval, cancel)));
        info!(shards = self.senders.len(), "index writer started");
    }

    /// Stop accepting work and wait for in-flight operations to land.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Synchronously hand `op` to its shard queue.
    ///
    /// Blocks up to the configured enqueue timeout when the shard is full,
    /// then fails with [`IndexError::Saturated`].
    pub async fn enqueue(&self, op: IndexOp) -> Result<(), IndexError> {
        if self.cancel.is_cancelled() {
            return Err(IndexError::ShutDown);
        }
        let shard = shard_of(op.agent_id().0.as_bytes(), self.senders.len());
        match self.senders[shard]
            .send_timeout(op, self.config.enqueue_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(IndexError::Saturated),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(IndexError::ShutDown),
        }
    }

    /// Depth of the repair backlog, for the `index_repair_backlog` gauge.
    pub async fn repair_backlog(&self) -> usize {
        self.repair.len().await
    }
}

fn shard_of(key: &[u8], shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % shards
}

async fn shard_worker(
    shard: usize,
    mut rx: mpsc::Receiver<IndexOp>,
    index: Arc<dyn SearchIndex>,
    repair: Arc<dyn RepairLog>,
    cancel: CancellationToken,
) {
    loop {
        let op = tokio::select! {
            op = rx.recv() => match op {
                Some(op) => op,
                None => break,
            },
            _ = cancel.cancelled() => {
                // Drain what is already queued so accepted publishes land.
                while let Ok(op) = rx.try_recv() {
                    apply_with_retry(&index, &repair, op).await;
                }
                break;
            }
        };
        apply_with_retry(&index, &repair, op).await;
        debug!(shard, "index op applied");
    }
}

async fn apply_with_retry(
    index: &Arc<dyn SearchIndex>,
    repair: &Arc<dyn RepairLog>,
    op: IndexOp,
) {
    let mut delay = RETRY_BASE;
    for attempt in 1..=RETRY_ATTEMPTS {
        let result = match &op {
            IndexOp::Upsert(view) => index.upsert((**view).clone()).await,
            IndexOp::Delete(id) => index.delete(*id).await,
        };
        match result {
            Ok(()) => return,
            Err(err) if attempt == RETRY_ATTEMPTS => {
                warn!(
                    agent_id = %op.agent_id(),
                    error = %err,
                    "index op exhausted retries, writing to repair log"
                );
                repair.append(op).await;
                return;
            }
            Err(err) => {
                debug!(agent_id = %op.agent_id(), attempt, error = %err, "index op retry");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RETRY_CAP);
            }
        }
    }
}

async fn reconciler(
    index: Arc<dyn SearchIndex>,
    repair: Arc<dyn RepairLog>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }
        let backlog = repair.len().await;
        if backlog == 0 {
            continue;
        }
        info!(index_repair_backlog = backlog, "replaying repair log");
        for op in repair.drain(REPAIR_BATCH).await {
            let result = match &op {
                IndexOp::Upsert(view) => index.upsert((**view).clone()).await,
                IndexOp::Delete(id) => index.delete(*id).await,
            };
            if let Err(err) = result {
                warn!(agent_id = %op.agent_id(), error = %err, "repair replay failed");
                repair.append(op).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::index::MemoryRepairLog;
    use crate::index::SearchPage;
    use crate::index::SearchQuery;
    use crate::types::AgentId;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn test_config() -> WriterConfig {
        WriterConfig {
            shards: 2,
            queue_depth: 8,
            enqueue_timeout: Duration::from_millis(50),
            repair_interval: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_enqueued_deletes_apply() {
        let index = Arc::new(MemoryIndex::new());
        let writer = IndexWriter::new(
            index.clone(),
            Arc::new(MemoryRepairLog::new()),
            test_config(),
        );
        writer.start();

        writer.enqueue(IndexOp::Delete(AgentId::new())).await.unwrap();
        writer.stop().await;
        assert!(index.is_empty());
    }

    /// Index that always fails, to exercise the repair path.
    struct BrokenIndex {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl crate::index::SearchIndex for BrokenIndex {
        async fn upsert(&self, _view: crate::index::AgentView) -> Result<(), IndexError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(IndexError::Apply {
                reason: "broken".to_string(),
            })
        }

        async fn delete(&self, _agent_id: AgentId) -> Result<(), IndexError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(IndexError::Apply {
                reason: "broken".to_string(),
            })
        }

        async fn search(&self, _query: &SearchQuery) -> Result<SearchPage, IndexError> {
            Err(IndexError::Apply {
                reason: "broken".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_land_in_repair_log() {
        let index = Arc::new(BrokenIndex {
            attempts: AtomicUsize::new(0),
        });
        let repair = Arc::new(MemoryRepairLog::new());
        let writer = IndexWriter::new(index.clone(), repair.clone(), test_config());
        writer.start();

        writer.enqueue(IndexOp::Delete(AgentId::new())).await.unwrap();

        // Let the retry backoff schedule run out.
        for _ in 0..100 {
            tokio::time::advance(Duration::from_millis(500)).await;
            tokio::task::yield_now().await;
            if writer.repair_backlog().await > 0 {
                break;
            }
        }
        assert_eq!(writer.repair_backlog().await, 1);
        assert_eq!(index.attempts.load(Ordering::SeqCst), RETRY_ATTEMPTS as usize);
        writer.stop().await;
    }

    #[tokio::test]
    async fn test_saturation_reports_overload() {
        let index = Arc::new(MemoryIndex::new());
        let writer = IndexWriter::new(
            index,
            Arc::new(MemoryRepairLog::new()),
            WriterConfig {
                shards: 1,
                queue_depth: 1,
                enqueue_timeout: Duration::from_millis(10),
                repair_interval: Duration::from_secs(60),
            },
        );
        // Workers intentionally not started: the queue cannot drain.
        writer.enqueue(IndexOp::Delete(AgentId::new())).await.unwrap();
        let err = writer.enqueue(IndexOp::Delete(AgentId::new())).await;
        assert!(matches!(err, Err(IndexError::Saturated)));
    }

    #[test]
    fn test_shard_routing_is_stable() {
        let id = AgentId::new();
        let a = shard_of(id.0.as_bytes(), 4);
        let b = shard_of(id.0.as_bytes(), 4);
        assert_eq!(a, b);
        assert!(a < 4);
    }
}
