//! Shard message counters.
//!
//! Counters are sizing hints, not authority: every pointer write adds
//! +1, every pointer delete −1, accumulated in memory and folded into
//! the persistent counter column periodically or when a key's pending
//! delta crosses the flush threshold. A crash loses at most the
//! unflushed deltas, which the shard strategy tolerates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::QueueResult;
use crate::shard::CounterKey;
use crate::store::StorageBackend;

pub struct ShardCounterCache {
    backend: Arc<dyn StorageBackend>,
    deltas: Mutex<HashMap<CounterKey, i64>>,
    flush_threshold: i64,
}

impl ShardCounterCache {
    pub fn new(backend: Arc<dyn StorageBackend>, flush_threshold: i64) -> Self {
        ShardCounterCache {
            backend,
            deltas: Mutex::new(HashMap::new()),
            flush_threshold: flush_threshold.max(1),
        }
    }

    /// Accumulate a delta for one shard. Crossing the flush threshold
    /// commits that key's pending delta inline.
    pub async fn add(&self, key: &CounterKey, delta: i64) {
        let to_commit = {
            let mut deltas = self.deltas.lock().expect("counter mutex poisoned");
            let pending = deltas.entry(key.clone()).or_insert(0);
            *pending += delta;
            if pending.abs() >= self.flush_threshold {
                deltas.remove(key)
            } else {
                None
            }
        };

        if let Some(delta) = to_commit {
            self.commit(key.clone(), delta).await;
        }
    }

    pub async fn increment(&self, key: &CounterKey) {
        self.add(key, 1).await;
    }

    pub async fn decrement(&self, key: &CounterKey) {
        self.add(key, -1).await;
    }

    /// Fold every pending delta into storage. Returns the number of
    /// keys committed.
    pub async fn flush(&self) -> usize {
        let drained: Vec<(CounterKey, i64)> = {
            let mut deltas = self.deltas.lock().expect("counter mutex poisoned");
            deltas.drain().filter(|(_, d)| *d != 0).collect()
        };
        let committed = drained.len();
        for (key, delta) in drained {
            self.commit(key, delta).await;
        }
        committed
    }

    /// Last-flushed value; pending deltas are not included.
    pub async fn count(&self, key: &CounterKey) -> QueueResult<i64> {
        self.backend.read_counter(key).await
    }

    /// Number of keys with an unflushed delta.
    pub fn pending_keys(&self) -> usize {
        self.deltas.lock().expect("counter mutex poisoned").len()
    }

    async fn commit(&self, key: CounterKey, delta: i64) {
        if let Err(err) = self.backend.add_counter(&key, delta).await {
            // Counter writes are skippable; put the delta back so the
            // next flush retries it.
            warn!(
                queue = %key.queue,
                region = %key.region,
                shard_id = key.shard_id,
                error = %err,
                "shard counter commit failed, delta re-queued"
            );
            let mut deltas = self.deltas.lock().expect("counter mutex poisoned");
            *deltas.entry(key).or_insert(0) += delta;
        }
    }
}

/// Periodic fold-and-commit loop; a final flush runs on cancellation.
pub fn spawn_flush_loop(
    cache: Arc<ShardCounterCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    cache.flush().await;
                    return;
                }
                _ = ticker.tick() => {}
            }
            let committed = cache.flush().await;
            if committed > 0 {
                debug!(keys = committed, "flushed shard counter deltas");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardKind;
    use crate::store::MemoryStore;

    fn key(shard_id: i64) -> CounterKey {
        CounterKey {
            queue: "q".into(),
            region: "local".into(),
            kind: ShardKind::Default,
            shard_id,
        }
    }

    #[tokio::test]
    async fn deltas_accumulate_until_flush() {
        let backend = Arc::new(MemoryStore::new());
        let cache = ShardCounterCache::new(backend.clone(), 1_000);

        cache.increment(&key(1)).await;
        cache.increment(&key(1)).await;
        cache.decrement(&key(1)).await;

        // Nothing committed yet.
        assert_eq!(cache.count(&key(1)).await.unwrap(), 0);
        assert_eq!(cache.pending_keys(), 1);

        assert_eq!(cache.flush().await, 1);
        assert_eq!(cache.count(&key(1)).await.unwrap(), 1);
        assert_eq!(cache.pending_keys(), 0);
    }

    #[tokio::test]
    async fn threshold_commits_inline() {
        let backend = Arc::new(MemoryStore::new());
        let cache = ShardCounterCache::new(backend.clone(), 3);

        for _ in 0..3 {
            cache.increment(&key(2)).await;
        }
        // Threshold reached: the delta is already durable.
        assert_eq!(cache.count(&key(2)).await.unwrap(), 3);
        assert_eq!(cache.pending_keys(), 0);
    }

    #[tokio::test]
    async fn zero_deltas_are_not_committed() {
        let backend = Arc::new(MemoryStore::new());
        let cache = ShardCounterCache::new(backend.clone(), 1_000);

        cache.increment(&key(3)).await;
        cache.decrement(&key(3)).await;
        assert_eq!(cache.flush().await, 0);
    }
}
