//! Shard selection.
//!
//! Pointers partition by the time-UUID timeline: a write lands in the
//! greatest shard whose pointer is at or before the message's own
//! time-UUID, so reads within a shard stay contiguous by time and
//! partitions stay bounded. Allocation under races is idempotent in
//! effect: two racing allocators may mint two shards and readers scan
//! both.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::QueueResult;
use crate::shard::{Shard, ShardCounterCache, ShardKind};
use crate::store::StorageBackend;
use crate::timeuuid;

pub struct ShardStrategy {
    backend: Arc<dyn StorageBackend>,
    counters: Arc<ShardCounterCache>,
    shard_max_size: i64,
}

impl ShardStrategy {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        counters: Arc<ShardCounterCache>,
        shard_max_size: i64,
    ) -> Self {
        ShardStrategy {
            backend,
            counters,
            shard_max_size: shard_max_size.max(1),
        }
    }

    /// Shard for a pointer write. Creates the initial shard when the
    /// family is empty and rolls over to a fresh shard when the head
    /// shard's counter exceeds the configured maximum.
    pub async fn select_shard(
        &self,
        queue: &str,
        region: &str,
        kind: ShardKind,
        time_uuid: Uuid,
    ) -> QueueResult<Shard> {
        let shards = self.backend.list_shards(queue, region, kind).await?;

        let Some(head) = shards.last() else {
            // First write for this family: seed a shard covering it.
            let shard = Shard::new(queue, region, kind, time_uuid);
            self.backend.insert_shard(&shard).await?;
            info!(
                queue,
                region,
                kind = kind.as_str(),
                shard_id = shard.shard_id,
                "created initial shard"
            );
            return Ok(shard);
        };

        // Greatest shard at or before the write's instant; writes older
        // than every shard clamp to the oldest.
        let chosen = shards
            .iter()
            .rev()
            .find(|s| timeuuid::cmp(&s.pointer, &time_uuid) != Ordering::Greater)
            .unwrap_or(&shards[0]);

        // Roll over only when the write lands past the head: older
        // shards are full by definition and stay where they are. The
        // new shard is anchored at the triggering write's instant so
        // that write (and every later one) resolves to it.
        if timeuuid::cmp(&time_uuid, &head.pointer) == Ordering::Greater {
            let count = self.counters.count(&chosen.counter_key()).await?;
            if count > self.shard_max_size {
                let fresh = Shard::new(queue, region, kind, time_uuid);
                self.backend.insert_shard(&fresh).await?;
                info!(
                    queue,
                    region,
                    kind = kind.as_str(),
                    shard_id = fresh.shard_id,
                    head_count = count,
                    "rolled over to a new shard"
                );
                return Ok(fresh);
            }
        }

        Ok(chosen.clone())
    }

    /// Shard a previously-written pointer lives in. Never allocates;
    /// `None` when the family has no shards at all.
    pub async fn locate_shard(
        &self,
        queue: &str,
        region: &str,
        kind: ShardKind,
        time_uuid: Uuid,
    ) -> QueueResult<Option<Shard>> {
        let shards = self.backend.list_shards(queue, region, kind).await?;
        if shards.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            shards
                .iter()
                .rev()
                .find(|s| timeuuid::cmp(&s.pointer, &time_uuid) != Ordering::Greater)
                .unwrap_or(&shards[0])
                .clone(),
        ))
    }

    /// All shards of one family, creation order.
    pub async fn list(
        &self,
        queue: &str,
        region: &str,
        kind: ShardKind,
    ) -> QueueResult<Vec<Shard>> {
        self.backend.list_shards(queue, region, kind).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::CounterKey;
    use crate::store::MemoryStore;

    fn strategy(backend: Arc<MemoryStore>, max: i64) -> ShardStrategy {
        let counters = Arc::new(ShardCounterCache::new(backend.clone(), 1));
        ShardStrategy::new(backend, counters, max)
    }

    #[tokio::test]
    async fn first_write_seeds_a_shard() {
        let backend = Arc::new(MemoryStore::new());
        let strategy = strategy(backend.clone(), 100);

        let id = timeuuid::at_unix_millis(10_000);
        let shard = strategy
            .select_shard("q", "local", ShardKind::Default, id)
            .await
            .unwrap();
        assert_eq!(shard.pointer, id);

        let listed = strategy.list("q", "local", ShardKind::Default).await.unwrap();
        assert_eq!(listed, vec![shard]);
    }

    #[tokio::test]
    async fn writes_pick_greatest_shard_at_or_before() {
        let backend = Arc::new(MemoryStore::new());
        let strategy = strategy(backend.clone(), 100);

        let s1 = Shard::new("q", "local", ShardKind::Default, timeuuid::at_unix_millis(1_000));
        let s2 = Shard::new("q", "local", ShardKind::Default, timeuuid::at_unix_millis(5_000));
        backend.insert_shard(&s1).await.unwrap();
        backend.insert_shard(&s2).await.unwrap();

        let mid = strategy
            .select_shard("q", "local", ShardKind::Default, timeuuid::at_unix_millis(3_000))
            .await
            .unwrap();
        assert_eq!(mid.shard_id, s1.shard_id);

        let late = strategy
            .select_shard("q", "local", ShardKind::Default, timeuuid::at_unix_millis(9_000))
            .await
            .unwrap();
        assert_eq!(late.shard_id, s2.shard_id);

        // Older than every shard clamps to the oldest.
        let early = strategy
            .locate_shard("q", "local", ShardKind::Default, timeuuid::at_unix_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(early.shard_id, s1.shard_id);
    }

    #[tokio::test]
    async fn full_head_rolls_over() {
        let backend = Arc::new(MemoryStore::new());
        let strategy = strategy(backend.clone(), 2);

        let head = Shard::new("q", "local", ShardKind::Default, timeuuid::at_unix_millis(1_000));
        backend.insert_shard(&head).await.unwrap();
        backend
            .add_counter(
                &CounterKey {
                    queue: "q".into(),
                    region: "local".into(),
                    kind: ShardKind::Default,
                    shard_id: head.shard_id,
                },
                3,
            )
            .await
            .unwrap();

        let chosen = strategy
            .select_shard("q", "local", ShardKind::Default, timeuuid::now())
            .await
            .unwrap();
        assert_ne!(chosen.shard_id, head.shard_id);
        assert_eq!(
            strategy.list("q", "local", ShardKind::Default).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn locate_never_allocates() {
        let backend = Arc::new(MemoryStore::new());
        let strategy = strategy(backend.clone(), 100);

        let found = strategy
            .locate_shard("q", "local", ShardKind::Inflight, timeuuid::now())
            .await
            .unwrap();
        assert!(found.is_none());
        assert!(strategy.list("q", "local", ShardKind::Inflight).await.unwrap().is_empty());
    }
}
