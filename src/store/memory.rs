//! In-memory storage backend.
//!
//! Implements the same contract as the ScyllaDB store with BTreeMap
//! partitions, so clustering order (timeuuid ASC) is preserved. Used by
//! the test suite and for single-node local development.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::QueueResult;
use crate::shard::{CounterKey, Shard, ShardKind};
use crate::store::rows::{AuditLogRow, MessageData, QueueMessageRow, QueueRow};
use crate::store::traits::StorageBackend;
use crate::timeuuid::TimeOrdered;

type ShardFamilyKey = (String, String, ShardKind);
type PartitionKey = (ShardKind, String, String, i64);

#[derive(Default)]
struct MemInner {
    queues: BTreeMap<String, QueueRow>,
    shards: HashMap<ShardFamilyKey, BTreeMap<TimeOrdered, Shard>>,
    pointers: HashMap<PartitionKey, BTreeMap<TimeOrdered, QueueMessageRow>>,
    bodies: BTreeMap<TimeOrdered, MessageData>,
    counters: HashMap<CounterKey, i64>,
    audit: HashMap<Uuid, Vec<AuditLogRow>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row count of one pointer partition; test-support inspection.
    pub async fn pointer_rows(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
    ) -> usize {
        let inner = self.inner.read().await;
        inner
            .pointers
            .get(&(kind, queue.to_string(), region.to_string(), shard_id))
            .map(|p| p.len())
            .unwrap_or(0)
    }

    /// Distinct shard ids holding at least one row of the given kind;
    /// test-support inspection.
    pub async fn occupied_shards(&self, kind: ShardKind, queue: &str, region: &str) -> Vec<i64> {
        let inner = self.inner.read().await;
        let mut ids: Vec<i64> = inner
            .pointers
            .iter()
            .filter(|((k, q, r, _), rows)| {
                *k == kind && q == queue && r == region && !rows.is_empty()
            })
            .map(|((_, _, _, shard_id), _)| *shard_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    async fn insert_queue(&self, row: &QueueRow) -> QueueResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner.queues.insert(row.name.clone(), row.clone()).is_none())
    }

    async fn select_queue(&self, name: &str) -> QueueResult<Option<QueueRow>> {
        let inner = self.inner.read().await;
        Ok(inner.queues.get(name).cloned())
    }

    async fn select_queues(&self) -> QueueResult<Vec<QueueRow>> {
        let inner = self.inner.read().await;
        Ok(inner.queues.values().cloned().collect())
    }

    async fn delete_queue(&self, name: &str) -> QueueResult<()> {
        let mut inner = self.inner.write().await;
        inner.queues.remove(name);
        Ok(())
    }

    async fn insert_shard(&self, shard: &Shard) -> QueueResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .shards
            .entry((shard.queue.clone(), shard.region.clone(), shard.kind))
            .or_default()
            .insert(TimeOrdered(shard.pointer), shard.clone());
        Ok(())
    }

    async fn list_shards(
        &self,
        queue: &str,
        region: &str,
        kind: ShardKind,
    ) -> QueueResult<Vec<Shard>> {
        let inner = self.inner.read().await;
        Ok(inner
            .shards
            .get(&(queue.to_string(), region.to_string(), kind))
            .map(|family| family.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_shards(&self, queue: &str, region: &str) -> QueueResult<()> {
        let mut inner = self.inner.write().await;
        for kind in [ShardKind::Default, ShardKind::Inflight] {
            inner
                .shards
                .remove(&(queue.to_string(), region.to_string(), kind));
        }
        Ok(())
    }

    async fn insert_pointer(&self, kind: ShardKind, row: &QueueMessageRow) -> QueueResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .pointers
            .entry((kind, row.queue.clone(), row.region.clone(), row.shard_id))
            .or_default()
            .insert(TimeOrdered(row.queue_message_id), row.clone());
        Ok(())
    }

    async fn select_pointer(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
        queue_message_id: Uuid,
    ) -> QueueResult<Option<QueueMessageRow>> {
        let inner = self.inner.read().await;
        Ok(inner
            .pointers
            .get(&(kind, queue.to_string(), region.to_string(), shard_id))
            .and_then(|p| p.get(&TimeOrdered(queue_message_id)))
            .cloned())
    }

    async fn delete_pointer(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
        queue_message_id: Uuid,
    ) -> QueueResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(inner
            .pointers
            .get_mut(&(kind, queue.to_string(), region.to_string(), shard_id))
            .and_then(|p| p.remove(&TimeOrdered(queue_message_id)))
            .is_some())
    }

    async fn scan_pointers(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
        after: Option<Uuid>,
        limit: usize,
    ) -> QueueResult<Vec<QueueMessageRow>> {
        let inner = self.inner.read().await;
        let Some(partition) = inner
            .pointers
            .get(&(kind, queue.to_string(), region.to_string(), shard_id))
        else {
            return Ok(Vec::new());
        };
        let lower = match after {
            Some(cursor) => Bound::Excluded(TimeOrdered(cursor)),
            None => Bound::Unbounded,
        };
        Ok(partition
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn delete_pointers(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
    ) -> QueueResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .pointers
            .remove(&(kind, queue.to_string(), region.to_string(), shard_id));
        Ok(())
    }

    async fn insert_body(&self, body: &MessageData) -> QueueResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .bodies
            .insert(TimeOrdered(body.message_id), body.clone());
        Ok(())
    }

    async fn select_body(&self, message_id: Uuid) -> QueueResult<Option<MessageData>> {
        let inner = self.inner.read().await;
        Ok(inner.bodies.get(&TimeOrdered(message_id)).cloned())
    }

    async fn delete_body(&self, message_id: Uuid) -> QueueResult<()> {
        let mut inner = self.inner.write().await;
        inner.bodies.remove(&TimeOrdered(message_id));
        Ok(())
    }

    async fn scan_bodies(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> QueueResult<Vec<MessageData>> {
        let inner = self.inner.read().await;
        let lower = match after {
            Some(cursor) => Bound::Excluded(TimeOrdered(cursor)),
            None => Bound::Unbounded,
        };
        Ok(inner
            .bodies
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, body)| body.clone())
            .collect())
    }

    async fn add_counter(&self, key: &CounterKey, delta: i64) -> QueueResult<()> {
        let mut inner = self.inner.write().await;
        *inner.counters.entry(key.clone()).or_insert(0) += delta;
        Ok(())
    }

    async fn read_counter(&self, key: &CounterKey) -> QueueResult<i64> {
        let inner = self.inner.read().await;
        Ok(inner.counters.get(key).copied().unwrap_or(0))
    }

    async fn delete_counters(&self, queue: &str, region: &str) -> QueueResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .counters
            .retain(|key, _| !(key.queue == queue && key.region == region));
        Ok(())
    }

    async fn append_audit(&self, row: &AuditLogRow) -> QueueResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .audit
            .entry(row.message_id)
            .or_default()
            .push(row.clone());
        Ok(())
    }

    async fn select_audit(&self, message_id: Uuid) -> QueueResult<Vec<AuditLogRow>> {
        let inner = self.inner.read().await;
        let mut rows = inner
            .audit
            .get(&message_id)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|r| (r.recorded_at, r.action.as_str()));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeuuid;
    use bytes::Bytes;

    fn pointer(queue: &str, shard_id: i64, at_ms: i64) -> QueueMessageRow {
        let id = timeuuid::at_unix_millis(at_ms);
        QueueMessageRow {
            queue: queue.into(),
            region: "local".into(),
            shard_id,
            queue_message_id: id,
            message_id: id,
            queued_at: at_ms,
            inflight_at: None,
        }
    }

    #[tokio::test]
    async fn scan_returns_clustering_order_with_cursor() {
        let store = MemoryStore::new();
        // Inserted out of order on purpose.
        for ms in [3_000, 1_000, 2_000] {
            store
                .insert_pointer(ShardKind::Default, &pointer("q", 7, ms))
                .await
                .unwrap();
        }

        let page = store
            .scan_pointers(ShardKind::Default, "q", "local", 7, None, 2)
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].queued_at, 1_000);
        assert_eq!(page[1].queued_at, 2_000);

        let rest = store
            .scan_pointers(
                ShardKind::Default,
                "q",
                "local",
                7,
                Some(page[1].queue_message_id),
                10,
            )
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].queued_at, 3_000);
    }

    #[tokio::test]
    async fn delete_pointer_reports_presence() {
        let store = MemoryStore::new();
        let row = pointer("q", 1, 500);
        store
            .insert_pointer(ShardKind::Inflight, &row)
            .await
            .unwrap();
        assert!(
            store
                .delete_pointer(ShardKind::Inflight, "q", "local", 1, row.queue_message_id)
                .await
                .unwrap()
        );
        assert!(
            !store
                .delete_pointer(ShardKind::Inflight, "q", "local", 1, row.queue_message_id)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn bodies_round_trip() {
        let store = MemoryStore::new();
        let body = MessageData {
            message_id: timeuuid::now(),
            content_type: "text/plain".into(),
            data: Bytes::from_static(b"hi"),
        };
        store.insert_body(&body).await.unwrap();
        assert_eq!(store.select_body(body.message_id).await.unwrap(), Some(body.clone()));
        store.delete_body(body.message_id).await.unwrap();
        assert_eq!(store.select_body(body.message_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn counters_accumulate_and_tear_down() {
        let store = MemoryStore::new();
        let key = CounterKey {
            queue: "q".into(),
            region: "local".into(),
            kind: ShardKind::Default,
            shard_id: 9,
        };
        store.add_counter(&key, 3).await.unwrap();
        store.add_counter(&key, -1).await.unwrap();
        assert_eq!(store.read_counter(&key).await.unwrap(), 2);
        store.delete_counters("q", "local").await.unwrap();
        assert_eq!(store.read_counter(&key).await.unwrap(), 0);
    }
}
