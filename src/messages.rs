//! Pointer and body persistence.
//!
//! `MessageSerialization` is the only writer of pointer rows: it
//! resolves the target shard through the strategy, keeps the shard
//! counters in step with row inserts/deletes, and exposes the paginated
//! scans the actor and reaper drive. Missing rows are `None`, never
//! errors.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};
use crate::shard::{Shard, ShardCounterCache, ShardKind, ShardStrategy};
use crate::store::{MessageData, QueueMessageRow, StorageBackend};
use crate::timeuuid;

/// A pointer write before shard resolution.
#[derive(Debug, Clone)]
pub struct PointerWrite {
    pub queue: String,
    pub region: String,
    /// Resolved through the shard strategy when absent.
    pub shard_id: Option<i64>,
    pub queue_message_id: Uuid,
    pub message_id: Uuid,
    pub queued_at: i64,
    pub inflight_at: Option<i64>,
}

pub struct MessageSerialization {
    backend: Arc<dyn StorageBackend>,
    strategy: Arc<ShardStrategy>,
    counters: Arc<ShardCounterCache>,
}

impl MessageSerialization {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        strategy: Arc<ShardStrategy>,
        counters: Arc<ShardCounterCache>,
    ) -> Self {
        MessageSerialization {
            backend,
            strategy,
            counters,
        }
    }

    /// Insert a pointer row and bump its shard counter.
    pub async fn write_message(
        &self,
        kind: ShardKind,
        write: PointerWrite,
    ) -> QueueResult<QueueMessageRow> {
        let shard_id = match write.shard_id {
            Some(shard_id) => shard_id,
            None => {
                self.strategy
                    .select_shard(&write.queue, &write.region, kind, write.queue_message_id)
                    .await?
                    .shard_id
            }
        };

        let row = QueueMessageRow {
            queue: write.queue,
            region: write.region,
            shard_id,
            queue_message_id: write.queue_message_id,
            message_id: write.message_id,
            queued_at: write.queued_at,
            inflight_at: write.inflight_at,
        };
        self.backend.insert_pointer(kind, &row).await?;

        let key = crate::shard::CounterKey {
            queue: row.queue.clone(),
            region: row.region.clone(),
            kind,
            shard_id,
        };
        self.counters.increment(&key).await;
        Ok(row)
    }

    /// Point-read one pointer; resolves the shard when not given.
    pub async fn load_message(
        &self,
        queue: &str,
        region: &str,
        shard_id: Option<i64>,
        kind: ShardKind,
        queue_message_id: Uuid,
    ) -> QueueResult<Option<QueueMessageRow>> {
        let shard_id = match shard_id {
            Some(shard_id) => shard_id,
            None => {
                match self
                    .strategy
                    .locate_shard(queue, region, kind, queue_message_id)
                    .await?
                {
                    Some(shard) => shard.shard_id,
                    None => return Ok(None),
                }
            }
        };
        self.backend
            .select_pointer(kind, queue, region, shard_id, queue_message_id)
            .await
    }

    /// Delete one pointer; decrements the shard counter only when a
    /// row was actually removed. Returns whether it was.
    pub async fn delete_message(
        &self,
        queue: &str,
        region: &str,
        shard_id: Option<i64>,
        kind: ShardKind,
        queue_message_id: Uuid,
    ) -> QueueResult<bool> {
        let shard_id = match shard_id {
            Some(shard_id) => shard_id,
            None => {
                match self
                    .strategy
                    .locate_shard(queue, region, kind, queue_message_id)
                    .await?
                {
                    Some(shard) => shard.shard_id,
                    None => return Ok(false),
                }
            }
        };
        let deleted = self
            .backend
            .delete_pointer(kind, queue, region, shard_id, queue_message_id)
            .await?;
        if deleted {
            let key = crate::shard::CounterKey {
                queue: queue.to_string(),
                region: region.to_string(),
                kind,
                shard_id,
            };
            self.counters.decrement(&key).await;
        }
        Ok(deleted)
    }

    /// Upsert a message body. The id must be a time-UUID; body age for
    /// garbage collection derives from it.
    pub async fn write_message_data(&self, body: &MessageData) -> QueueResult<()> {
        if !timeuuid::is_time_uuid(&body.message_id) {
            return Err(QueueError::BadRequest(format!(
                "message id {} is not a time-UUID",
                body.message_id
            )));
        }
        self.backend.insert_body(body).await
    }

    pub async fn load_message_data(&self, message_id: Uuid) -> QueueResult<Option<MessageData>> {
        self.backend.select_body(message_id).await
    }

    pub async fn delete_message_data(&self, message_id: Uuid) -> QueueResult<()> {
        self.backend.delete_body(message_id).await
    }

    /// Up to `max` pointers currently visible in the available family,
    /// walking shards in timeline order. Within a shard the clustering
    /// order means the first future-stamped pointer ends that shard;
    /// later shards are still walked, since a delay-stamped pointer in
    /// an old shard must not starve newer shards.
    pub async fn scan_visible_available(
        &self,
        queue: &str,
        region: &str,
        now_ms: i64,
        max: usize,
        page: usize,
    ) -> QueueResult<Vec<QueueMessageRow>> {
        let mut out = Vec::with_capacity(max.min(64));
        let shards = self
            .strategy
            .list(queue, region, ShardKind::Default)
            .await?;

        'shards: for shard in shards {
            let mut cursor: Option<Uuid> = None;
            'pages: loop {
                let batch = self
                    .backend
                    .scan_pointers(
                        ShardKind::Default,
                        queue,
                        region,
                        shard.shard_id,
                        cursor,
                        page,
                    )
                    .await?;
                if batch.is_empty() {
                    break;
                }
                cursor = batch.last().map(|r| r.queue_message_id);
                for row in batch {
                    let visible_at = timeuuid::unix_millis(&row.queue_message_id)
                        .unwrap_or(row.queued_at);
                    if visible_at > now_ms {
                        break 'pages;
                    }
                    out.push(row);
                    if out.len() >= max {
                        break 'shards;
                    }
                }
            }
        }
        Ok(out)
    }

    /// Shards of one family, for sweep-style callers.
    pub async fn shards(
        &self,
        queue: &str,
        region: &str,
        kind: ShardKind,
    ) -> QueueResult<Vec<Shard>> {
        self.strategy.list(queue, region, kind).await
    }

    /// Raw page of one shard partition.
    pub async fn scan_shard(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
        after: Option<Uuid>,
        limit: usize,
    ) -> QueueResult<Vec<QueueMessageRow>> {
        self.backend
            .scan_pointers(kind, queue, region, shard_id, after, limit)
            .await
    }

    /// Drop every shard, pointer and counter row the queue holds in one
    /// region. Bodies are left to the garbage collector.
    pub async fn purge_region(&self, queue: &str, region: &str) -> QueueResult<()> {
        for kind in [ShardKind::Default, ShardKind::Inflight] {
            for shard in self.strategy.list(queue, region, kind).await? {
                if let Err(err) = self
                    .backend
                    .delete_pointers(kind, queue, region, shard.shard_id)
                    .await
                {
                    warn!(
                        queue,
                        region,
                        shard_id = shard.shard_id,
                        error = %err,
                        "failed to drop pointer partition during teardown"
                    );
                }
            }
        }
        self.backend.delete_shards(queue, region).await?;
        self.backend.delete_counters(queue, region).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use bytes::Bytes;

    fn fixture() -> (Arc<MemoryStore>, MessageSerialization) {
        let backend = Arc::new(MemoryStore::new());
        let counters = Arc::new(ShardCounterCache::new(backend.clone(), 1));
        let strategy = Arc::new(ShardStrategy::new(
            backend.clone(),
            counters.clone(),
            100_000,
        ));
        let messages = MessageSerialization::new(backend.clone(), strategy, counters);
        (backend, messages)
    }

    fn write_at(ms: i64) -> PointerWrite {
        let id = timeuuid::at_unix_millis(ms);
        PointerWrite {
            queue: "q".into(),
            region: "local".into(),
            shard_id: None,
            queue_message_id: id,
            message_id: id,
            queued_at: ms,
            inflight_at: None,
        }
    }

    #[tokio::test]
    async fn write_load_delete_round_trip() {
        let (_backend, messages) = fixture();
        let row = messages
            .write_message(ShardKind::Default, write_at(1_000))
            .await
            .unwrap();

        let loaded = messages
            .load_message("q", "local", None, ShardKind::Default, row.queue_message_id)
            .await
            .unwrap();
        assert_eq!(loaded.as_ref(), Some(&row));

        assert!(
            messages
                .delete_message("q", "local", None, ShardKind::Default, row.queue_message_id)
                .await
                .unwrap()
        );
        // Second delete is a no-op, not an error.
        assert!(
            !messages
                .delete_message("q", "local", None, ShardKind::Default, row.queue_message_id)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn counters_follow_writes_and_deletes() {
        let (_backend, messages) = fixture();
        let row = messages
            .write_message(ShardKind::Default, write_at(2_000))
            .await
            .unwrap();
        let key = crate::shard::CounterKey {
            queue: "q".into(),
            region: "local".into(),
            kind: ShardKind::Default,
            shard_id: row.shard_id,
        };
        // Threshold of 1 in the fixture commits every delta inline.
        assert_eq!(messages.counters.count(&key).await.unwrap(), 1);

        messages
            .delete_message("q", "local", None, ShardKind::Default, row.queue_message_id)
            .await
            .unwrap();
        assert_eq!(messages.counters.count(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn body_ids_must_be_time_uuids() {
        let (_backend, messages) = fixture();
        let bad = MessageData {
            message_id: Uuid::new_v4(),
            content_type: "text/plain".into(),
            data: Bytes::from_static(b"x"),
        };
        assert!(matches!(
            messages.write_message_data(&bad).await,
            Err(QueueError::BadRequest(_))
        ));

        let good = MessageData {
            message_id: timeuuid::now(),
            content_type: "text/plain".into(),
            data: Bytes::from_static(b"x"),
        };
        messages.write_message_data(&good).await.unwrap();
        assert_eq!(
            messages.load_message_data(good.message_id).await.unwrap(),
            Some(good)
        );
    }

    #[tokio::test]
    async fn visible_scan_skips_future_pointers() {
        let (_backend, messages) = fixture();
        for ms in [1_000, 2_000, 50_000] {
            messages
                .write_message(ShardKind::Default, write_at(ms))
                .await
                .unwrap();
        }

        let visible = messages
            .scan_visible_available("q", "local", 10_000, 10, 4)
            .await
            .unwrap();
        assert_eq!(visible.len(), 2);
        assert_eq!(visible[0].queued_at, 1_000);
        assert_eq!(visible[1].queued_at, 2_000);
    }

    #[tokio::test]
    async fn purge_drops_pointers_shards_and_counters() {
        let (backend, messages) = fixture();
        let row = messages
            .write_message(ShardKind::Default, write_at(3_000))
            .await
            .unwrap();
        messages.purge_region("q", "local").await.unwrap();

        assert!(
            messages
                .load_message("q", "local", Some(row.shard_id), ShardKind::Default, row.queue_message_id)
                .await
                .unwrap()
                .is_none()
        );
        assert!(backend.list_shards("q", "local", ShardKind::Default).await.unwrap().is_empty());
    }
}
