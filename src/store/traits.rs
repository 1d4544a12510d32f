use async_trait::async_trait;
use uuid::Uuid;

use crate::error::QueueResult;
use crate::shard::{CounterKey, Shard, ShardKind};
use crate::store::rows::{AuditLogRow, MessageData, QueueMessageRow, QueueRow};

/// Raw row contract against the wide-column schema.
///
/// Callers address pointer rows by explicit shard id; shard resolution
/// and counter accounting live a layer up. Missing rows come back as
/// `None` / `false`, never as errors; only driver failures error.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ---- queue metadata

    /// Upsert queue metadata. Returns false when the row already existed.
    async fn insert_queue(&self, row: &QueueRow) -> QueueResult<bool>;

    async fn select_queue(&self, name: &str) -> QueueResult<Option<QueueRow>>;

    async fn select_queues(&self) -> QueueResult<Vec<QueueRow>>;

    async fn delete_queue(&self, name: &str) -> QueueResult<()>;

    // ---- shards

    async fn insert_shard(&self, shard: &Shard) -> QueueResult<()>;

    /// Shards for one `(queue, region, kind)` family, ordered ascending
    /// by pointer (creation order).
    async fn list_shards(
        &self,
        queue: &str,
        region: &str,
        kind: ShardKind,
    ) -> QueueResult<Vec<Shard>>;

    /// Drop every shard row for the queue in one region (both kinds).
    async fn delete_shards(&self, queue: &str, region: &str) -> QueueResult<()>;

    // ---- pointers

    async fn insert_pointer(&self, kind: ShardKind, row: &QueueMessageRow) -> QueueResult<()>;

    async fn select_pointer(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
        queue_message_id: Uuid,
    ) -> QueueResult<Option<QueueMessageRow>>;

    /// Returns true when a row was actually removed.
    async fn delete_pointer(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
        queue_message_id: Uuid,
    ) -> QueueResult<bool>;

    /// Page through one shard partition in clustering order, starting
    /// strictly after the cursor when one is given.
    async fn scan_pointers(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
        after: Option<Uuid>,
        limit: usize,
    ) -> QueueResult<Vec<QueueMessageRow>>;

    /// Drop one whole shard partition.
    async fn delete_pointers(
        &self,
        kind: ShardKind,
        queue: &str,
        region: &str,
        shard_id: i64,
    ) -> QueueResult<()>;

    // ---- bodies

    async fn insert_body(&self, body: &MessageData) -> QueueResult<()>;

    async fn select_body(&self, message_id: Uuid) -> QueueResult<Option<MessageData>>;

    async fn delete_body(&self, message_id: Uuid) -> QueueResult<()>;

    /// Page through all bodies (GC support). Ordering is
    /// backend-defined but stable; `after` is the last id seen.
    async fn scan_bodies(
        &self,
        after: Option<Uuid>,
        limit: usize,
    ) -> QueueResult<Vec<MessageData>>;

    // ---- shard counters

    async fn add_counter(&self, key: &CounterKey, delta: i64) -> QueueResult<()>;

    /// Last committed value; zero when never written.
    async fn read_counter(&self, key: &CounterKey) -> QueueResult<i64>;

    /// Drop every counter row for the queue in one region.
    async fn delete_counters(&self, queue: &str, region: &str) -> QueueResult<()>;

    // ---- audit log

    async fn append_audit(&self, row: &AuditLogRow) -> QueueResult<()>;

    /// Full history for one message id, ascending by `recorded_at`.
    async fn select_audit(&self, message_id: Uuid) -> QueueResult<Vec<AuditLogRow>>;
}
