//! State-machine operations for one queue in one region.
//!
//! All mutation of pointer state for a `(queue, region)` pair funnels
//! through one `QueueActorHelper` owned by that pair's actor, so the
//! operations here run serialized. Each helper also owns the audit
//! dedup set: within one actor lifetime a retried terminal action does
//! not append a second history row.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::actor::message::DeliveredMessage;
use crate::audit::AuditLog;
use crate::error::{QueueResult, ServiceStatus};
use crate::messages::{MessageSerialization, PointerWrite};
use crate::shard::ShardKind;
use crate::store::{AuditAction, AuditStatus, QueueMessageRow, QueueRow};
use crate::timeuuid;

/// Entries kept in the audit dedup set before it is reset.
const AUDIT_DEDUP_CAP: usize = 8_192;

pub struct QueueActorHelper {
    queue: QueueRow,
    region: String,
    messages: Arc<MessageSerialization>,
    audit: Arc<AuditLog>,
    audited: HashSet<(Uuid, AuditAction)>,
}

impl QueueActorHelper {
    pub fn new(
        queue: QueueRow,
        region: String,
        messages: Arc<MessageSerialization>,
        audit: Arc<AuditLog>,
    ) -> Self {
        QueueActorHelper {
            queue,
            region,
            messages,
            audit,
            audited: HashSet::new(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue.name
    }

    /// Point-read one pointer in this queue/region.
    pub async fn load_queue_message(
        &self,
        kind: ShardKind,
        queue_message_id: Uuid,
    ) -> QueueResult<Option<QueueMessageRow>> {
        self.messages
            .load_message(&self.queue.name, &self.region, None, kind, queue_message_id)
            .await
    }

    /// Write one available pointer for an already-persisted body.
    pub async fn enqueue(
        &mut self,
        queue_message_id: Uuid,
        message_id: Uuid,
        queued_at: i64,
    ) -> QueueResult<QueueMessageRow> {
        self.messages
            .write_message(
                ShardKind::Default,
                PointerWrite {
                    queue: self.queue.name.clone(),
                    region: self.region.clone(),
                    shard_id: None,
                    queue_message_id,
                    message_id,
                    queued_at,
                    inflight_at: None,
                },
            )
            .await
    }

    /// Move one available pointer to inflight.
    ///
    /// Insert-then-delete: a crash between the two steps leaves the
    /// pointer in both tables, and both the reaper and the ack path
    /// tolerate the duplicate (at-least-once delivery).
    pub async fn put_inflight(
        &mut self,
        available: &QueueMessageRow,
    ) -> QueueResult<QueueMessageRow> {
        let deadline = timeuuid::now_unix_millis() + self.queue.inflight_timeout_ms;
        let inflight = self
            .messages
            .write_message(
                ShardKind::Inflight,
                PointerWrite {
                    queue: self.queue.name.clone(),
                    region: self.region.clone(),
                    shard_id: None,
                    queue_message_id: available.queue_message_id,
                    message_id: available.message_id,
                    queued_at: available.queued_at,
                    inflight_at: Some(deadline),
                },
            )
            .await?;

        self.messages
            .delete_message(
                &self.queue.name,
                &self.region,
                Some(available.shard_id),
                ShardKind::Default,
                available.queue_message_id,
            )
            .await?;

        // A later return to available makes a fresh lease a new event.
        self.audited.remove(&(inflight.message_id, AuditAction::Nack));
        self.audited
            .remove(&(inflight.message_id, AuditAction::Timeout));
        self.record_once(inflight.message_id, AuditAction::Get).await;
        Ok(inflight)
    }

    /// Acknowledge one leased pointer. The body row is left to GC.
    ///
    /// An id that was never leased or is already resolved is
    /// `BadRequest` and appends no audit row. `NotInflight` is reserved
    /// for a pointer whose lease was already returned (nack or expiry)
    /// and that is back in available awaiting redelivery.
    pub async fn ack(&mut self, queue_message_id: Uuid) -> QueueResult<ServiceStatus> {
        let Some(inflight) = self
            .load_queue_message(ShardKind::Inflight, queue_message_id)
            .await?
        else {
            let available = self
                .load_queue_message(ShardKind::Default, queue_message_id)
                .await?;
            if let Some(available) = available {
                // Pointer id and body id coincide for every pointer
                // this node writes, so the audit log is the lease
                // history. A recorded GET means the lease existed and
                // was since returned.
                let previously_leased = self
                    .audit
                    .history(available.message_id)
                    .await?
                    .iter()
                    .any(|entry| {
                        entry.action == AuditAction::Get && entry.status == AuditStatus::Success
                    });
                if previously_leased {
                    return Ok(ServiceStatus::NotInflight);
                }
            }
            return Ok(ServiceStatus::BadRequest);
        };

        self.messages
            .delete_message(
                &self.queue.name,
                &self.region,
                Some(inflight.shard_id),
                ShardKind::Inflight,
                queue_message_id,
            )
            .await?;
        self.record_once(inflight.message_id, AuditAction::Ack).await;
        Ok(ServiceStatus::Success)
    }

    /// Return one leased pointer to available, either on consumer nack
    /// or on lease expiry. Idempotent: a pointer no longer inflight is
    /// a no-op. Returns whether a pointer moved.
    pub async fn release(
        &mut self,
        queue_message_id: Uuid,
        action: AuditAction,
    ) -> QueueResult<bool> {
        let Some(inflight) = self
            .load_queue_message(ShardKind::Inflight, queue_message_id)
            .await?
        else {
            return Ok(false);
        };

        self.messages
            .delete_message(
                &self.queue.name,
                &self.region,
                Some(inflight.shard_id),
                ShardKind::Inflight,
                queue_message_id,
            )
            .await?;
        self.messages
            .write_message(
                ShardKind::Default,
                PointerWrite {
                    queue: self.queue.name.clone(),
                    region: self.region.clone(),
                    shard_id: None,
                    queue_message_id,
                    message_id: inflight.message_id,
                    queued_at: timeuuid::now_unix_millis(),
                    inflight_at: None,
                },
            )
            .await?;

        // The lease is gone; a fresh GET is a new event again.
        self.audited.remove(&(inflight.message_id, AuditAction::Get));
        self.record_once(inflight.message_id, action).await;
        Ok(true)
    }

    /// Lease up to `count` visible messages, bodies attached.
    pub async fn get_batch(
        &mut self,
        count: usize,
        page: usize,
    ) -> QueueResult<Vec<DeliveredMessage>> {
        let now = timeuuid::now_unix_millis();
        let candidates = self
            .messages
            .scan_visible_available(&self.queue.name, &self.region, now, count, page)
            .await?;

        let mut delivered = Vec::with_capacity(candidates.len());
        for pointer in candidates {
            let Some(body) = self.messages.load_message_data(pointer.message_id).await? else {
                // Pointer with no body is undeliverable; drop it so it
                // cannot wedge the head of the shard.
                warn!(
                    queue = %self.queue.name,
                    region = %self.region,
                    message_id = %pointer.message_id,
                    "dropping pointer with missing body"
                );
                self.messages
                    .delete_message(
                        &self.queue.name,
                        &self.region,
                        Some(pointer.shard_id),
                        ShardKind::Default,
                        pointer.queue_message_id,
                    )
                    .await?;
                self.audit
                    .record_best_effort(
                        pointer.message_id,
                        &self.queue.name,
                        AuditAction::Get,
                        AuditStatus::Error,
                        Some("message body missing".into()),
                    )
                    .await;
                continue;
            };

            let inflight = self.put_inflight(&pointer).await?;
            delivered.push(DeliveredMessage {
                queue_message_id: inflight.queue_message_id,
                message_id: inflight.message_id,
                content_type: body.content_type,
                body: body.data,
                region: self.region.clone(),
            });
        }
        Ok(delivered)
    }

    /// One reaper sweep: walk the inflight shards and return every
    /// pointer whose lease deadline has passed. A single row's failure
    /// is logged and never aborts the sweep.
    pub async fn sweep_expired(&mut self, page: usize) -> QueueResult<u64> {
        let now = timeuuid::now_unix_millis();
        let mut moved = 0u64;

        let shards = self
            .messages
            .shards(&self.queue.name, &self.region, ShardKind::Inflight)
            .await?;
        for shard in shards {
            let mut cursor: Option<Uuid> = None;
            loop {
                let batch = self
                    .messages
                    .scan_shard(
                        ShardKind::Inflight,
                        &self.queue.name,
                        &self.region,
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
                    let expired = row.inflight_at.map(|at| at <= now).unwrap_or(true);
                    if !expired {
                        continue;
                    }
                    match self.release(row.queue_message_id, AuditAction::Timeout).await {
                        Ok(true) => moved += 1,
                        Ok(false) => {}
                        Err(err) => warn!(
                            queue = %self.queue.name,
                            region = %self.region,
                            queue_message_id = %row.queue_message_id,
                            error = %err,
                            "failed to return expired lease"
                        ),
                    }
                }
            }
        }
        Ok(moved)
    }

    async fn record_once(&mut self, message_id: Uuid, action: AuditAction) {
        if self.audited.len() >= AUDIT_DEDUP_CAP {
            self.audited.clear();
        }
        if self.audited.insert((message_id, action)) {
            self.audit
                .record_best_effort(message_id, &self.queue.name, action, AuditStatus::Success, None)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::{ShardCounterCache, ShardStrategy};
    use crate::store::{MemoryStore, MessageData, StorageBackend};
    use bytes::Bytes;

    fn queue_row(name: &str, inflight_timeout_ms: i64) -> QueueRow {
        QueueRow {
            name: name.into(),
            default_region: "local".into(),
            regions: vec!["local".into()],
            inflight_timeout_ms,
            delivery_delay_ms: 0,
            created_at: timeuuid::now_unix_millis(),
        }
    }

    fn helper(backend: Arc<MemoryStore>, queue: QueueRow) -> QueueActorHelper {
        let counters = Arc::new(ShardCounterCache::new(backend.clone(), 1));
        let strategy = Arc::new(ShardStrategy::new(
            backend.clone(),
            counters.clone(),
            100_000,
        ));
        let messages = Arc::new(MessageSerialization::new(
            backend.clone(),
            strategy,
            counters,
        ));
        let audit = Arc::new(AuditLog::new(backend));
        QueueActorHelper::new(queue, "local".into(), messages, audit)
    }

    async fn seed(helper: &mut QueueActorHelper, backend: &MemoryStore, body: &[u8]) -> Uuid {
        let id = timeuuid::now();
        backend
            .insert_body(&MessageData {
                message_id: id,
                content_type: "text/plain".into(),
                data: Bytes::copy_from_slice(body),
            })
            .await
            .unwrap();
        helper
            .enqueue(id, id, timeuuid::now_unix_millis())
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn lease_moves_pointer_between_tables() {
        let backend = Arc::new(MemoryStore::new());
        let mut helper = helper(backend.clone(), queue_row("q", 5_000));
        let id = seed(&mut helper, &backend, b"payload").await;

        let delivered = helper.get_batch(1, 16).await.unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].body, Bytes::from_static(b"payload"));

        // Leased: gone from available, present in inflight with a
        // future deadline.
        assert!(
            helper
                .load_queue_message(ShardKind::Default, id)
                .await
                .unwrap()
                .is_none()
        );
        let inflight = helper
            .load_queue_message(ShardKind::Inflight, id)
            .await
            .unwrap()
            .unwrap();
        assert!(inflight.inflight_at.unwrap() > inflight.queued_at);
    }

    #[tokio::test]
    async fn ack_resolves_the_lease() {
        let backend = Arc::new(MemoryStore::new());
        let mut helper = helper(backend.clone(), queue_row("q", 5_000));
        let id = seed(&mut helper, &backend, b"x").await;

        helper.get_batch(1, 16).await.unwrap();
        assert_eq!(helper.ack(id).await.unwrap(), ServiceStatus::Success);

        assert!(
            helper
                .load_queue_message(ShardKind::Default, id)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            helper
                .load_queue_message(ShardKind::Inflight, id)
                .await
                .unwrap()
                .is_none()
        );

        // Acking the already-resolved id again is a bad request.
        assert_eq!(helper.ack(id).await.unwrap(), ServiceStatus::BadRequest);
    }

    #[tokio::test]
    async fn ack_of_unknown_pointer_is_bad_request_without_audit() {
        let backend = Arc::new(MemoryStore::new());
        let mut helper = helper(backend.clone(), queue_row("q", 5_000));

        let bogus = timeuuid::now();
        assert_eq!(helper.ack(bogus).await.unwrap(), ServiceStatus::BadRequest);
        assert!(backend.select_audit(bogus).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ack_of_never_leased_pointer_is_bad_request_without_audit() {
        let backend = Arc::new(MemoryStore::new());
        let mut helper = helper(backend.clone(), queue_row("q", 5_000));
        let id = seed(&mut helper, &backend, b"x").await;

        // Enqueued but never delivered: available presence alone is not
        // a lease.
        assert_eq!(helper.ack(id).await.unwrap(), ServiceStatus::BadRequest);
        assert!(backend.select_audit(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ack_after_lease_was_returned_is_not_inflight() {
        let backend = Arc::new(MemoryStore::new());
        let mut helper = helper(backend.clone(), queue_row("q", 5_000));
        let id = seed(&mut helper, &backend, b"x").await;

        helper.get_batch(1, 16).await.unwrap();
        assert!(helper.release(id, AuditAction::Nack).await.unwrap());

        // Back in available with a recorded lease: the late ack is
        // distinguishable from a bogus id.
        assert_eq!(helper.ack(id).await.unwrap(), ServiceStatus::NotInflight);
    }

    #[tokio::test]
    async fn release_returns_lease_and_is_idempotent() {
        let backend = Arc::new(MemoryStore::new());
        let mut helper = helper(backend.clone(), queue_row("q", 5_000));
        let id = seed(&mut helper, &backend, b"x").await;

        helper.get_batch(1, 16).await.unwrap();
        assert!(helper.release(id, AuditAction::Nack).await.unwrap());
        assert!(!helper.release(id, AuditAction::Nack).await.unwrap());

        // Back in available under the same pointer id.
        assert!(
            helper
                .load_queue_message(ShardKind::Default, id)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn expired_sweep_returns_only_overdue_leases() {
        let backend = Arc::new(MemoryStore::new());
        // Deadline already in the past at lease time.
        let mut helper = helper(backend.clone(), queue_row("q", -1_000));
        let expired = seed(&mut helper, &backend, b"old").await;
        helper.get_batch(1, 16).await.unwrap();

        let mut fresh_helper = self::helper(backend.clone(), queue_row("q2", 60_000));
        let fresh = seed(&mut fresh_helper, &backend, b"new").await;
        fresh_helper.get_batch(1, 16).await.unwrap();

        assert_eq!(helper.sweep_expired(16).await.unwrap(), 1);
        assert!(
            helper
                .load_queue_message(ShardKind::Default, expired)
                .await
                .unwrap()
                .is_some()
        );

        assert_eq!(fresh_helper.sweep_expired(16).await.unwrap(), 0);
        assert!(
            fresh_helper
                .load_queue_message(ShardKind::Inflight, fresh)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn audit_appends_are_deduped_within_one_lifetime() {
        let backend = Arc::new(MemoryStore::new());
        let mut helper = helper(backend.clone(), queue_row("q", 5_000));
        let id = seed(&mut helper, &backend, b"x").await;

        helper.get_batch(1, 16).await.unwrap();
        // Retried GET for the same lease does not double-append.
        helper.record_once(id, AuditAction::Get).await;
        helper.record_once(id, AuditAction::Get).await;

        let gets = backend
            .select_audit(id)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.action == AuditAction::Get)
            .count();
        assert_eq!(gets, 1);
    }

    #[tokio::test]
    async fn missing_body_pointer_is_dropped_not_delivered() {
        let backend = Arc::new(MemoryStore::new());
        let mut helper = helper(backend.clone(), queue_row("q", 5_000));

        let id = timeuuid::now();
        helper
            .enqueue(id, id, timeuuid::now_unix_millis())
            .await
            .unwrap();

        let delivered = helper.get_batch(1, 16).await.unwrap();
        assert!(delivered.is_empty());
        assert!(
            helper
                .load_queue_message(ShardKind::Default, id)
                .await
                .unwrap()
                .is_none()
        );
        let history = backend.select_audit(id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, AuditStatus::Error);
    }
}
