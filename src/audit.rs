//! Per-message audit history.
//!
//! Every terminal action on a message appends one `(action, status)`
//! row stamped with the server clock. Audit writes are best-effort: a
//! failed append is logged and never fails the operation that
//! triggered it.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::error::QueueResult;
use crate::store::{AuditAction, AuditLogRow, AuditStatus, StorageBackend};

pub struct AuditLog {
    backend: Arc<dyn StorageBackend>,
}

impl AuditLog {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        AuditLog { backend }
    }

    /// Append one history row.
    pub async fn record(
        &self,
        message_id: Uuid,
        queue: &str,
        action: AuditAction,
        status: AuditStatus,
        error: Option<String>,
    ) -> QueueResult<()> {
        // Microsecond stamp: consecutive actions on one message must
        // not collide on the clustering key.
        let row = AuditLogRow {
            message_id,
            recorded_at: chrono::Utc::now().timestamp_micros(),
            queue: queue.to_string(),
            action,
            status,
            error,
        };
        self.backend.append_audit(&row).await
    }

    /// Append one history row, swallowing storage failures.
    pub async fn record_best_effort(
        &self,
        message_id: Uuid,
        queue: &str,
        action: AuditAction,
        status: AuditStatus,
        error: Option<String>,
    ) {
        if let Err(err) = self.record(message_id, queue, action, status, error).await {
            warn!(
                %message_id,
                queue,
                action = action.as_str(),
                error = %err,
                "audit append failed"
            );
        }
    }

    /// Full history of one message id, oldest first.
    pub async fn history(&self, message_id: Uuid) -> QueueResult<Vec<AuditLogRow>> {
        self.backend.select_audit(message_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::timeuuid;

    #[tokio::test]
    async fn history_comes_back_oldest_first() {
        let backend = Arc::new(MemoryStore::new());
        let audit = AuditLog::new(backend);
        let id = timeuuid::now();

        audit
            .record(id, "q", AuditAction::Send, AuditStatus::Success, None)
            .await
            .unwrap();
        audit
            .record(id, "q", AuditAction::Get, AuditStatus::Success, None)
            .await
            .unwrap();
        audit
            .record(
                id,
                "q",
                AuditAction::Ack,
                AuditStatus::Error,
                Some("lease lost".into()),
            )
            .await
            .unwrap();

        let rows = audit.history(id).await.unwrap();
        let actions: Vec<AuditAction> = rows.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::Send, AuditAction::Get, AuditAction::Ack]
        );
        assert_eq!(rows[2].error.as_deref(), Some("lease lost"));
    }

    #[tokio::test]
    async fn unknown_message_has_empty_history() {
        let backend = Arc::new(MemoryStore::new());
        let audit = AuditLog::new(backend);
        assert!(audit.history(timeuuid::now()).await.unwrap().is_empty());
    }
}
