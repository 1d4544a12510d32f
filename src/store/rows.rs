use bytes::Bytes;
use uuid::Uuid;

/// Registered queue metadata, one row per queue name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub name: String,
    /// Region that owns the message bodies.
    pub default_region: String,
    /// Every region holding pointer replicas (includes the default).
    pub regions: Vec<String>,
    pub inflight_timeout_ms: i64,
    pub delivery_delay_ms: i64,
    pub created_at: i64,
}

impl QueueRow {
    pub fn has_region(&self, region: &str) -> bool {
        self.regions.iter().any(|r| r == region)
    }
}

/// One pointer row in `messages_available` or `messages_inflight`.
///
/// Primary key `((queue_name, region, shard_id), queue_message_id)`,
/// clustered ascending by `queue_message_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessageRow {
    pub queue: String,
    pub region: String,
    pub shard_id: i64,
    /// Time-UUID pointer id; also encodes the visibility instant.
    pub queue_message_id: Uuid,
    /// Body id, stable across regions.
    pub message_id: Uuid,
    /// ms epoch at which the pointer was written.
    pub queued_at: i64,
    /// For inflight rows, the ms epoch at which the lease expires.
    pub inflight_at: Option<i64>,
}

/// Message content, shared by every pointer replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageData {
    /// Required to be a time-UUID; body age for GC derives from it.
    pub message_id: Uuid,
    pub content_type: String,
    pub data: Bytes,
}

/// Terminal actions recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    Send,
    Get,
    Ack,
    Nack,
    Timeout,
}

impl AuditAction {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Send => "SEND",
            AuditAction::Get => "GET",
            AuditAction::Ack => "ACK",
            AuditAction::Nack => "NACK",
            AuditAction::Timeout => "TIMEOUT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SEND" => Some(AuditAction::Send),
            "GET" => Some(AuditAction::Get),
            "ACK" => Some(AuditAction::Ack),
            "NACK" => Some(AuditAction::Nack),
            "TIMEOUT" => Some(AuditAction::Timeout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditStatus {
    Success,
    Error,
}

impl AuditStatus {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Error => "ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(AuditStatus::Success),
            "ERROR" => Some(AuditStatus::Error),
            _ => None,
        }
    }
}

/// Append-only history row, clustered ascending by `recorded_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogRow {
    pub message_id: Uuid,
    pub recorded_at: i64,
    pub queue: String,
    pub action: AuditAction,
    pub status: AuditStatus,
    pub error: Option<String>,
}
