use bytes::Bytes;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{QueueResult, ServiceStatus};

/// A leased message handed to a consumer.
#[derive(Debug)]
pub struct DeliveredMessage {
    pub queue_message_id: Uuid,
    pub message_id: Uuid,
    pub content_type: String,
    pub body: Bytes,
    /// Region that holds the lease; acks route back here.
    pub region: String,
}

impl DeliveredMessage {
    pub fn token(&self) -> MessageToken {
        MessageToken {
            queue_message_id: self.queue_message_id,
            region: self.region.clone(),
        }
    }
}

/// Opaque-to-the-caller handle identifying one lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageToken {
    pub queue_message_id: Uuid,
    pub region: String,
}

/// Requests a `(queue, region)` actor processes serially.
#[derive(Debug)]
pub enum QueueRequest {
    /// Write one available pointer for an already-persisted body.
    Send {
        queue_message_id: Uuid,
        message_id: Uuid,
        queued_at: i64,
        reply: oneshot::Sender<QueueResult<()>>,
    },
    /// Lease up to `count` visible messages.
    Get {
        count: usize,
        reply: oneshot::Sender<QueueResult<Vec<DeliveredMessage>>>,
    },
    Ack {
        queue_message_id: Uuid,
        reply: oneshot::Sender<QueueResult<ServiceStatus>>,
    },
    /// Consumer-initiated lease return.
    Nack {
        queue_message_id: Uuid,
        reply: oneshot::Sender<QueueResult<()>>,
    },
    /// Reaper tick: move expired leases back to available. Replies
    /// with the number of messages returned.
    SweepExpired {
        reply: oneshot::Sender<QueueResult<u64>>,
    },
}
