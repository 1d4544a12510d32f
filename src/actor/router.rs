//! Per-queue actors and routing.
//!
//! Exactly one live actor per `(queue, region)`: a tokio task draining
//! a bounded mailbox, so all state-machine operations for that pair run
//! serialized in arrival order. The router keys mailboxes by queue name
//! and region; a full mailbox surfaces as `QueueBusy` instead of
//! blocking the caller.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::actor::helper::QueueActorHelper;
use crate::actor::message::QueueRequest;
use crate::audit::AuditLog;
use crate::error::{QueueError, QueueResult};
use crate::messages::MessageSerialization;
use crate::store::{AuditAction, QueueRow};

/// Pointer rows fetched per storage page inside an actor.
const SCAN_PAGE: usize = 128;

struct ActorHandle {
    sender: mpsc::Sender<QueueRequest>,
    task: JoinHandle<()>,
}

pub struct QueueActorRouter {
    actors: RwLock<HashMap<(String, String), ActorHandle>>,
    messages: Arc<MessageSerialization>,
    audit: Arc<AuditLog>,
    mailbox_bound: usize,
}

impl QueueActorRouter {
    pub fn new(
        messages: Arc<MessageSerialization>,
        audit: Arc<AuditLog>,
        mailbox_bound: usize,
    ) -> Self {
        QueueActorRouter {
            actors: RwLock::new(HashMap::new()),
            messages,
            audit,
            mailbox_bound: mailbox_bound.max(1),
        }
    }

    /// Hand one request to the `(queue, region)` actor, spawning it on
    /// first use. A full mailbox returns `QueueBusy` immediately.
    pub async fn route(
        &self,
        queue: &QueueRow,
        region: &str,
        request: QueueRequest,
    ) -> QueueResult<()> {
        let sender = self.ensure_actor(queue, region).await;
        sender.try_send(request).map_err(|err| match err {
            TrySendError::Full(_) => QueueError::QueueBusy(format!(
                "mailbox for queue '{}' in region '{}' is full",
                queue.name, region
            )),
            TrySendError::Closed(_) => QueueError::Internal(format!(
                "actor for queue '{}' in region '{}' is gone",
                queue.name, region
            )),
        })
    }

    async fn ensure_actor(&self, queue: &QueueRow, region: &str) -> mpsc::Sender<QueueRequest> {
        let key = (queue.name.clone(), region.to_string());
        {
            let actors = self.actors.read().await;
            if let Some(handle) = actors.get(&key) {
                return handle.sender.clone();
            }
        }

        let mut actors = self.actors.write().await;
        // Lost the race to another spawner; reuse theirs.
        if let Some(handle) = actors.get(&key) {
            return handle.sender.clone();
        }

        let (sender, receiver) = mpsc::channel(self.mailbox_bound);
        let helper = QueueActorHelper::new(
            queue.clone(),
            region.to_string(),
            Arc::clone(&self.messages),
            Arc::clone(&self.audit),
        );
        info!(queue = %queue.name, region, "spawning queue actor");
        let task = tokio::spawn(run_actor(helper, receiver));
        actors.insert(
            key,
            ActorHandle {
                sender: sender.clone(),
                task,
            },
        );
        sender
    }

    /// Stop every actor for one queue: close the mailboxes, then wait
    /// for the actors to drain what they already accepted.
    pub async fn stop_queue(&self, queue: &str) {
        let removed: Vec<((String, String), ActorHandle)> = {
            let mut actors = self.actors.write().await;
            let keys: Vec<(String, String)> = actors
                .keys()
                .filter(|(name, _)| name == queue)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| actors.remove(&key).map(|handle| (key, handle)))
                .collect()
        };
        for ((name, region), handle) in removed {
            drop(handle.sender);
            let _ = handle.task.await;
            debug!(queue = %name, region = %region, "queue actor stopped");
        }
    }

    /// Close every mailbox and wait for the actors to drain.
    pub async fn shutdown(&self) {
        let handles: Vec<ActorHandle> = {
            let mut actors = self.actors.write().await;
            actors.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            drop(handle.sender);
            let _ = handle.task.await;
        }
    }
}

async fn run_actor(mut helper: QueueActorHelper, mut receiver: mpsc::Receiver<QueueRequest>) {
    while let Some(request) = receiver.recv().await {
        match request {
            QueueRequest::Send {
                queue_message_id,
                message_id,
                queued_at,
                reply,
            } => {
                let result = helper
                    .enqueue(queue_message_id, message_id, queued_at)
                    .await
                    .map(|_| ());
                let _ = reply.send(result);
            }
            QueueRequest::Get { count, reply } => {
                let result = helper.get_batch(count, SCAN_PAGE).await;
                let _ = reply.send(result);
            }
            QueueRequest::Ack {
                queue_message_id,
                reply,
            } => {
                let result = helper.ack(queue_message_id).await;
                let _ = reply.send(result);
            }
            QueueRequest::Nack {
                queue_message_id,
                reply,
            } => {
                let result = helper
                    .release(queue_message_id, AuditAction::Nack)
                    .await
                    .map(|_| ());
                let _ = reply.send(result);
            }
            QueueRequest::SweepExpired { reply } => {
                let result = helper.sweep_expired(SCAN_PAGE).await;
                let _ = reply.send(result);
            }
        }
    }
    debug!(queue = %helper.queue_name(), "queue actor drained");
}
