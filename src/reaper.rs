//! Background sweeps.
//!
//! The inflight reaper periodically returns expired leases to
//! available; the body collector drops orphaned bodies past retention.
//! Both loops are best-effort: failures are logged and the next tick
//! tries again. Startup jitter keeps co-located nodes from sweeping in
//! lockstep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::service::DistributedQueueService;

fn startup_jitter() -> Duration {
    Duration::from_millis(rand::random_range(0..250))
}

/// Periodic inflight sweep. The configured interval is validated to be
/// at most half the smallest lease window, so an expired lease is
/// picked up within one further interval.
pub fn spawn_reaper(
    service: Arc<DistributedQueueService>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(startup_jitter()).await;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let moved = service.sweep_expired_once().await;
            if moved > 0 {
                debug!(moved, "reaper returned expired leases");
            }
        }
    })
}

/// Periodic orphaned-body collection.
pub fn spawn_body_gc(
    service: Arc<DistributedQueueService>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(startup_jitter()).await;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match service.collect_orphaned_bodies().await {
                Ok(removed) if removed > 0 => debug!(removed, "collected orphaned bodies"),
                Ok(_) => {}
                Err(err) => warn!(error = %err, "body collection pass failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appconfig::AppConfig;
    use crate::metrics::QueueMetrics;
    use crate::service::QueueDefinition;
    use crate::store::MemoryStore;
    use bytes::Bytes;
    use tokio::time::sleep;

    #[tokio::test]
    async fn reaper_loop_redelivers_expired_leases() {
        let mut cfg: AppConfig = toml::from_str("region_local = \"local\"").unwrap();
        cfg.counter.flush_threshold = 1;
        let backend = Arc::new(MemoryStore::new());
        let metrics = Arc::new(QueueMetrics::new().unwrap());
        let service = Arc::new(DistributedQueueService::new(cfg, backend, metrics));

        service
            .create_queue(QueueDefinition::new("q").with_inflight_timeout_ms(50))
            .await
            .unwrap();
        let message_id = service
            .send_message("q", "t", Bytes::from_static(b"x"), None)
            .await
            .unwrap();
        assert_eq!(service.get_next_messages("q", 1).await.unwrap().len(), 1);

        let shutdown = CancellationToken::new();
        let reaper = spawn_reaper(
            Arc::clone(&service),
            Duration::from_millis(25),
            shutdown.clone(),
        );

        // Within a few sweep intervals the expired lease is available
        // again.
        let mut redelivered = Vec::new();
        for _ in 0..40 {
            sleep(Duration::from_millis(25)).await;
            redelivered = service.get_next_messages("q", 1).await.unwrap();
            if !redelivered.is_empty() {
                break;
            }
        }
        shutdown.cancel();
        let _ = reaper.await;

        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].message_id, message_id);
    }
}
