use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shardmq::appconfig::load_app_config;
use shardmq::cli::Cli;
use shardmq::metrics::QueueMetrics;
use shardmq::metrics_server::run_ops_server;
use shardmq::reaper::{spawn_body_gc, spawn_reaper};
use shardmq::service::DistributedQueueService;
use shardmq::shard::spawn_flush_loop;
use shardmq::store::ScyllaStore;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.workers)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_app_config(cli.config.as_deref()).context("failed to load configuration")?;
    info!(region = %config.region_local, "starting shardmq node");

    let backend = Arc::new(
        ScyllaStore::connect(&config.storage)
            .await
            .context("failed to connect to the storage cluster")?,
    );
    let metrics = Arc::new(QueueMetrics::new()?);
    let service = Arc::new(DistributedQueueService::new(
        config.clone(),
        backend,
        Arc::clone(&metrics),
    ));
    service.load_registry().await?;

    let shutdown = CancellationToken::new();
    let counter_flusher = spawn_flush_loop(
        service.counters(),
        Duration::from_millis(config.counter.flush_interval_ms),
        shutdown.clone(),
    );
    let reaper = spawn_reaper(
        Arc::clone(&service),
        Duration::from_millis(config.reaper.interval_ms),
        shutdown.clone(),
    );
    let body_gc = spawn_body_gc(
        Arc::clone(&service),
        Duration::from_millis(config.gc.interval_ms),
        shutdown.clone(),
    );

    let ops_server = if config.metrics.enabled {
        let metrics = Arc::clone(&metrics);
        let service = Arc::clone(&service);
        let metrics_cfg = config.metrics.clone();
        let region = config.region_local.clone();
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(err) =
                run_ops_server(metrics_cfg, metrics, service, region, shutdown).await
            {
                error!(error = %err, "ops server exited");
            }
        }))
    } else {
        None
    };

    info!(
        regions = ?config.regions(),
        reaper_interval_ms = config.reaper.interval_ms,
        "shardmq node ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, draining");

    shutdown.cancel();
    let _ = reaper.await;
    let _ = body_gc.await;
    let _ = counter_flusher.await;
    if let Some(server) = ops_server {
        let _ = server.await;
    }
    service.shutdown().await;
    Ok(())
}
