//! Operational HTTP surface.
//!
//! One small axum router per node: the prometheus exposition at the
//! configured path and a `/healthz` probe reporting the local region
//! and registered queue count. The server drains with the rest of the
//! node through the shared cancellation token.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::appconfig::MetricsServerConfig;
use crate::error::{QueueError, QueueResult};
use crate::metrics::QueueMetrics;
use crate::service::DistributedQueueService;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
struct OpsState {
    metrics: Arc<QueueMetrics>,
    service: Arc<DistributedQueueService>,
    region: String,
}

/// Serve `/healthz` and the metrics exposition until the token fires.
pub async fn run_ops_server(
    cfg: MetricsServerConfig,
    metrics: Arc<QueueMetrics>,
    service: Arc<DistributedQueueService>,
    region: String,
    shutdown: CancellationToken,
) -> QueueResult<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.bind_addr, cfg.port)
        .parse()
        .map_err(|e| QueueError::InvalidConfig(format!("metrics bind_addr/port: {e}")))?;

    let app = Router::new()
        .route(&cfg.metrics_path, get(serve_metrics))
        .route("/healthz", get(serve_health))
        .with_state(OpsState {
            metrics,
            service,
            region,
        });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| QueueError::Internal(format!("ops server bind failed: {e}")))?;
    info!(%addr, path = %cfg.metrics_path, "ops server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| QueueError::Internal(format!("ops server error: {e}")))
}

async fn serve_metrics(State(state): State<OpsState>) -> axum::response::Response {
    match state.metrics.gather() {
        Ok(exposition) => (
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            exposition,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "metrics exposition failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn serve_health(State(state): State<OpsState>) -> String {
    format!(
        "ok region={} queues={}\n",
        state.region,
        state.service.list_queues().len()
    )
}
