use crate::error::QueueResult;

#[cfg(feature = "metrics")]
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone, Debug)]
pub struct QueueMetrics {
    #[cfg(feature = "metrics")]
    registry: Registry,

    // --------------------------------------------
    // Throughput
    // --------------------------------------------
    #[cfg(feature = "metrics")]
    pub sent_total: IntCounter,

    #[cfg(feature = "metrics")]
    pub delivered_total: IntCounter,

    #[cfg(feature = "metrics")]
    pub acked_total: IntCounter,

    // --------------------------------------------
    // Lease churn
    // --------------------------------------------
    #[cfg(feature = "metrics")]
    pub nacked_total: IntCounter,

    /// Leases returned by the reaper after expiry.
    #[cfg(feature = "metrics")]
    pub timeout_returns_total: IntCounter,

    // --------------------------------------------
    // Failures / rejections, by wire status
    // --------------------------------------------
    #[cfg(feature = "metrics")]
    pub rejected_total: IntCounterVec,

    // --------------------------------------------
    // Latency
    // --------------------------------------------
    #[cfg(feature = "metrics")]
    pub request_latency_seconds: Histogram,

    // --------------------------------------------
    // Counter cache visibility
    // --------------------------------------------
    #[cfg(feature = "metrics")]
    pub counter_pending_keys: IntGauge,

    #[cfg(not(feature = "metrics"))]
    _noop: (),
}

impl QueueMetrics {
    pub fn new() -> QueueResult<Self> {
        #[cfg(feature = "metrics")]
        {
            let registry = Registry::new();

            let sent_total = IntCounter::with_opts(Opts::new(
                "shardmq_messages_sent_total",
                "Messages accepted by sendMessage",
            ))?;
            let delivered_total = IntCounter::with_opts(Opts::new(
                "shardmq_messages_delivered_total",
                "Messages leased to consumers",
            ))?;
            let acked_total = IntCounter::with_opts(Opts::new(
                "shardmq_messages_acked_total",
                "Leases resolved by ack",
            ))?;
            let nacked_total = IntCounter::with_opts(Opts::new(
                "shardmq_messages_nacked_total",
                "Leases returned by consumer nack",
            ))?;
            let timeout_returns_total = IntCounter::with_opts(Opts::new(
                "shardmq_messages_timeout_returns_total",
                "Leases returned by the inflight reaper",
            ))?;
            let rejected_total = IntCounterVec::new(
                Opts::new(
                    "shardmq_requests_rejected_total",
                    "Requests that did not succeed, by status",
                ),
                &["status"],
            )?;
            let request_latency_seconds = Histogram::with_opts(
                HistogramOpts::new(
                    "shardmq_request_latency_seconds",
                    "Service request latency (seconds)",
                )
                .buckets(vec![
                    0.0005, 0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0,
                ]),
            )?;
            let counter_pending_keys = IntGauge::with_opts(Opts::new(
                "shardmq_counter_pending_keys",
                "Shard counter keys with unflushed deltas",
            ))?;

            registry.register(Box::new(sent_total.clone()))?;
            registry.register(Box::new(delivered_total.clone()))?;
            registry.register(Box::new(acked_total.clone()))?;
            registry.register(Box::new(nacked_total.clone()))?;
            registry.register(Box::new(timeout_returns_total.clone()))?;
            registry.register(Box::new(rejected_total.clone()))?;
            registry.register(Box::new(request_latency_seconds.clone()))?;
            registry.register(Box::new(counter_pending_keys.clone()))?;

            Ok(QueueMetrics {
                registry,
                sent_total,
                delivered_total,
                acked_total,
                nacked_total,
                timeout_returns_total,
                rejected_total,
                request_latency_seconds,
                counter_pending_keys,
            })
        }

        #[cfg(not(feature = "metrics"))]
        {
            Ok(QueueMetrics { _noop: () })
        }
    }

    pub fn inc_sent(&self) {
        #[cfg(feature = "metrics")]
        self.sent_total.inc();
    }

    pub fn inc_delivered(&self, n: u64) {
        #[cfg(feature = "metrics")]
        self.delivered_total.inc_by(n);
        #[cfg(not(feature = "metrics"))]
        let _ = n;
    }

    pub fn inc_acked(&self) {
        #[cfg(feature = "metrics")]
        self.acked_total.inc();
    }

    pub fn inc_nacked(&self) {
        #[cfg(feature = "metrics")]
        self.nacked_total.inc();
    }

    pub fn inc_timeout_returns(&self, n: u64) {
        #[cfg(feature = "metrics")]
        self.timeout_returns_total.inc_by(n);
        #[cfg(not(feature = "metrics"))]
        let _ = n;
    }

    pub fn inc_rejected(&self, status: &'static str) {
        #[cfg(feature = "metrics")]
        self.rejected_total.with_label_values(&[status]).inc();
        #[cfg(not(feature = "metrics"))]
        let _ = status;
    }

    pub fn observe_request_latency(&self, seconds: f64) {
        #[cfg(feature = "metrics")]
        self.request_latency_seconds.observe(seconds);
        #[cfg(not(feature = "metrics"))]
        let _ = seconds;
    }

    pub fn set_counter_pending_keys(&self, n: i64) {
        #[cfg(feature = "metrics")]
        self.counter_pending_keys.set(n);
        #[cfg(not(feature = "metrics"))]
        let _ = n;
    }

    /// Text exposition for the /metrics endpoint.
    pub fn gather(&self) -> QueueResult<String> {
        #[cfg(feature = "metrics")]
        {
            let encoder = TextEncoder::new();
            let mut buf = Vec::new();
            encoder.encode(&self.registry.gather(), &mut buf)?;
            Ok(String::from_utf8_lossy(&buf).into_owned())
        }

        #[cfg(not(feature = "metrics"))]
        {
            Ok(String::new())
        }
    }
}
