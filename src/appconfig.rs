use crate::error::{QueueError, QueueResult};
use serde::Deserialize;
use std::env;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Region this node serves reads from.
    pub region_local: String,

    /// Additional regions replicated into on every send.
    #[serde(default)]
    pub regions_replicated: Vec<String>,

    #[serde(default)]
    pub queues: QueueDefaults,
    #[serde(default)]
    pub counter: CounterConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub actor: ActorConfig,
    #[serde(default)]
    pub gc: GcConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metrics: MetricsServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueDefaults {
    #[serde(default = "default_inflight_timeout_ms")]
    pub inflight_timeout_ms: i64,
    #[serde(default)]
    pub delivery_delay_ms: i64,
    #[serde(default = "default_shard_max_size")]
    pub shard_max_size: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CounterConfig {
    #[serde(default = "default_counter_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// A key's pending delta is committed inline once it reaches this.
    #[serde(default = "default_counter_flush_threshold")]
    pub flush_threshold: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_reaper_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActorConfig {
    #[serde(default = "default_mailbox_bound")]
    pub mailbox_bound: usize,
    /// Deadline applied to every external request.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcConfig {
    /// Bodies younger than this are never collected.
    #[serde(default = "default_body_retention_ms")]
    pub body_retention_ms: i64,
    #[serde(default = "default_gc_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_gc_page_size")]
    pub page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_hosts")]
    pub hosts: Vec<String>,
    #[serde(default = "default_keyspace")]
    pub keyspace: String,
    /// Names of the environment variables that hold credentials; unset
    /// means an unauthenticated cluster.
    #[serde(default)]
    pub username_env: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
}

fn default_inflight_timeout_ms() -> i64 {
    5_000
}
fn default_shard_max_size() -> i64 {
    100_000
}
fn default_counter_flush_interval_ms() -> u64 {
    1_000
}
fn default_counter_flush_threshold() -> i64 {
    1_000
}
fn default_reaper_interval_ms() -> u64 {
    2_000
}
fn default_mailbox_bound() -> usize {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_body_retention_ms() -> i64 {
    86_400_000
}
fn default_gc_interval_ms() -> u64 {
    60_000
}
fn default_gc_page_size() -> usize {
    500
}
fn default_storage_hosts() -> Vec<String> {
    vec!["127.0.0.1:9042".to_string()]
}
fn default_keyspace() -> String {
    "shardmq".to_string()
}
fn default_replication_factor() -> u32 {
    1
}
fn default_metrics_bind_addr() -> String {
    "127.0.0.1".to_string()
}
fn default_metrics_port() -> u16 {
    9600
}
fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for QueueDefaults {
    fn default() -> Self {
        QueueDefaults {
            inflight_timeout_ms: default_inflight_timeout_ms(),
            delivery_delay_ms: 0,
            shard_max_size: default_shard_max_size(),
        }
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        CounterConfig {
            flush_interval_ms: default_counter_flush_interval_ms(),
            flush_threshold: default_counter_flush_threshold(),
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        ReaperConfig {
            interval_ms: default_reaper_interval_ms(),
        }
    }
}

impl Default for ActorConfig {
    fn default() -> Self {
        ActorConfig {
            mailbox_bound: default_mailbox_bound(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            body_retention_ms: default_body_retention_ms(),
            interval_ms: default_gc_interval_ms(),
            page_size: default_gc_page_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            hosts: default_storage_hosts(),
            keyspace: default_keyspace(),
            username_env: None,
            password_env: None,
            replication_factor: default_replication_factor(),
        }
    }
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        MetricsServerConfig {
            enabled: false,
            bind_addr: default_metrics_bind_addr(),
            port: default_metrics_port(),
            metrics_path: default_metrics_path(),
        }
    }
}

impl AppConfig {
    /// All regions this node replicates into, local first, deduped.
    pub fn regions(&self) -> Vec<String> {
        let mut regions = vec![self.region_local.clone()];
        for region in &self.regions_replicated {
            if !regions.contains(region) {
                regions.push(region.clone());
            }
        }
        regions
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.region_local.trim().is_empty() {
            return Err(QueueError::MissingConfig("region_local"));
        }

        if self
            .regions_replicated
            .iter()
            .any(|r| r.trim().is_empty())
        {
            return Err(QueueError::InvalidConfig(
                "regions_replicated entries must not be empty".into(),
            ));
        }

        if self.queues.inflight_timeout_ms <= 0 {
            return Err(QueueError::InvalidConfig(
                "queues.inflight_timeout_ms must be > 0".into(),
            ));
        }
        if self.queues.delivery_delay_ms < 0 {
            return Err(QueueError::InvalidConfig(
                "queues.delivery_delay_ms must be >= 0".into(),
            ));
        }
        if self.queues.shard_max_size <= 0 {
            return Err(QueueError::InvalidConfig(
                "queues.shard_max_size must be > 0".into(),
            ));
        }

        if self.counter.flush_interval_ms == 0 {
            return Err(QueueError::InvalidConfig(
                "counter.flush_interval_ms must be > 0".into(),
            ));
        }
        if self.counter.flush_threshold <= 0 {
            return Err(QueueError::InvalidConfig(
                "counter.flush_threshold must be > 0".into(),
            ));
        }

        if self.reaper.interval_ms == 0 {
            return Err(QueueError::InvalidConfig(
                "reaper.interval_ms must be > 0".into(),
            ));
        }
        // Expired leases must be noticed well inside one lease window.
        if self.reaper.interval_ms as i64 * 2 > self.queues.inflight_timeout_ms {
            return Err(QueueError::InvalidConfig(format!(
                "reaper.interval_ms ({}) must be at most half of queues.inflight_timeout_ms ({})",
                self.reaper.interval_ms, self.queues.inflight_timeout_ms
            )));
        }

        if self.actor.mailbox_bound == 0 {
            return Err(QueueError::InvalidConfig(
                "actor.mailbox_bound must be > 0".into(),
            ));
        }
        if self.actor.request_timeout_ms == 0 {
            return Err(QueueError::InvalidConfig(
                "actor.request_timeout_ms must be > 0".into(),
            ));
        }

        if self.gc.body_retention_ms <= 0 {
            return Err(QueueError::InvalidConfig(
                "gc.body_retention_ms must be > 0".into(),
            ));
        }
        if self.gc.interval_ms == 0 || self.gc.page_size == 0 {
            return Err(QueueError::InvalidConfig(
                "gc.interval_ms and gc.page_size must be > 0".into(),
            ));
        }

        if self.storage.hosts.is_empty() {
            return Err(QueueError::InvalidConfig(
                "storage.hosts must list at least one node".into(),
            ));
        }
        // Keyspace lands in DDL text; restrict to identifier characters.
        if self.storage.keyspace.is_empty()
            || !self
                .storage
                .keyspace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(QueueError::InvalidConfig(format!(
                "storage.keyspace '{}' must be a plain identifier",
                self.storage.keyspace
            )));
        }
        if self.storage.replication_factor == 0 {
            return Err(QueueError::InvalidConfig(
                "storage.replication_factor must be > 0".into(),
            ));
        }

        Ok(())
    }
}

const APP_CONFIG_PATH: &str = "config/shardmq.toml";

pub fn load_app_config(path: Option<&str>) -> QueueResult<AppConfig> {
    let path = match path {
        Some(p) => p.to_string(),
        None => env::var("SHARDMQ_CONFIG").unwrap_or_else(|_| APP_CONFIG_PATH.to_string()),
    };
    let contents = fs::read_to_string(&path)?; // QueueError::ConfigIo
    let config: AppConfig = toml::from_str(&contents)?; // QueueError::ConfigToml
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(region: &str) -> AppConfig {
        toml::from_str(&format!("region_local = \"{region}\"")).unwrap()
    }

    #[test]
    fn defaults_match_recognized_options() {
        let cfg = minimal("us-east");
        assert_eq!(cfg.queues.inflight_timeout_ms, 5_000);
        assert_eq!(cfg.queues.delivery_delay_ms, 0);
        assert_eq!(cfg.queues.shard_max_size, 100_000);
        assert_eq!(cfg.counter.flush_interval_ms, 1_000);
        assert_eq!(cfg.reaper.interval_ms, 2_000);
        assert_eq!(cfg.actor.mailbox_bound, 10_000);
        cfg.validate().unwrap();
    }

    #[test]
    fn regions_are_local_first_and_deduped() {
        let cfg: AppConfig = toml::from_str(
            r#"
            region_local = "us-east"
            regions_replicated = ["eu-west", "us-east", "eu-west"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.regions(), vec!["us-east", "eu-west"]);
    }

    #[test]
    fn reaper_interval_must_fit_the_lease_window() {
        let cfg: AppConfig = toml::from_str(
            r#"
            region_local = "us-east"
            [queues]
            inflight_timeout_ms = 1000
            [reaper]
            interval_ms = 900
            "#,
        )
        .unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(QueueError::InvalidConfig(_))
        ));
    }

    #[test]
    fn keyspace_must_be_an_identifier() {
        let cfg: AppConfig = toml::from_str(
            r#"
            region_local = "us-east"
            [storage]
            keyspace = "bad-name; DROP"
            "#,
        )
        .unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(QueueError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_region_is_rejected() {
        let cfg = minimal(" ");
        assert!(matches!(
            cfg.validate(),
            Err(QueueError::MissingConfig("region_local"))
        ));
    }
}
