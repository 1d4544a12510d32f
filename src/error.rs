use thiserror::Error;

/// Crate-wide result type.
pub type QueueResult<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    // =========
    // Config / startup
    // =========
    #[error("Configuration file IO error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    ConfigToml(#[from] toml::de::Error),

    #[error("Missing configuration field: {0}")]
    MissingConfig(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =========
    // Storage
    // =========
    #[error("Storage error: {0}")]
    Storage(String),

    // =========
    // Queue-domain errors
    // =========
    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Actor mailbox full; caller may retry with backoff.
    #[error("Queue busy: {0}")]
    QueueBusy(String),

    #[error("Request deadline expired: {0}")]
    Timeout(String),

    #[error("Failed to spawn task: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Shutdown requested")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),

    // =========
    // Metrics / Prometheus
    // =========
    #[error("Prometheus registry error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

impl QueueError {
    /// Helper for wrapping driver errors at the storage boundary.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        QueueError::Storage(err.to_string())
    }

    /// The wire-level status this error maps to.
    pub fn status(&self) -> ServiceStatus {
        match self {
            QueueError::QueueNotFound(_) => ServiceStatus::NotFound,
            QueueError::BadRequest(_) => ServiceStatus::BadRequest,
            QueueError::QueueBusy(_) => ServiceStatus::QueueBusy,
            QueueError::Timeout(_) => ServiceStatus::Timeout,
            _ => ServiceStatus::InternalError,
        }
    }
}

/// Service-level response taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    Success,
    BadRequest,
    NotFound,
    /// Ack target exists but is not leased.
    NotInflight,
    QueueBusy,
    Timeout,
    InternalError,
}

impl ServiceStatus {
    /// Log / metrics-label friendly string.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Success => "success",
            ServiceStatus::BadRequest => "bad_request",
            ServiceStatus::NotFound => "not_found",
            ServiceStatus::NotInflight => "not_inflight",
            ServiceStatus::QueueBusy => "queue_busy",
            ServiceStatus::Timeout => "timeout",
            ServiceStatus::InternalError => "internal_error",
        }
    }
}
