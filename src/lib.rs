pub mod actor;
pub mod appconfig;
pub mod audit;
pub mod cli;
pub mod error;
pub mod messages;
pub mod metrics;
pub mod metrics_server;
pub mod reaper;
pub mod service;
pub mod shard;
pub mod store;
pub mod timeuuid;

pub use actor::{DeliveredMessage, MessageToken};
pub use error::{QueueError, QueueResult, ServiceStatus};
pub use service::{DistributedQueueService, QueueDefinition};
