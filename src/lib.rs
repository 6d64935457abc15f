//! Consumer control core for Kafka clients
//!
//! Sequences high-level consumer operations against a pluggable,
//! blocking partitioned-log client, with a background consume loop and a
//! bounded pool of task workers.

pub mod client;
pub mod config;
pub mod connection;
pub mod consume_loop;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod metrics;
pub mod partition_set;
pub mod tasks;
pub mod types;

pub use client::{ClientFactory, ConsumerClient, InMemoryClientFactory, InMemoryCluster};
pub use config::ConsumerConfig;
pub use connection::ConnectionState;
pub use consumer::{KafkaConsumer, KafkaConsumerBuilder};
pub use dispatch::{CompletionQueue, TaskDispatcher};
pub use error::{ConsumerError, ErrorCode, ErrorKind, NativeError, Result};
pub use events::ConsumerEvent;
pub use metrics::MetricsSnapshot;
pub use partition_set::PartitionSet;
pub use tasks::ConsumerTasks;
pub use types::*;
