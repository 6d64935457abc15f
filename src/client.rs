//! Boundary to the underlying partitioned-log client.
//!
//! The consumer core never talks to brokers itself. It drives a
//! [`ConsumerClient`] handle created by a [`ClientFactory`], and every call on
//! the handle is blocking.

pub mod memory;

use crate::config::ConsumerConfig;
use crate::error::NativeError;
use crate::types::{CommitMode, Message, TopicPartition, WatermarkOffsets};
use std::sync::Arc;
use std::time::Duration;

pub use memory::{InMemoryClient, InMemoryClientFactory, InMemoryCluster, Operation};

/// Result type returned by client primitives
pub type ClientResult<T> = std::result::Result<T, NativeError>;

/// A live consumer handle on the underlying client.
///
/// Calls that take a mutable partition slice write per-partition results
/// (offsets, error codes) back into it.
pub trait ConsumerClient: Send + Sync {
    /// Name the client registered itself under
    fn name(&self) -> String;

    /// Leaves the group and shuts the handle down
    fn close(&self) -> ClientResult<()>;

    fn subscribe(&self, topics: &[String]) -> ClientResult<()>;
    fn unsubscribe(&self) -> ClientResult<()>;
    fn subscription(&self) -> ClientResult<Vec<String>>;

    fn assign(&self, partitions: &[TopicPartition]) -> ClientResult<()>;
    fn unassign(&self) -> ClientResult<()>;
    fn incremental_assign(&self, partitions: &[TopicPartition]) -> ClientResult<()>;
    fn incremental_unassign(&self, partitions: &[TopicPartition]) -> ClientResult<()>;

    /// Authoritative current assignment
    fn assignment(&self) -> ClientResult<Vec<TopicPartition>>;

    /// Commits `offsets`, or the current consumed positions when `None`
    fn commit(&self, offsets: Option<&[TopicPartition]>, mode: CommitMode) -> ClientResult<()>;
    fn committed(&self, partitions: &mut [TopicPartition], timeout: Duration) -> ClientResult<()>;
    fn position(&self, partitions: &mut [TopicPartition]) -> ClientResult<()>;
    fn seek(&self, partition: &TopicPartition, timeout: Duration) -> ClientResult<()>;

    fn pause(&self, partitions: &mut [TopicPartition]) -> ClientResult<()>;
    fn resume(&self, partitions: &mut [TopicPartition]) -> ClientResult<()>;
    fn offsets_store(&self, offsets: &mut [TopicPartition]) -> ClientResult<()>;

    /// Replaces each entry's offset, read as a millisecond timestamp, with
    /// the earliest offset whose record timestamp is at or after it.
    /// Partitions with no such record get [`Offset::End`](crate::types::Offset::End).
    fn offsets_for_times(
        &self,
        partitions: &mut [TopicPartition],
        timeout: Duration,
    ) -> ClientResult<()>;

    /// Polls one message. The returned message's `error` is the poll result
    /// code; timeouts and EOF come back as marker messages.
    fn poll(&self, timeout: Duration) -> Message;

    /// Locally cached watermarks
    fn get_watermark_offsets(&self, topic: &str, partition: i32) -> ClientResult<WatermarkOffsets>;

    /// Watermarks fetched from the partition leader
    fn query_watermark_offsets(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> ClientResult<WatermarkOffsets>;

    fn rebalance_protocol(&self) -> String;
}

/// Creates client handles for a consumer.
pub trait ClientFactory: Send + Sync {
    /// Credential setup run before every handle creation
    fn prepare(&self, _config: &ConsumerConfig) -> ClientResult<()> {
        Ok(())
    }

    /// Builds a new handle, or returns the client's error string
    fn create(&self, config: &ConsumerConfig) -> std::result::Result<Arc<dyn ConsumerClient>, String>;

    /// Hook run once a handle is installed
    fn on_connected(&self, _client: &dyn ConsumerClient) -> ClientResult<()> {
        Ok(())
    }
}
