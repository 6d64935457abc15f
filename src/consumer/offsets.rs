use super::{validate_partition, validate_partitions, KafkaConsumer};
use crate::error::{ConsumerError, Result};
use crate::types::{Offset, RebalanceProtocol, TopicPartition, WatermarkOffsets};
use std::time::Duration;

impl KafkaConsumer {
    /// Moves the consume position of an assigned partition.
    pub fn seek(&self, partition: TopicPartition, timeout: Duration) -> Result<()> {
        let client = self.inner.connection.connected()?;
        validate_partition(&partition)?;
        client.seek(&partition, self.inner.config.clamp_timeout(timeout))?;
        Ok(())
    }

    /// Looks up the group's committed offsets for `partitions`.
    pub fn committed(
        &self,
        mut partitions: Vec<TopicPartition>,
        timeout: Duration,
    ) -> Result<Vec<TopicPartition>> {
        let client = self.inner.connection.connected()?;
        validate_partitions(&partitions)?;
        client.committed(&mut partitions, self.inner.config.clamp_timeout(timeout))?;
        Ok(partitions)
    }

    /// Current consume positions. Partitions the client does not know come
    /// back with their `error` set.
    pub fn position(&self, mut partitions: Vec<TopicPartition>) -> Result<Vec<TopicPartition>> {
        let client = self.inner.connection.connected()?;
        validate_partitions(&partitions)?;
        client.position(&mut partitions)?;
        Ok(partitions)
    }

    /// Pauses fetching. The per-partition outcome is in each entry's `error`.
    pub fn pause(&self, mut partitions: Vec<TopicPartition>) -> Result<Vec<TopicPartition>> {
        let client = self.inner.connection.connected()?;
        validate_partitions(&partitions)?;
        client.pause(&mut partitions)?;
        Ok(partitions)
    }

    pub fn resume(&self, mut partitions: Vec<TopicPartition>) -> Result<Vec<TopicPartition>> {
        let client = self.inner.connection.connected()?;
        validate_partitions(&partitions)?;
        client.resume(&mut partitions)?;
        Ok(partitions)
    }

    /// Stores offsets for the next commit. Requires a subscription.
    pub fn offsets_store(&self, mut offsets: Vec<TopicPartition>) -> Result<Vec<TopicPartition>> {
        if !self.is_subscribed() {
            return Err(ConsumerError::State(
                "KafkaConsumer is not subscribed".to_string(),
            ));
        }

        let client = self.inner.connection.connected()?;
        validate_partitions(&offsets)?;
        client.offsets_store(&mut offsets)?;
        Ok(offsets)
    }

    pub fn offsets_store_single(
        &self,
        topic: &str,
        partition: i32,
        offset: i64,
        leader_epoch: Option<i32>,
    ) -> Result<()> {
        let mut tp = TopicPartition::new(topic, partition).with_offset(Offset::from_raw(offset));
        tp.leader_epoch = leader_epoch;
        self.offsets_store(vec![tp]).map(|_| ())
    }

    /// Looks up, per partition, the earliest offset whose timestamp is at or
    /// after the millisecond timestamp given as the entry's offset.
    pub fn offsets_for_times(
        &self,
        mut partitions: Vec<TopicPartition>,
        timeout: Duration,
    ) -> Result<Vec<TopicPartition>> {
        let client = self.inner.connection.connected()?;
        validate_partitions(&partitions)?;
        client.offsets_for_times(&mut partitions, self.inner.config.clamp_timeout(timeout))?;
        Ok(partitions)
    }

    /// Watermarks cached by the client, without a broker round trip.
    pub fn get_watermark_offsets(&self, topic: &str, partition: i32) -> Result<WatermarkOffsets> {
        let client = self.inner.connection.connected()?;
        Ok(client.get_watermark_offsets(topic, partition)?)
    }

    /// Watermarks fetched from the partition leader.
    pub fn query_watermark_offsets(
        &self,
        topic: &str,
        partition: i32,
        timeout: Duration,
    ) -> Result<WatermarkOffsets> {
        let client = self.inner.connection.connected()?;
        let timeout = self.inner.config.clamp_timeout(timeout);
        Ok(client.query_watermark_offsets(topic, partition, timeout)?)
    }

    /// Protocol of the current group, `None` when disconnected.
    pub fn rebalance_protocol(&self) -> RebalanceProtocol {
        match self.inner.connection.connected() {
            Ok(client) => RebalanceProtocol::parse(&client.rebalance_protocol()),
            Err(_) => RebalanceProtocol::None,
        }
    }
}
