use super::{validate_partitions, KafkaConsumer};
use crate::error::Result;
use crate::types::{CommitMode, TopicPartition};
use tracing::debug;

/// Commit operations. The plain forms only report whether the commit could
/// be enqueued; the `_sync` forms block until the broker answers.
impl KafkaConsumer {
    /// Commits the consumed positions of every assigned partition.
    pub fn commit(&self) -> Result<()> {
        self.commit_with(None, CommitMode::Async)
    }

    pub fn commit_partition(&self, partition: TopicPartition) -> Result<()> {
        self.commit_with(Some(vec![partition]), CommitMode::Async)
    }

    pub fn commit_partitions(&self, partitions: Vec<TopicPartition>) -> Result<()> {
        self.commit_with(Some(partitions), CommitMode::Async)
    }

    pub fn commit_sync(&self) -> Result<()> {
        self.commit_with(None, CommitMode::Sync)
    }

    pub fn commit_partition_sync(&self, partition: TopicPartition) -> Result<()> {
        self.commit_with(Some(vec![partition]), CommitMode::Sync)
    }

    pub fn commit_partitions_sync(&self, partitions: Vec<TopicPartition>) -> Result<()> {
        self.commit_with(Some(partitions), CommitMode::Sync)
    }

    pub(crate) fn commit_with(
        &self,
        offsets: Option<Vec<TopicPartition>>,
        mode: CommitMode,
    ) -> Result<()> {
        let client = self.inner.connection.connected()?;
        if let Some(list) = &offsets {
            validate_partitions(list)?;
        }

        let result = client.commit(offsets.as_deref(), mode);
        self.inner.metrics.record_commit(result.is_ok());

        match &offsets {
            Some(list) => debug!("{:?} commit of {} offsets: {:?}", mode, list.len(), result),
            None => debug!("{:?} commit of current positions: {:?}", mode, result),
        }
        Ok(result?)
    }
}
