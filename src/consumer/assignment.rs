//! Partition assignment.
//!
//! Each operation takes its partition list by value. On success the list
//! moves into (or is matched against) the partition set; on failure it is
//! dropped. Callers never keep a handle on entries the set owns.

use super::{validate_partitions, KafkaConsumer};
use crate::error::Result;
use crate::events::ConsumerEvent;
use crate::types::TopicPartition;
use tracing::{debug, info};

impl KafkaConsumer {
    /// Replaces the whole assignment.
    pub fn assign(&self, partitions: Vec<TopicPartition>) -> Result<()> {
        let client = self.inner.connection.connected()?;
        validate_partitions(&partitions)?;
        client.assign(&partitions)?;

        let count = partitions.len();
        self.inner.partitions.lock().replace(partitions);

        info!("Assigned {} partitions", count);
        self.inner
            .events
            .publish(ConsumerEvent::Assigned { partitions: count });
        Ok(())
    }

    /// Drops the whole assignment. Allowed while closing.
    pub fn unassign(&self) -> Result<()> {
        let client = self.inner.connection.connected_or_closing()?;
        client.unassign()?;

        self.inner.partitions.lock().clear();

        info!("Unassigned all partitions");
        self.inner.events.publish(ConsumerEvent::Unassigned);
        Ok(())
    }

    /// Adds partitions to the current assignment.
    pub fn incremental_assign(&self, partitions: Vec<TopicPartition>) -> Result<()> {
        let client = self.inner.connection.connected()?;
        validate_partitions(&partitions)?;
        client.incremental_assign(&partitions)?;

        let added = partitions.len();
        let total = {
            let mut set = self.inner.partitions.lock();
            set.extend(partitions);
            set.count()
        };

        debug!("Incrementally assigned {} partitions ({} total)", added, total);
        self.inner
            .events
            .publish(ConsumerEvent::IncrementalAssigned { added, total });
        Ok(())
    }

    /// Removes partitions from the current assignment. Allowed while closing.
    ///
    /// Entries that match nothing in the partition set are ignored.
    pub fn incremental_unassign(&self, partitions: Vec<TopicPartition>) -> Result<()> {
        let client = self.inner.connection.connected_or_closing()?;
        validate_partitions(&partitions)?;
        client.incremental_unassign(&partitions)?;

        let requested = partitions.len();
        let (unmatched, total) = {
            let mut set = self.inner.partitions.lock();
            let unmatched = set.remove_matching(partitions);
            (unmatched, set.count())
        };

        if !unmatched.is_empty() {
            debug!(
                "Ignoring {} partitions that were not assigned: {:?}",
                unmatched.len(),
                unmatched.iter().map(ToString::to_string).collect::<Vec<_>>()
            );
        }

        let removed = requested - unmatched.len();
        debug!("Incrementally unassigned {} partitions ({} total)", removed, total);
        self.inner
            .events
            .publish(ConsumerEvent::IncrementalUnassigned { removed, total });
        Ok(())
    }

    /// Resyncs the partition set from the client's authoritative assignment.
    pub fn refresh_assignments(&self) -> Result<()> {
        let client = self.inner.connection.connected()?;
        let current = client.assignment()?;

        let count = current.len();
        self.inner.partitions.lock().replace(current);
        debug!("Refreshed assignment: {} partitions", count);
        Ok(())
    }

    /// Refreshes, then returns a copy of the assignment.
    pub fn assignments(&self) -> Result<Vec<TopicPartition>> {
        self.refresh_assignments()?;
        Ok(self.inner.partitions.lock().snapshot())
    }

    pub fn has_assigned_partitions(&self) -> bool {
        self.assigned_partition_count() > 0
    }

    pub fn assigned_partition_count(&self) -> usize {
        self.inner.partitions.lock().count()
    }
}
