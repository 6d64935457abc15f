//! Ordered set of partitions currently assigned to a consumer.
//!
//! Entries are owned values. Every mutation either takes ownership of the
//! incoming list or drops the removed entries before returning, so nothing
//! outside the set ever aliases an entry it holds.

use crate::types::TopicPartition;

/// Assigned partitions with an independently tracked count.
///
/// `count() == len()` holds after every mutating call.
#[derive(Debug, Clone, Default)]
pub struct PartitionSet {
    entries: Vec<TopicPartition>,
    count: usize,
}

impl PartitionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of assigned partitions
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicPartition> {
        self.entries.iter()
    }

    pub fn contains(&self, topic: &str, partition: i32) -> bool {
        self.entries
            .iter()
            .any(|tp| tp.partition == partition && tp.topic == topic)
    }

    /// Fresh copies of the current entries.
    pub fn snapshot(&self) -> Vec<TopicPartition> {
        self.entries.clone()
    }

    /// Replaces the whole set, dropping the previous entries.
    pub fn replace(&mut self, partitions: Vec<TopicPartition>) {
        self.count = partitions.len();
        self.entries = partitions;
        self.check_invariant();
    }

    /// Appends without checking for duplicates.
    pub fn extend(&mut self, partitions: Vec<TopicPartition>) {
        self.count += partitions.len();
        self.entries.extend(partitions);
        self.check_invariant();
    }

    /// Removes the first entry matching each element of `partitions` by
    /// `(topic, partition)`. Returns the elements that matched nothing.
    pub fn remove_matching(&mut self, partitions: Vec<TopicPartition>) -> Vec<TopicPartition> {
        let mut unmatched = Vec::new();

        for target in partitions {
            match self.entries.iter().position(|tp| tp.same_partition(&target)) {
                Some(index) => {
                    self.entries.remove(index);
                    self.count -= 1;
                }
                None => unmatched.push(target),
            }
        }

        self.check_invariant();
        unmatched
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.count = 0;
    }

    fn check_invariant(&self) {
        debug_assert_eq!(self.count, self.entries.len(), "partition count drifted");
    }
}
