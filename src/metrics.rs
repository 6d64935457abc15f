use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::Message;

/// Consumer counters, updated lock-free from any thread
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    messages_consumed: AtomicU64,
    bytes_consumed: AtomicU64,
    partition_eofs: AtomicU64,
    poll_timeouts: AtomicU64,
    consume_errors: AtomicU64,
    commits_submitted: AtomicU64,
    commit_failures: AtomicU64,
}

/// Point-in-time copy of [`ConsumerMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub messages_consumed: u64,
    pub bytes_consumed: u64,
    pub partition_eofs: u64,
    pub poll_timeouts: u64,
    pub consume_errors: u64,
    pub commits_submitted: u64,
    pub commit_failures: u64,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of a single poll.
    pub fn record_poll(&self, message: &Message) {
        if message.has_data() {
            self.messages_consumed.fetch_add(1, Ordering::Relaxed);
            self.bytes_consumed
                .fetch_add(message.size() as u64, Ordering::Relaxed);
        } else if message.is_eof() {
            self.partition_eofs.fetch_add(1, Ordering::Relaxed);
        } else if message.is_timeout() {
            self.poll_timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_consume_error(&self) {
        self.consume_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit(&self, succeeded: bool) {
        self.commits_submitted.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.commit_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            bytes_consumed: self.bytes_consumed.load(Ordering::Relaxed),
            partition_eofs: self.partition_eofs.load(Ordering::Relaxed),
            poll_timeouts: self.poll_timeouts.load(Ordering::Relaxed),
            consume_errors: self.consume_errors.load(Ordering::Relaxed),
            commits_submitted: self.commits_submitted.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
        }
    }
}
