use super::KafkaConsumer;
use crate::error::{ConsumerError, ErrorCode, NativeError, Result};
use crate::types::{ConsumedBatch, Message};
use std::time::Duration;
use tracing::{debug, trace};

impl KafkaConsumer {
    /// Polls a single message.
    ///
    /// End-of-partition and timeout results are successes: the returned
    /// message carries the sub-code. Any other poll error is returned as a
    /// protocol error.
    pub fn consume(&self, timeout: Duration) -> Result<Message> {
        // Cheap check before contending for the lock
        if !self.is_connected() {
            return Err(ConsumerError::disconnected());
        }

        let client = self.inner.connection.connected()?;
        let message = client.poll(self.inner.config.clamp_timeout(timeout));
        drop(client);

        self.inner.metrics.record_poll(&message);

        match message.error {
            ErrorCode::NoError
            | ErrorCode::PartitionEof
            | ErrorCode::TimedOut
            | ErrorCode::TimedOutQueue => Ok(message),
            code => {
                self.inner.metrics.record_consume_error();
                trace!("Poll failed: {}", code);
                Err(ConsumerError::Protocol(NativeError::new(code)))
            }
        }
    }

    /// Polls up to `count` messages.
    ///
    /// With `timeout_only_for_first_message`, once a message has arrived the
    /// remaining polls use the minimum timeout, so the call returns whatever
    /// is ready. EOF markers do not count toward `count`; their partitions
    /// are reported in [`ConsumedBatch::eof_partitions`].
    pub fn consume_num(
        &self,
        count: usize,
        timeout: Duration,
        timeout_only_for_first_message: bool,
    ) -> Result<ConsumedBatch> {
        let mut batch = ConsumedBatch::default();
        let mut timeout = timeout;

        while batch.messages.len() < count {
            let message = match self.consume(timeout) {
                Ok(message) => message,
                Err(e) if batch.messages.is_empty() => return Err(e),
                Err(e) => {
                    debug!("Ending batch of {} after error: {}", batch.len(), e);
                    break;
                }
            };

            if message.is_timeout() {
                break;
            }

            if message.is_eof() {
                batch.eof_partitions.push(message.topic_partition());
            } else {
                batch.messages.push(message);
            }

            if timeout_only_for_first_message && !batch.messages.is_empty() {
                timeout = self.inner.config.min_timeout();
            }
        }

        Ok(batch)
    }
}
