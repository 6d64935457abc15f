//! Long-running consumer operations run through a [`TaskDispatcher`].
//!
//! Every method returns immediately. The result reaches the callback when
//! the caller drains the dispatcher's completion queue.

use crate::consume_loop::{self, LoopSettings};
use crate::consumer::KafkaConsumer;
use crate::dispatch::TaskDispatcher;
use crate::error::{ConsumerError, Result};
use crate::events::ConsumerEvent;
use crate::types::{CommitMode, ConsumedBatch, Message, TopicPartition, WatermarkOffsets};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ConsumerTasks {
    consumer: KafkaConsumer,
    dispatcher: TaskDispatcher,
}

impl ConsumerTasks {
    pub fn new(consumer: KafkaConsumer, dispatcher: TaskDispatcher) -> Self {
        Self {
            consumer,
            dispatcher,
        }
    }

    pub fn consumer(&self) -> &KafkaConsumer {
        &self.consumer
    }

    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    pub fn connect<F>(&self, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let consumer = self.consumer.clone();
        self.dispatcher.submit(move || consumer.connect(), callback);
    }

    /// Stops the consume loop, then disconnects. If the loop does not stop
    /// within the configured timeout the handle is left open and the
    /// callback receives the state error.
    pub fn disconnect<F>(&self, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let tasks = self.clone();
        let work = async move {
            if let Err(e) = tasks.stop_consume_loop().await {
                warn!("Not disconnecting, consume loop still running: {}", e);
                return Err(e);
            }
            let consumer = tasks.consumer.clone();
            tasks.dispatcher.run(move || consumer.disconnect()).await
        };
        self.dispatcher.submit_async(work, callback);
    }

    pub fn consume<F>(&self, timeout: Duration, callback: F)
    where
        F: FnOnce(Result<Message>) + Send + 'static,
    {
        let consumer = self.consumer.clone();
        self.dispatcher
            .submit(move || consumer.consume(timeout), callback);
    }

    pub fn consume_num<F>(
        &self,
        count: usize,
        timeout: Duration,
        timeout_only_for_first_message: bool,
        callback: F,
    ) where
        F: FnOnce(Result<ConsumedBatch>) + Send + 'static,
    {
        let consumer = self.consumer.clone();
        self.dispatcher.submit(
            move || consumer.consume_num(count, timeout, timeout_only_for_first_message),
            callback,
        );
    }

    /// Starts the background consume loop.
    ///
    /// Fails with a state error when disconnected or when a loop is already
    /// running. `None` for either duration falls back to the configured
    /// default.
    pub fn consume_loop<F>(
        &self,
        timeout: Option<Duration>,
        sleep_delay: Option<Duration>,
        callback: F,
    ) -> Result<()>
    where
        F: Fn(Result<Message>) + Send + Sync + 'static,
    {
        if !self.consumer.is_connected() {
            return Err(ConsumerError::disconnected());
        }

        let config = self.consumer.config();
        let settings = LoopSettings {
            timeout: config.clamp_timeout(timeout.unwrap_or_else(|| config.consume_timeout())),
            sleep_delay: sleep_delay.unwrap_or_else(|| config.loop_sleep_delay()),
        };

        let consumer = self.consumer.clone();
        let dispatcher = self.dispatcher.clone();
        let callback: consume_loop::LoopCallback = Arc::new(callback);

        self.consumer
            .consume_loop_slot()
            .start(self.dispatcher.runtime(), move |token| {
                consume_loop::run(consumer, dispatcher, token, settings, callback)
            })?;

        self.consumer.publish_event(ConsumerEvent::ConsumeLoopStarted);
        Ok(())
    }

    pub fn is_consume_loop_running(&self) -> bool {
        self.consumer.consume_loop_slot().is_running()
    }

    /// Cancels the consume loop and waits for its in-flight iteration, up to
    /// the configured stop timeout.
    pub async fn stop_consume_loop(&self) -> Result<()> {
        let wait = self.consumer.config().loop_stop_timeout();
        if self.is_consume_loop_running() {
            info!("Stopping consume loop");
        }
        self.consumer.consume_loop_slot().stop(wait).await
    }

    /// Synchronous commit with the outcome delivered to `callback`.
    /// `None` commits the current positions of all assigned partitions.
    pub fn commit_cb<F>(&self, offsets: Option<Vec<TopicPartition>>, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let consumer = self.consumer.clone();
        self.dispatcher
            .submit(move || consumer.commit_with(offsets, CommitMode::Sync), callback);
    }

    /// Seek with the default timeout when `timeout` is `None`.
    pub fn seek<F>(&self, partition: TopicPartition, timeout: Option<Duration>, callback: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let consumer = self.consumer.clone();
        let timeout = timeout.unwrap_or_else(|| self.consumer.config().seek_timeout());
        self.dispatcher
            .submit(move || consumer.seek(partition, timeout), callback);
    }

    pub fn committed<F>(
        &self,
        partitions: Vec<TopicPartition>,
        timeout: Option<Duration>,
        callback: F,
    ) where
        F: FnOnce(Result<Vec<TopicPartition>>) + Send + 'static,
    {
        let consumer = self.consumer.clone();
        let timeout = timeout.unwrap_or_else(|| self.consumer.config().committed_timeout());
        self.dispatcher
            .submit(move || consumer.committed(partitions, timeout), callback);
    }

    /// Offsets-for-times lookup with the committed-lookup timeout when
    /// `timeout` is `None`.
    pub fn offsets_for_times<F>(
        &self,
        partitions: Vec<TopicPartition>,
        timeout: Option<Duration>,
        callback: F,
    ) where
        F: FnOnce(Result<Vec<TopicPartition>>) + Send + 'static,
    {
        let consumer = self.consumer.clone();
        let timeout = timeout.unwrap_or_else(|| self.consumer.config().committed_timeout());
        self.dispatcher
            .submit(move || consumer.offsets_for_times(partitions, timeout), callback);
    }

    pub fn query_watermark_offsets<F>(
        &self,
        topic: String,
        partition: i32,
        timeout: Duration,
        callback: F,
    ) where
        F: FnOnce(Result<WatermarkOffsets>) + Send + 'static,
    {
        let consumer = self.consumer.clone();
        self.dispatcher.submit(
            move || consumer.query_watermark_offsets(&topic, partition, timeout),
            callback,
        );
    }
}
