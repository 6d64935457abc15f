use crate::{
    client::ClientFactory,
    config::ConsumerConfig,
    connection::{Connection, ConnectionState},
    consume_loop::LoopSlot,
    error::{ConsumerError, Result},
    events::{ConsumerEvent, EventDispatcher},
    metrics::{ConsumerMetrics, MetricsSnapshot},
    partition_set::PartitionSet,
    types::{Offset, TopicPartition, PARTITION_UNASSIGNED},
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

mod assignment;
mod commit;
mod consume;
mod offsets;

/// Consumer control core.
///
/// Every operation is a blocking call on the underlying client handle, and
/// the value is cheap to clone so long-running calls can be moved onto a
/// [`TaskDispatcher`](crate::dispatch::TaskDispatcher) worker.
#[derive(Clone)]
pub struct KafkaConsumer {
    inner: Arc<ConsumerInner>,
}

struct ConsumerInner {
    config: ConsumerConfig,
    factory: Arc<dyn ClientFactory>,
    connection: Connection,
    partitions: Mutex<PartitionSet>,
    subscribed: AtomicBool,
    events: EventDispatcher,
    metrics: ConsumerMetrics,
    consume_loop: LoopSlot,
}

/// Builder for creating consumers
#[derive(Default)]
pub struct KafkaConsumerBuilder {
    config: Option<ConsumerConfig>,
    factory: Option<Arc<dyn ClientFactory>>,
}

impl KafkaConsumerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set consumer configuration
    pub fn config(mut self, config: ConsumerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the factory that creates client handles
    pub fn factory<F: ClientFactory + 'static>(mut self, factory: F) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn build(self) -> Result<KafkaConsumer> {
        let factory = self.factory.ok_or_else(|| {
            ConsumerError::Config("Client factory is required".to_string())
        })?;

        let config = self.config.unwrap_or_default();
        config.validate()?;

        Ok(KafkaConsumer {
            inner: Arc::new(ConsumerInner {
                config,
                factory,
                connection: Connection::new(),
                partitions: Mutex::new(PartitionSet::new()),
                subscribed: AtomicBool::new(false),
                events: EventDispatcher::default(),
                metrics: ConsumerMetrics::new(),
                consume_loop: LoopSlot::default(),
            }),
        })
    }
}

impl KafkaConsumer {
    pub fn builder() -> KafkaConsumerBuilder {
        KafkaConsumerBuilder::new()
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.inner.config
    }

    /// Name the current client registered under, if it ever connected
    pub fn name(&self) -> Option<String> {
        self.inner.events.client_name()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub fn is_closing(&self) -> bool {
        self.inner.connection.is_closing()
    }

    /// Creates the client handle. A no-op when already connected.
    ///
    /// Partitions left in the partition set by an earlier session are
    /// resumed on the new handle.
    pub fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.connection.is_connected() {
            return Ok(());
        }

        inner.factory.prepare(&inner.config)?;

        let client = match inner
            .connection
            .install(|| inner.factory.create(&inner.config))?
        {
            Some(client) => client,
            None => return Ok(()),
        };

        let name = client.name();
        inner.events.set_client_name(&name);

        if let Err(e) = inner.factory.on_connected(client.as_ref()) {
            warn!("Post-connect hook failed for {}: {}", name, e);
        }

        let mut previous = inner.partitions.lock().snapshot();
        if !previous.is_empty() {
            let guard = inner.connection.connected()?;
            match guard.resume(&mut previous) {
                Ok(()) => debug!("Resumed {} previously assigned partitions", previous.len()),
                Err(e) => warn!("Failed to resume previous partitions: {}", e),
            }
        }

        info!("Consumer {} connected", name);
        inner.events.publish(ConsumerEvent::Connected { client_name: name });
        Ok(())
    }

    /// Closes the client handle. Safe to call when already disconnected.
    ///
    /// A running consume loop is stopped first, waiting up to the configured
    /// stop timeout for its last iteration; if it does not exit in time the
    /// call fails with a state error and the handle stays open. Entering
    /// Closing waits for any poll still holding the handle. The state always
    /// ends in Disconnected, and a close failure is still returned.
    ///
    /// This blocks the calling thread. With a loop running, call it from a
    /// blocking context, or use [`ConsumerTasks::disconnect`](crate::tasks::ConsumerTasks::disconnect).
    pub fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        inner
            .consume_loop
            .stop_blocking(inner.config.loop_stop_timeout())?;

        let Some(client) = inner.connection.begin_close() else {
            return Ok(());
        };

        let closed = client.close();
        drop(client);
        inner.connection.finish_close();
        inner.subscribed.store(false, Ordering::SeqCst);

        match closed {
            Ok(()) => {
                info!("Consumer disconnected");
                inner.events.publish(ConsumerEvent::Disconnected { error: None });
                Ok(())
            }
            Err(e) => {
                warn!("Error closing consumer: {}", e);
                inner.events.publish(ConsumerEvent::Disconnected {
                    error: Some(e.to_string()),
                });
                Err(e.into())
            }
        }
    }

    pub fn subscribe(&self, topics: Vec<String>) -> Result<()> {
        let client = self.inner.connection.connected()?;
        if topics.is_empty() {
            return Err(ConsumerError::Validation(
                "topic list cannot be empty".to_string(),
            ));
        }
        if topics.iter().any(|t| t.trim().is_empty()) {
            return Err(ConsumerError::Validation(
                "topic name cannot be empty".to_string(),
            ));
        }

        client.subscribe(&topics)?;
        self.inner.subscribed.store(true, Ordering::SeqCst);

        info!("Subscribed to {:?}", topics);
        self.inner.events.publish(ConsumerEvent::Subscribed { topics });
        Ok(())
    }

    /// Drops the subscription. Succeeds without doing anything unless the
    /// consumer is connected and subscribed.
    pub fn unsubscribe(&self) -> Result<()> {
        if !self.is_subscribed() {
            return Ok(());
        }

        let client = self.inner.connection.connected()?;
        client.unsubscribe()?;
        self.inner.subscribed.store(false, Ordering::SeqCst);

        self.inner.events.publish(ConsumerEvent::Unsubscribed);
        Ok(())
    }

    pub fn is_subscribed(&self) -> bool {
        self.is_connected() && self.inner.subscribed.load(Ordering::SeqCst)
    }

    /// Current topic subscription, freshly fetched.
    pub fn subscription(&self) -> Result<Vec<String>> {
        let client = self.inner.connection.connected()?;
        Ok(client.subscription()?)
    }

    pub fn activate_dispatchers(&self) {
        self.inner.events.activate();
    }

    pub fn deactivate_dispatchers(&self) {
        self.inner.events.deactivate();
    }

    /// Listens for lifecycle events. Nothing is delivered until
    /// [`activate_dispatchers`](Self::activate_dispatchers) is called.
    pub fn events(&self) -> broadcast::Receiver<ConsumerEvent> {
        self.inner.events.listen()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub(crate) fn publish_event(&self, event: ConsumerEvent) {
        self.inner.events.publish(event);
    }

    pub(crate) fn consume_loop_slot(&self) -> &LoopSlot {
        &self.inner.consume_loop
    }
}

/// Rejects descriptors with an empty topic, an out-of-range partition or a
/// negative absolute offset.
fn validate_partitions(partitions: &[TopicPartition]) -> Result<()> {
    for tp in partitions {
        validate_partition(tp)?;
    }
    Ok(())
}

fn validate_partition(tp: &TopicPartition) -> Result<()> {
    if tp.topic.is_empty() {
        return Err(ConsumerError::Validation(
            "topic name cannot be empty".to_string(),
        ));
    }
    if tp.partition < PARTITION_UNASSIGNED {
        return Err(ConsumerError::Validation(format!(
            "invalid partition {} for topic {}",
            tp.partition, tp.topic
        )));
    }
    if let Offset::Offset(n) = tp.offset {
        if n < 0 {
            return Err(ConsumerError::Validation(format!(
                "invalid offset {} for {}",
                n, tp
            )));
        }
    }
    Ok(())
}
