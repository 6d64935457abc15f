#![allow(dead_code)]

use rustmq_kafka_consumer::{
    CompletionQueue, ConsumerConfig, ConsumerTasks, InMemoryClientFactory, InMemoryCluster,
    KafkaConsumer, TaskDispatcher, TopicPartition,
};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;

pub const SHORT: Duration = Duration::from_millis(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn test_config(properties: &[(&str, &str)]) -> ConsumerConfig {
    let mut config = ConsumerConfig {
        group_id: Some("it-group".to_string()),
        client_id: Some("it".to_string()),
        min_timeout_ms: 1,
        loop_stop_timeout_ms: 2000,
        ..Default::default()
    };
    for (key, value) in properties {
        config.properties.insert(key.to_string(), value.to_string());
    }
    config
}

/// Cluster with topic `t` (3 partitions) and a disconnected consumer on it.
pub fn consumer_with(properties: &[(&str, &str)]) -> (InMemoryCluster, KafkaConsumer) {
    consumer_from(test_config(properties))
}

pub fn consumer_from(config: ConsumerConfig) -> (InMemoryCluster, KafkaConsumer) {
    let cluster = InMemoryCluster::new();
    cluster.create_topic("t", 3);
    let consumer = KafkaConsumer::builder()
        .config(config)
        .factory(InMemoryClientFactory::new(cluster.clone()))
        .build()
        .expect("valid test config");
    (cluster, consumer)
}

pub fn tasks_for(consumer: &KafkaConsumer, workers: usize) -> (ConsumerTasks, CompletionQueue) {
    let (dispatcher, queue) = TaskDispatcher::new(Handle::current(), workers);
    (ConsumerTasks::new(consumer.clone(), dispatcher), queue)
}

pub fn tp(topic: &str, partition: i32) -> TopicPartition {
    TopicPartition::new(topic, partition)
}

/// Drains completions until `rx` has a value.
pub async fn complete<T>(queue: &mut CompletionQueue, mut rx: oneshot::Receiver<T>) -> T {
    loop {
        if let Ok(value) = rx.try_recv() {
            return value;
        }
        assert!(queue.run_next().await, "dispatcher dropped before completing");
    }
}

/// Drains completions until `done` holds or `deadline` passes.
pub async fn drain_until<F>(queue: &mut CompletionQueue, deadline: Duration, mut done: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < deadline {
        queue.run_pending();
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    queue.run_pending();
    done()
}
