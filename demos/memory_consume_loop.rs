// Runs the background consume loop against an in-memory cluster and prints
// what it delivered, plus the consumer's counters.

use rustmq_kafka_consumer::{
    ConsumerConfig, ConsumerTasks, InMemoryClientFactory, InMemoryCluster, KafkaConsumer,
    TaskDispatcher,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cluster = InMemoryCluster::new();
    cluster.create_topic("orders", 2);
    for i in 0..10 {
        let key = format!("order-{}", i);
        let payload = format!("{{\"id\":{}}}", i);
        cluster.produce("orders", i % 2, Some(key.as_bytes()), payload.as_bytes())?;
    }

    let config = ConsumerConfig {
        group_id: Some("demo-group".to_string()),
        client_id: Some("demo".to_string()),
        ..Default::default()
    };
    println!("Consumer configuration:\n{}", toml::to_string_pretty(&config)?);

    let consumer = KafkaConsumer::builder()
        .config(config)
        .factory(InMemoryClientFactory::new(cluster.clone()))
        .build()?;
    consumer.connect()?;
    consumer.subscribe(vec!["orders".to_string()])?;

    let (dispatcher, mut completions) = TaskDispatcher::new(Handle::current(), 2);
    let tasks = ConsumerTasks::new(consumer.clone(), dispatcher);

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    tasks.consume_loop(Some(Duration::from_millis(50)), None, move |result| match result {
        Ok(message) if message.has_data() => {
            counter.fetch_add(1, Ordering::SeqCst);
            println!(
                "{}[{}]@{}: {}",
                message.topic,
                message.partition,
                message.offset,
                String::from_utf8_lossy(message.payload.as_deref().unwrap_or_default())
            );
        }
        Ok(_) => {}
        Err(e) => eprintln!("consume failed: {}", e),
    })?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while received.load(Ordering::SeqCst) < 10 && tokio::time::Instant::now() < deadline {
        completions.run_pending();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    tasks.stop_consume_loop().await?;
    consumer.commit_sync()?;
    println!(
        "Committed orders[0] at {:?}",
        cluster.committed_offset("demo-group", "orders", 0)
    );
    consumer.disconnect()?;

    println!(
        "\nMetrics:\n{}",
        serde_json::to_string_pretty(&consumer.metrics())?
    );
    Ok(())
}
