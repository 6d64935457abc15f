mod common;

use common::*;
use parking_lot::Mutex;
use rustmq_kafka_consumer::client::Operation;
use rustmq_kafka_consumer::{
    ConsumerConfig, ConsumerError, ConsumerEvent, ErrorCode, ErrorKind, Message, Offset, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_test::{assert_err, assert_ok};

type Delivered = Arc<Mutex<Vec<Result<Message>>>>;

fn recorder() -> (Delivered, impl Fn(Result<Message>) + Send + Sync + 'static) {
    let delivered: Delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    (delivered, move |result| sink.lock().push(result))
}

fn payloads(delivered: &Delivered) -> Vec<Vec<u8>> {
    delivered
        .lock()
        .iter()
        .filter_map(|r| r.as_ref().ok())
        .filter(|m| m.has_data())
        .filter_map(|m| m.payload.as_ref().map(|p| p.to_vec()))
        .collect()
}

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loop_delivers_messages_in_order() {
    init_tracing();
    let (cluster, consumer) = consumer_with(&[]);
    for i in 0..5u8 {
        cluster.produce("t", 0, None, &[i]).unwrap();
    }
    consumer.connect().unwrap();
    consumer
        .assign(vec![tp("t", 0).with_offset(Offset::Beginning)])
        .unwrap();
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    let (delivered, callback) = recorder();
    assert_ok!(tasks.consume_loop(Some(SHORT), Some(SHORT), callback));
    assert!(tasks.is_consume_loop_running());

    assert!(drain_until(&mut queue, WAIT, || delivered.lock().len() >= 5).await);
    assert_eq!(
        payloads(&delivered),
        (0..5u8).map(|i| vec![i]).collect::<Vec<_>>()
    );

    assert_ok!(tasks.stop_consume_loop().await);
    assert!(!tasks.is_consume_loop_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_loop_is_rejected_while_first_keeps_running() {
    let (cluster, consumer) = consumer_with(&[]);
    consumer.connect().unwrap();
    consumer
        .assign(vec![tp("t", 1).with_offset(Offset::Beginning)])
        .unwrap();
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    let (delivered, callback) = recorder();
    tasks.consume_loop(Some(SHORT), Some(SHORT), callback).unwrap();

    let (_ignored, second) = recorder();
    let err = assert_err!(tasks.consume_loop(Some(SHORT), Some(SHORT), second));
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(err.to_string().contains("Consume was already called"));

    cluster.produce("t", 1, None, b"after").unwrap();
    assert!(drain_until(&mut queue, WAIT, || !delivered.lock().is_empty()).await);
    assert_eq!(payloads(&delivered), vec![b"after".to_vec()]);

    tasks.stop_consume_loop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_disconnect_stops_polling() {
    let (cluster, consumer) = consumer_with(&[]);
    consumer.connect().unwrap();
    consumer
        .assign(vec![tp("t", 0).with_offset(Offset::Beginning)])
        .unwrap();
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    let (_delivered, callback) = recorder();
    tasks.consume_loop(Some(SHORT), Some(SHORT), callback).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cluster.poll_count() > 0);

    let disconnecting = consumer.clone();
    tokio::task::spawn_blocking(move || disconnecting.disconnect())
        .await
        .unwrap()
        .unwrap();

    let watcher = tasks.clone();
    assert!(drain_until(&mut queue, WAIT, || !watcher.is_consume_loop_running()).await);

    let polls = cluster.poll_count();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cluster.poll_count(), polls);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_task_disconnect_stops_loop_and_reports_it() {
    let (_cluster, consumer) = consumer_with(&[]);
    consumer.connect().unwrap();
    consumer.activate_dispatchers();
    let mut events = consumer.events();
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    let (_delivered, callback) = recorder();
    tasks.consume_loop(Some(SHORT), Some(SHORT), callback).unwrap();

    let (tx, rx) = oneshot::channel();
    tasks.disconnect(move |result| {
        let _ = tx.send(result);
    });
    assert_ok!(complete(&mut queue, rx).await);
    assert!(!tasks.is_consume_loop_running());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen.contains(&ConsumerEvent::ConsumeLoopStarted));
    assert!(seen.contains(&ConsumerEvent::ConsumeLoopStopped));
    assert!(seen.contains(&ConsumerEvent::Disconnected { error: None }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loop_backs_off_when_nothing_arrives() {
    let (cluster, consumer) = consumer_with(&[]);
    consumer.connect().unwrap();
    consumer
        .assign(vec![tp("t", 2).with_offset(Offset::Beginning)])
        .unwrap();
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    let (delivered, callback) = recorder();
    tasks
        .consume_loop(Some(SHORT), Some(Duration::from_millis(200)), callback)
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    queue.run_pending();
    assert!(delivered.lock().is_empty());
    assert!(cluster.poll_count() <= 3);

    tasks.stop_consume_loop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loop_delivers_errors_and_keeps_going() {
    let (cluster, consumer) = consumer_with(&[]);
    consumer.connect().unwrap();
    consumer
        .assign(vec![tp("t", 0).with_offset(Offset::Beginning)])
        .unwrap();
    cluster.produce("t", 0, None, b"ok").unwrap();
    cluster.fail_next(Operation::Poll, ErrorCode::Transport);
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    let (delivered, callback) = recorder();
    tasks.consume_loop(Some(SHORT), Some(SHORT), callback).unwrap();

    assert!(drain_until(&mut queue, WAIT, || delivered.lock().len() >= 2).await);
    tasks.stop_consume_loop().await.unwrap();

    let delivered = delivered.lock();
    assert!(matches!(
        delivered[0],
        Err(ConsumerError::Protocol(ref e)) if e.code == ErrorCode::Transport
    ));
    let message = delivered[1].as_ref().unwrap();
    assert_eq!(message.payload.as_deref(), Some(&b"ok"[..]));
    assert_eq!(consumer.metrics().consume_errors, 1);
}

#[tokio::test]
async fn test_loop_requires_a_connection() {
    let (_cluster, consumer) = consumer_with(&[]);
    let (tasks, _queue) = tasks_for(&consumer, 1);

    let (_delivered, callback) = recorder();
    let err = assert_err!(tasks.consume_loop(None, None, callback));
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(!tasks.is_consume_loop_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loop_restarts_after_reconnect() {
    let (cluster, consumer) = consumer_with(&[]);
    consumer.connect().unwrap();
    consumer
        .assign(vec![tp("t", 0).with_offset(Offset::Beginning)])
        .unwrap();
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    let (_first, callback) = recorder();
    tasks.consume_loop(Some(SHORT), Some(SHORT), callback).unwrap();

    let (tx, rx) = oneshot::channel();
    tasks.disconnect(move |result| {
        let _ = tx.send(result);
    });
    assert_ok!(complete(&mut queue, rx).await);

    let (tx, rx) = oneshot::channel();
    tasks.connect(move |result| {
        let _ = tx.send(result);
    });
    assert_ok!(complete(&mut queue, rx).await);
    assert_eq!(consumer.assigned_partition_count(), 1);
    consumer
        .assign(vec![tp("t", 0).with_offset(Offset::Beginning)])
        .unwrap();

    let (delivered, callback) = recorder();
    assert_ok!(tasks.consume_loop(Some(SHORT), Some(SHORT), callback));

    cluster.produce("t", 0, None, b"again").unwrap();
    assert!(drain_until(&mut queue, WAIT, || !payloads(&delivered).is_empty()).await);
    assert_eq!(payloads(&delivered), vec![b"again".to_vec()]);

    tasks.stop_consume_loop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_disconnect_drops_loop_queued_behind_busy_worker() {
    init_tracing();
    let (cluster, consumer) = consumer_with(&[]);
    consumer.connect().unwrap();
    consumer
        .assign(vec![tp("t", 0).with_offset(Offset::Beginning)])
        .unwrap();
    let (tasks, mut queue) = tasks_for(&consumer, 1);

    // Occupy the only worker so the loop's next poll has to queue for it
    let (release, hold) = oneshot::channel::<()>();
    tasks.dispatcher().submit(
        move || {
            let _ = hold.blocking_recv();
            Ok(())
        },
        |_: Result<()>| {},
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (stale, callback) = recorder();
    tasks.consume_loop(Some(SHORT), Some(SHORT), callback).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let disconnecting = consumer.clone();
    assert_ok!(tokio::task::spawn_blocking(move || disconnecting.disconnect())
        .await
        .unwrap());
    assert!(!tasks.is_consume_loop_running());

    consumer.connect().unwrap();
    consumer
        .assign(vec![tp("t", 0).with_offset(Offset::Beginning)])
        .unwrap();
    cluster.produce("t", 0, None, b"new-session").unwrap();

    let (fresh, callback) = recorder();
    assert_ok!(tasks.consume_loop(Some(SHORT), Some(SHORT), callback));

    let _ = release.send(());
    assert!(drain_until(&mut queue, WAIT, || !payloads(&fresh).is_empty()).await);
    assert_eq!(payloads(&fresh), vec![b"new-session".to_vec()]);
    assert!(payloads(&stale).is_empty());

    tasks.stop_consume_loop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_timeout_keeps_loop_and_connection() {
    let config = ConsumerConfig {
        loop_stop_timeout_ms: 100,
        ..test_config(&[])
    };
    let (_cluster, consumer) = consumer_from(config);
    consumer.connect().unwrap();
    consumer
        .assign(vec![tp("t", 2).with_offset(Offset::Beginning)])
        .unwrap();
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    // Empty partition: each poll blocks for the whole second
    let (_delivered, callback) = recorder();
    tasks
        .consume_loop(Some(Duration::from_secs(1)), Some(SHORT), callback)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = assert_err!(tasks.stop_consume_loop().await);
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(tasks.is_consume_loop_running());

    let (_ignored, second) = recorder();
    let err = assert_err!(tasks.consume_loop(Some(SHORT), Some(SHORT), second));
    assert!(err.to_string().contains("Consume was already called"));

    let (tx, rx) = oneshot::channel();
    tasks.disconnect(move |result| {
        let _ = tx.send(result);
    });
    let err = assert_err!(complete(&mut queue, rx).await);
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(consumer.is_connected());

    let watcher = tasks.clone();
    assert!(drain_until(&mut queue, WAIT, || !watcher.is_consume_loop_running()).await);
    assert_ok!(tasks.stop_consume_loop().await);

    let (_delivered, callback) = recorder();
    assert_ok!(tasks.consume_loop(Some(SHORT), Some(SHORT), callback));
    tasks.stop_consume_loop().await.unwrap();
}
