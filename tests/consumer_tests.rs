mod common;

use common::*;
use rustmq_kafka_consumer::client::Operation;
use rustmq_kafka_consumer::{
    ConnectionState, ConsumerError, ErrorCode, ErrorKind, Offset, WatermarkOffsets,
};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_connect_subscribe_and_read_back_subscription() {
    init_tracing();
    let (_cluster, consumer) = consumer_with(&[]);
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    let (tx, rx) = oneshot::channel();
    tasks.connect(move |result| {
        let _ = tx.send(result);
    });
    assert_ok!(complete(&mut queue, rx).await);
    assert!(consumer.is_connected());

    assert_ok!(consumer.subscribe(vec!["topic-a".to_string()]));
    assert_eq!(consumer.subscription().unwrap(), vec!["topic-a".to_string()]);
}

#[tokio::test]
async fn test_callbacks_wait_for_the_queue() {
    let (_cluster, consumer) = consumer_with(&[]);
    let (tasks, mut queue) = tasks_for(&consumer, 1);

    let (tx, mut rx) = oneshot::channel();
    tasks.connect(move |result| {
        let _ = tx.send(result);
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(consumer.is_connected());
    assert!(rx.try_recv().is_err());

    assert_eq!(queue.run_pending(), 1);
    assert_ok!(rx.try_recv().unwrap());
}

#[test]
fn test_assign_count_unassign_scenario() {
    let (_cluster, consumer) = consumer_with(&[]);
    consumer.connect().unwrap();

    assert_ok!(consumer.assign(vec![tp("t", 0)]));
    assert_eq!(consumer.assigned_partition_count(), 1);

    assert_ok!(consumer.unassign());
    assert_eq!(consumer.assigned_partition_count(), 0);
}

#[test]
fn test_incremental_scenario() {
    let (_cluster, consumer) = consumer_with(&[]);
    consumer.connect().unwrap();

    consumer.incremental_assign(vec![tp("t", 0)]).unwrap();
    consumer.incremental_assign(vec![tp("t", 1)]).unwrap();
    let mut assigned: Vec<_> = consumer
        .assignments()
        .unwrap()
        .into_iter()
        .map(|p| p.partition)
        .collect();
    assigned.sort();
    assert_eq!(assigned, vec![0, 1]);
    assert_eq!(consumer.assigned_partition_count(), 2);

    consumer.incremental_unassign(vec![tp("t", 0)]).unwrap();
    let assigned: Vec<_> = consumer
        .assignments()
        .unwrap()
        .into_iter()
        .map(|p| p.partition)
        .collect();
    assert_eq!(assigned, vec![1]);
    assert_eq!(consumer.assigned_partition_count(), 1);
}

#[test]
fn test_disconnected_calls_leave_partition_set_alone() {
    let (_cluster, consumer) = consumer_with(&[]);
    consumer.connect().unwrap();
    consumer.assign(vec![tp("t", 0), tp("t", 1)]).unwrap();
    consumer.disconnect().unwrap();

    for result in [
        consumer.assign(vec![tp("t", 2)]),
        consumer.unassign(),
        consumer.incremental_assign(vec![tp("t", 2)]),
        consumer.incremental_unassign(vec![tp("t", 0)]),
        consumer.commit_sync(),
    ] {
        let err = assert_err!(result);
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(err.code(), ErrorCode::State);
    }

    assert_eq!(consumer.assigned_partition_count(), 2);
}

#[tokio::test]
async fn test_disconnect_twice_through_tasks() {
    let (_cluster, consumer) = consumer_with(&[]);
    consumer.connect().unwrap();
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    for _ in 0..2 {
        let (tx, rx) = oneshot::channel();
        tasks.disconnect(move |result| {
            let _ = tx.send(result);
        });
        assert_ok!(complete(&mut queue, rx).await);
        assert_eq!(consumer.state(), ConnectionState::Disconnected);
    }
}

#[tokio::test]
async fn test_consume_reports_eof_and_timeout_as_success() {
    let (cluster, consumer) = consumer_with(&[("enable.partition.eof", "true")]);
    cluster.produce("t", 0, None, b"m0").unwrap();
    consumer.connect().unwrap();
    consumer
        .assign(vec![tp("t", 0).with_offset(Offset::Beginning)])
        .unwrap();
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    let mut codes = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = oneshot::channel();
        tasks.consume(SHORT, move |result| {
            let _ = tx.send(result);
        });
        codes.push(complete(&mut queue, rx).await.unwrap().error);
    }
    assert_eq!(
        codes,
        vec![ErrorCode::NoError, ErrorCode::PartitionEof, ErrorCode::TimedOut]
    );

    cluster.fail_next(Operation::Poll, ErrorCode::UnknownTopicOrPartition);
    let (tx, rx) = oneshot::channel();
    tasks.consume(SHORT, move |result| {
        let _ = tx.send(result);
    });
    let err = complete(&mut queue, rx).await.unwrap_err();
    assert!(matches!(err, ConsumerError::Protocol(ref e) if e.code == ErrorCode::UnknownTopicOrPartition));
}

#[tokio::test]
async fn test_consume_num_through_tasks() {
    let (cluster, consumer) = consumer_with(&[]);
    for i in 0..4u8 {
        cluster.produce("t", 2, None, &[i]).unwrap();
    }
    consumer.connect().unwrap();
    consumer
        .assign(vec![tp("t", 2).with_offset(Offset::Beginning)])
        .unwrap();
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    let (tx, rx) = oneshot::channel();
    tasks.consume_num(10, Duration::from_millis(100), true, move |result| {
        let _ = tx.send(result);
    });
    let batch = complete(&mut queue, rx).await.unwrap();
    assert_eq!(batch.len(), 4);
    assert!(batch.eof_partitions.is_empty());
}

#[tokio::test]
async fn test_commit_callback_then_committed_lookup() {
    let (cluster, consumer) = consumer_with(&[]);
    cluster.produce("t", 1, None, b"a").unwrap();
    cluster.produce("t", 1, None, b"b").unwrap();
    consumer.connect().unwrap();
    consumer
        .assign(vec![tp("t", 1).with_offset(Offset::Beginning)])
        .unwrap();
    consumer.consume(SHORT).unwrap();
    consumer.consume(SHORT).unwrap();
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    let (tx, rx) = oneshot::channel();
    tasks.commit_cb(None, move |result| {
        let _ = tx.send(result);
    });
    assert_ok!(complete(&mut queue, rx).await);
    assert_eq!(cluster.committed_offset("it-group", "t", 1), Some(2));

    let (tx, rx) = oneshot::channel();
    tasks.commit_cb(
        Some(vec![tp("t", 1).with_offset(Offset::Offset(1))]),
        move |result| {
            let _ = tx.send(result);
        },
    );
    assert_ok!(complete(&mut queue, rx).await);

    let (tx, rx) = oneshot::channel();
    tasks.committed(vec![tp("t", 1)], None, move |result| {
        let _ = tx.send(result);
    });
    let committed = complete(&mut queue, rx).await.unwrap();
    assert_eq!(committed[0].offset, Offset::Offset(1));
}

#[tokio::test]
async fn test_seek_and_watermarks_through_tasks() {
    let (cluster, consumer) = consumer_with(&[]);
    for _ in 0..5 {
        cluster.produce("t", 0, None, b"x").unwrap();
    }
    consumer.connect().unwrap();
    consumer
        .assign(vec![tp("t", 0).with_offset(Offset::Beginning)])
        .unwrap();
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    let (tx, rx) = oneshot::channel();
    tasks.seek(tp("t", 0).with_offset(Offset::End), None, move |result| {
        let _ = tx.send(result);
    });
    assert_ok!(complete(&mut queue, rx).await);
    let position = consumer.position(vec![tp("t", 0)]).unwrap();
    assert_eq!(position[0].offset, Offset::Offset(5));

    let (tx, rx) = oneshot::channel();
    tasks.query_watermark_offsets("t".to_string(), 0, SHORT, move |result| {
        let _ = tx.send(result);
    });
    assert_eq!(
        complete(&mut queue, rx).await.unwrap(),
        WatermarkOffsets { low: 0, high: 5 }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_consumes_share_the_worker_pool() {
    let (cluster, consumer) = consumer_with(&[]);
    for p in 0..3 {
        cluster.produce("t", p, None, b"x").unwrap();
    }
    consumer.connect().unwrap();
    consumer
        .assign((0..3).map(|p| tp("t", p).with_offset(Offset::Beginning)).collect())
        .unwrap();
    let (tasks, mut queue) = tasks_for(&consumer, 2);

    let mut receivers = Vec::new();
    for _ in 0..6 {
        let (tx, rx) = oneshot::channel();
        tasks.consume(SHORT, move |result| {
            let _ = tx.send(result);
        });
        receivers.push(rx);
    }

    let mut data = 0;
    for rx in receivers {
        if complete(&mut queue, rx).await.unwrap().has_data() {
            data += 1;
        }
    }
    assert_eq!(data, 3);
    assert_eq!(consumer.metrics().messages_consumed, 3);
}
