//! In-process partitioned log implementing [`ConsumerClient`].
//!
//! Deterministic and broker-free: topics are vectors of records, group
//! offsets live in a shared map, and any primitive can be made to fail once
//! through [`InMemoryCluster::fail_next`].

use super::{ClientFactory, ClientResult, ConsumerClient};
use crate::config::ConsumerConfig;
use crate::error::{ErrorCode, NativeError};
use crate::types::{CommitMode, Message, Offset, TopicPartition, WatermarkOffsets};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Client primitives that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Close,
    Subscribe,
    Assign,
    Unassign,
    IncrementalAssign,
    IncrementalUnassign,
    Assignment,
    Commit,
    Committed,
    Seek,
    OffsetsStore,
    Poll,
    Watermarks,
    OffsetsForTimes,
}

/// Shared broker-side state
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    inner: Arc<ClusterInner>,
}

#[derive(Default)]
struct ClusterInner {
    state: Mutex<ClusterState>,
    polls: AtomicU64,
    last_poll_timeout: Mutex<Option<Duration>>,
}

#[derive(Default)]
struct ClusterState {
    topics: HashMap<String, Vec<PartitionLog>>,
    /// (group, topic, partition) -> committed offset
    committed: HashMap<(String, String, i32), i64>,
    /// Per-operation script: `None` lets a call through, `Some` fails it
    faults: HashMap<Operation, VecDeque<Option<NativeError>>>,
    refuse_connections: Option<String>,
    clients_created: u64,
}

#[derive(Default)]
struct PartitionLog {
    low: i64,
    records: Vec<Record>,
}

struct Record {
    key: Option<Bytes>,
    payload: Bytes,
    timestamp: i64,
}

impl PartitionLog {
    fn high(&self) -> i64 {
        self.low + self.records.len() as i64
    }
}

impl ClusterState {
    fn log(&self, topic: &str, partition: i32) -> ClientResult<&PartitionLog> {
        let partitions = self
            .topics
            .get(topic)
            .ok_or_else(|| NativeError::with_reason(ErrorCode::UnknownTopic, topic))?;
        usize::try_from(partition)
            .ok()
            .and_then(|p| partitions.get(p))
            .ok_or_else(|| NativeError::new(ErrorCode::UnknownPartition))
    }

    fn watermarks(&self, topic: &str, partition: i32) -> ClientResult<WatermarkOffsets> {
        let log = self.log(topic, partition)?;
        Ok(WatermarkOffsets {
            low: log.low,
            high: log.high(),
        })
    }

    fn read(&self, topic: &str, partition: i32, offset: i64) -> Option<Message> {
        let log = self.log(topic, partition).ok()?;
        let index = usize::try_from(offset - log.low).ok()?;
        let record = log.records.get(index)?;
        Some(Message {
            topic: topic.to_string(),
            partition,
            offset,
            key: record.key.clone(),
            payload: Some(record.payload.clone()),
            headers: HashMap::new(),
            timestamp: Some(record.timestamp),
            leader_epoch: Some(0),
            error: ErrorCode::NoError,
        })
    }

    /// First offset at or after `timestamp`, or `None` past the last record.
    fn offset_for_time(&self, topic: &str, partition: i32, timestamp: i64) -> ClientResult<Option<i64>> {
        let log = self.log(topic, partition)?;
        Ok(log
            .records
            .iter()
            .position(|r| r.timestamp >= timestamp)
            .map(|index| log.low + index as i64))
    }

    fn take_fault(&mut self, op: Operation) -> ClientResult<()> {
        match self.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `partitions` empty partitions for `name`, replacing any
    /// existing topic of that name.
    pub fn create_topic(&self, name: &str, partitions: usize) {
        let mut state = self.inner.state.lock();
        let logs = (0..partitions).map(|_| PartitionLog::default()).collect();
        state.topics.insert(name.to_string(), logs);
    }

    /// Appends a record stamped with the current time and returns its offset.
    pub fn produce(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&[u8]>,
        payload: &[u8],
    ) -> ClientResult<i64> {
        self.produce_at(topic, partition, key, payload, now_millis())
    }

    /// Appends a record with an explicit millisecond timestamp.
    pub fn produce_at(
        &self,
        topic: &str,
        partition: i32,
        key: Option<&[u8]>,
        payload: &[u8],
        timestamp: i64,
    ) -> ClientResult<i64> {
        let mut state = self.inner.state.lock();
        let partitions = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| NativeError::with_reason(ErrorCode::UnknownTopic, topic))?;
        let log = usize::try_from(partition)
            .ok()
            .and_then(|p| partitions.get_mut(p))
            .ok_or_else(|| NativeError::new(ErrorCode::UnknownPartition))?;

        let offset = log.high();
        log.records.push(Record {
            key: key.map(Bytes::copy_from_slice),
            payload: Bytes::copy_from_slice(payload),
            timestamp,
        });
        Ok(offset)
    }

    /// Drops records below `before`, advancing the low watermark.
    pub fn delete_records(&self, topic: &str, partition: i32, before: i64) -> ClientResult<()> {
        let mut state = self.inner.state.lock();
        let log = state
            .topics
            .get_mut(topic)
            .and_then(|parts| usize::try_from(partition).ok().and_then(|p| parts.get_mut(p)))
            .ok_or_else(|| NativeError::new(ErrorCode::UnknownPartition))?;

        let cut = (before.clamp(log.low, log.high()) - log.low) as usize;
        log.records.drain(..cut);
        log.low += cut as i64;
        Ok(())
    }

    /// Makes the next call of `op` fail with `code`.
    pub fn fail_next(&self, op: Operation, code: ErrorCode) {
        self.fail_next_with(op, NativeError::new(code));
    }

    pub fn fail_next_with(&self, op: Operation, err: NativeError) {
        let mut state = self.inner.state.lock();
        state.faults.entry(op).or_default().push_back(Some(err));
    }

    /// Lets `successes` calls of `op` through, then fails the next one.
    pub fn fail_after(&self, op: Operation, successes: usize, code: ErrorCode) {
        let mut state = self.inner.state.lock();
        let script = state.faults.entry(op).or_default();
        script.extend(std::iter::repeat_with(|| None).take(successes));
        script.push_back(Some(NativeError::new(code)));
    }

    /// While set, handle creation fails with `reason`.
    pub fn refuse_connections(&self, reason: Option<&str>) {
        self.inner.state.lock().refuse_connections = reason.map(str::to_string);
    }

    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.inner
            .state
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Total polls issued by all clients of this cluster.
    pub fn poll_count(&self) -> u64 {
        self.inner.polls.load(Ordering::SeqCst)
    }

    /// Timeout passed to the most recent poll.
    pub fn last_poll_timeout(&self) -> Option<Duration> {
        *self.inner.last_poll_timeout.lock()
    }

    pub fn clients_created(&self) -> u64 {
        self.inner.state.lock().clients_created
    }

    fn partition_count(&self, topic: &str) -> Option<usize> {
        self.inner.state.lock().topics.get(topic).map(Vec::len)
    }
}

/// Factory producing [`InMemoryClient`] handles on one cluster
#[derive(Clone, Default)]
pub struct InMemoryClientFactory {
    cluster: InMemoryCluster,
}

impl InMemoryClientFactory {
    pub fn new(cluster: InMemoryCluster) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &InMemoryCluster {
        &self.cluster
    }
}

impl ClientFactory for InMemoryClientFactory {
    fn create(&self, config: &ConsumerConfig) -> std::result::Result<Arc<dyn ConsumerClient>, String> {
        let sequence = {
            let mut state = self.cluster.inner.state.lock();
            if let Some(reason) = &state.refuse_connections {
                return Err(reason.clone());
            }
            state.clients_created += 1;
            state.clients_created
        };

        let name = format!("{}#consumer-{}", config.resolved_client_id(), sequence);
        Ok(Arc::new(InMemoryClient::new(self.cluster.clone(), name, config)))
    }
}

/// Consumer handle on an [`InMemoryCluster`]
pub struct InMemoryClient {
    name: String,
    group_id: Option<String>,
    reset_to_latest: bool,
    emit_eof: bool,
    cooperative: bool,
    cluster: InMemoryCluster,
    state: Mutex<ClientState>,
}

#[derive(Default)]
struct ClientState {
    subscription: Vec<String>,
    assignment: Vec<Assigned>,
    /// Round-robin cursor into `assignment`
    next: usize,
    closed: bool,
}

struct Assigned {
    topic: String,
    partition: i32,
    /// Next offset to read
    position: i64,
    stored: Option<i64>,
    leader_epoch: Option<i32>,
    paused: bool,
    eof_reported: bool,
}

impl Assigned {
    fn matches(&self, tp: &TopicPartition) -> bool {
        self.partition == tp.partition && self.topic == tp.topic
    }
}

impl InMemoryClient {
    pub fn new(cluster: InMemoryCluster, name: String, config: &ConsumerConfig) -> Self {
        let props = config.client_properties();
        let flag = |key: &str| props.get(key).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false);

        Self {
            name,
            group_id: config.group_id.clone().or_else(|| props.get("group.id").cloned()),
            reset_to_latest: matches!(
                props.get("auto.offset.reset").map(String::as_str),
                Some("latest") | Some("largest") | Some("end")
            ),
            emit_eof: flag("enable.partition.eof"),
            cooperative: props
                .get("partition.assignment.strategy")
                .map(|s| s.contains("cooperative"))
                .unwrap_or(false),
            cluster,
            state: Mutex::new(ClientState::default()),
        }
    }

    fn fault(&self, op: Operation) -> ClientResult<()> {
        self.cluster.inner.state.lock().take_fault(op)
    }

    fn group(&self) -> ClientResult<&str> {
        self.group_id
            .as_deref()
            .ok_or_else(|| NativeError::with_reason(ErrorCode::InvalidGroupId, "group.id not configured"))
    }

    fn ensure_open(state: &ClientState) -> ClientResult<()> {
        if state.closed {
            return Err(NativeError::new(ErrorCode::Destroy));
        }
        Ok(())
    }

    /// Resolves a logical offset to the next offset to read.
    fn resolve(&self, cluster: &ClusterState, topic: &str, partition: i32, offset: Offset) -> i64 {
        let marks = cluster
            .watermarks(topic, partition)
            .unwrap_or(WatermarkOffsets { low: 0, high: 0 });
        let reset = if self.reset_to_latest { marks.high } else { marks.low };

        match offset {
            Offset::Offset(n) => n,
            Offset::Beginning => marks.low,
            Offset::End => marks.high,
            Offset::Stored | Offset::Invalid => self
                .group_id
                .as_ref()
                .and_then(|g| cluster.committed.get(&(g.clone(), topic.to_string(), partition)))
                .copied()
                .unwrap_or(reset),
        }
    }

    fn assigned_from(&self, cluster: &ClusterState, tp: &TopicPartition) -> Assigned {
        Assigned {
            topic: tp.topic.clone(),
            partition: tp.partition,
            position: self.resolve(cluster, &tp.topic, tp.partition, tp.offset),
            stored: None,
            leader_epoch: tp.leader_epoch,
            paused: false,
            eof_reported: false,
        }
    }

    fn check_partitions(partitions: &[TopicPartition]) -> ClientResult<()> {
        match partitions.iter().find(|tp| tp.partition < 0) {
            Some(tp) => Err(NativeError::with_reason(
                ErrorCode::InvalidArg,
                format!("{} has no concrete partition", tp),
            )),
            None => Ok(()),
        }
    }

    /// Simulated group join: takes every partition of every subscribed topic.
    fn join_subscription(&self, state: &mut ClientState) {
        let targets: Vec<TopicPartition> = state
            .subscription
            .iter()
            .flat_map(|topic| {
                let count = self.cluster.partition_count(topic).unwrap_or(0) as i32;
                (0..count).map(move |p| TopicPartition::new(topic.clone(), p))
            })
            .collect();

        let cluster = self.cluster.inner.state.lock();
        state.assignment = targets.iter().map(|tp| self.assigned_from(&cluster, tp)).collect();
        state.next = 0;
        debug!("{} joined subscription with {} partitions", self.name, state.assignment.len());
    }
}

impl ConsumerClient for InMemoryClient {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn close(&self) -> ClientResult<()> {
        let result = self.fault(Operation::Close);
        let mut state = self.state.lock();
        state.closed = true;
        state.subscription.clear();
        state.assignment.clear();
        result
    }

    fn subscribe(&self, topics: &[String]) -> ClientResult<()> {
        self.fault(Operation::Subscribe)?;
        if topics.is_empty() {
            return Err(NativeError::with_reason(ErrorCode::InvalidArg, "empty topic list"));
        }
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        state.subscription = topics.to_vec();
        state.assignment.clear();
        Ok(())
    }

    fn unsubscribe(&self) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.subscription.clear();
        state.assignment.clear();
        Ok(())
    }

    fn subscription(&self) -> ClientResult<Vec<String>> {
        Ok(self.state.lock().subscription.clone())
    }

    fn assign(&self, partitions: &[TopicPartition]) -> ClientResult<()> {
        self.fault(Operation::Assign)?;
        Self::check_partitions(partitions)?;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        let cluster = self.cluster.inner.state.lock();
        state.assignment = partitions.iter().map(|tp| self.assigned_from(&cluster, tp)).collect();
        state.next = 0;
        Ok(())
    }

    fn unassign(&self) -> ClientResult<()> {
        self.fault(Operation::Unassign)?;
        let mut state = self.state.lock();
        state.assignment.clear();
        state.next = 0;
        Ok(())
    }

    fn incremental_assign(&self, partitions: &[TopicPartition]) -> ClientResult<()> {
        self.fault(Operation::IncrementalAssign)?;
        Self::check_partitions(partitions)?;
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;

        if let Some(dup) = partitions
            .iter()
            .find(|tp| state.assignment.iter().any(|a| a.matches(tp)))
        {
            return Err(NativeError::with_reason(
                ErrorCode::Conflict,
                format!("{} is already assigned", dup),
            ));
        }

        let cluster = self.cluster.inner.state.lock();
        let added: Vec<Assigned> = partitions.iter().map(|tp| self.assigned_from(&cluster, tp)).collect();
        state.assignment.extend(added);
        Ok(())
    }

    fn incremental_unassign(&self, partitions: &[TopicPartition]) -> ClientResult<()> {
        self.fault(Operation::IncrementalUnassign)?;
        let mut state = self.state.lock();
        state
            .assignment
            .retain(|a| !partitions.iter().any(|tp| a.matches(tp)));
        state.next = 0;
        Ok(())
    }

    fn assignment(&self) -> ClientResult<Vec<TopicPartition>> {
        self.fault(Operation::Assignment)?;
        let state = self.state.lock();
        Ok(state
            .assignment
            .iter()
            .map(|a| TopicPartition::new(a.topic.clone(), a.partition))
            .collect())
    }

    fn commit(&self, offsets: Option<&[TopicPartition]>, _mode: CommitMode) -> ClientResult<()> {
        self.fault(Operation::Commit)?;
        let group = self.group()?.to_string();

        let pending: Vec<(String, i32, i64)> = match offsets {
            Some(list) => list
                .iter()
                .filter_map(|tp| tp.offset.absolute().map(|o| (tp.topic.clone(), tp.partition, o)))
                .collect(),
            None => self
                .state
                .lock()
                .assignment
                .iter()
                .filter_map(|a| a.stored.map(|o| (a.topic.clone(), a.partition, o)))
                .collect(),
        };

        if pending.is_empty() {
            return Err(NativeError::new(ErrorCode::NoOffset));
        }

        let mut cluster = self.cluster.inner.state.lock();
        for (topic, partition, offset) in pending {
            cluster.committed.insert((group.clone(), topic, partition), offset);
        }
        Ok(())
    }

    fn committed(&self, partitions: &mut [TopicPartition], _timeout: Duration) -> ClientResult<()> {
        self.fault(Operation::Committed)?;
        let group = self.group()?;
        let cluster = self.cluster.inner.state.lock();
        for tp in partitions.iter_mut() {
            tp.offset = cluster
                .committed
                .get(&(group.to_string(), tp.topic.clone(), tp.partition))
                .map(|o| Offset::Offset(*o))
                .unwrap_or(Offset::Invalid);
        }
        Ok(())
    }

    fn position(&self, partitions: &mut [TopicPartition]) -> ClientResult<()> {
        let state = self.state.lock();
        for tp in partitions.iter_mut() {
            match state.assignment.iter().find(|a| a.matches(tp)) {
                Some(a) => {
                    tp.offset = Offset::Offset(a.position);
                    tp.error = ErrorCode::NoError;
                }
                None => {
                    tp.offset = Offset::Invalid;
                    tp.error = ErrorCode::UnknownPartition;
                }
            }
        }
        Ok(())
    }

    fn seek(&self, partition: &TopicPartition, _timeout: Duration) -> ClientResult<()> {
        self.fault(Operation::Seek)?;
        let mut state = self.state.lock();
        let cluster = self.cluster.inner.state.lock();
        let position = self.resolve(&cluster, &partition.topic, partition.partition, partition.offset);

        let assigned = state
            .assignment
            .iter_mut()
            .find(|a| a.matches(partition))
            .ok_or_else(|| {
                NativeError::with_reason(ErrorCode::UnknownPartition, format!("{} is not assigned", partition))
            })?;
        assigned.position = position;
        assigned.eof_reported = false;
        Ok(())
    }

    fn pause(&self, partitions: &mut [TopicPartition]) -> ClientResult<()> {
        let mut state = self.state.lock();
        for tp in partitions.iter_mut() {
            tp.error = match state.assignment.iter_mut().find(|a| a.matches(tp)) {
                Some(a) => {
                    a.paused = true;
                    ErrorCode::NoError
                }
                None => ErrorCode::UnknownPartition,
            };
        }
        Ok(())
    }

    fn resume(&self, partitions: &mut [TopicPartition]) -> ClientResult<()> {
        let mut state = self.state.lock();
        for tp in partitions.iter_mut() {
            tp.error = match state.assignment.iter_mut().find(|a| a.matches(tp)) {
                Some(a) => {
                    a.paused = false;
                    ErrorCode::NoError
                }
                None => ErrorCode::UnknownPartition,
            };
        }
        Ok(())
    }

    fn offsets_store(&self, offsets: &mut [TopicPartition]) -> ClientResult<()> {
        self.fault(Operation::OffsetsStore)?;
        let mut state = self.state.lock();
        let mut first_error = None;

        for tp in offsets.iter_mut() {
            let assigned = state.assignment.iter_mut().find(|a| a.matches(tp));
            tp.error = match (assigned, tp.offset.absolute()) {
                (Some(a), Some(offset)) => {
                    a.stored = Some(offset);
                    if tp.leader_epoch.is_some() {
                        a.leader_epoch = tp.leader_epoch;
                    }
                    ErrorCode::NoError
                }
                (Some(_), None) => ErrorCode::InvalidArg,
                (None, _) => ErrorCode::UnknownPartition,
            };
            if tp.error.is_error() && first_error.is_none() {
                first_error = Some(tp.error);
            }
        }

        match first_error {
            Some(code) => Err(NativeError::new(code)),
            None => Ok(()),
        }
    }

    fn poll(&self, timeout: Duration) -> Message {
        self.cluster.inner.polls.fetch_add(1, Ordering::SeqCst);
        *self.cluster.inner.last_poll_timeout.lock() = Some(timeout);
        if let Err(err) = self.fault(Operation::Poll) {
            return Message::empty(err.code);
        }

        {
            let mut state = self.state.lock();
            if state.closed {
                return Message::empty(ErrorCode::Destroy);
            }
            if !state.subscription.is_empty() && state.assignment.is_empty() {
                self.join_subscription(&mut state);
            }

            let cluster = self.cluster.inner.state.lock();
            let count = state.assignment.len();
            for step in 0..count {
                let index = (state.next + step) % count;
                let emit_eof = self.emit_eof;
                let entry = &mut state.assignment[index];
                if entry.paused {
                    continue;
                }

                if let Ok(marks) = cluster.watermarks(&entry.topic, entry.partition) {
                    if entry.position < marks.low {
                        entry.position = marks.low;
                    }
                }

                let found = match cluster.read(&entry.topic, entry.partition, entry.position) {
                    Some(message) => {
                        entry.position = message.offset + 1;
                        entry.stored = Some(entry.position);
                        entry.eof_reported = false;
                        Some(message)
                    }
                    None if emit_eof && !entry.eof_reported => {
                        entry.eof_reported = true;
                        Some(Message::eof(entry.topic.clone(), entry.partition, entry.position))
                    }
                    None => None,
                };

                if let Some(message) = found {
                    state.next = index + 1;
                    return message;
                }
            }
        }

        std::thread::sleep(timeout);
        Message::empty(ErrorCode::TimedOut)
    }

    fn offsets_for_times(
        &self,
        partitions: &mut [TopicPartition],
        _timeout: Duration,
    ) -> ClientResult<()> {
        self.fault(Operation::OffsetsForTimes)?;
        let cluster = self.cluster.inner.state.lock();
        for tp in partitions.iter_mut() {
            let Some(timestamp) = tp.offset.absolute() else {
                tp.error = ErrorCode::InvalidArg;
                continue;
            };
            match cluster.offset_for_time(&tp.topic, tp.partition, timestamp) {
                Ok(found) => {
                    tp.offset = found.map(Offset::Offset).unwrap_or(Offset::End);
                    tp.error = ErrorCode::NoError;
                }
                Err(err) => {
                    tp.offset = Offset::Invalid;
                    tp.error = err.code;
                }
            }
        }
        Ok(())
    }

    fn get_watermark_offsets(&self, topic: &str, partition: i32) -> ClientResult<WatermarkOffsets> {
        self.fault(Operation::Watermarks)?;
        self.cluster.inner.state.lock().watermarks(topic, partition)
    }

    fn query_watermark_offsets(
        &self,
        topic: &str,
        partition: i32,
        _timeout: Duration,
    ) -> ClientResult<WatermarkOffsets> {
        self.get_watermark_offsets(topic, partition)
    }

    fn rebalance_protocol(&self) -> String {
        let state = self.state.lock();
        if state.subscription.is_empty() {
            "NONE".to_string()
        } else if self.cooperative {
            "COOPERATIVE".to_string()
        } else {
            "EAGER".to_string()
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
