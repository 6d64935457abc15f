use crate::error::ErrorCode;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Partition number used when a topic is named without a concrete partition.
pub const PARTITION_UNASSIGNED: i32 = -1;

/// Raw sentinel values understood by the underlying client.
pub const OFFSET_BEGINNING: i64 = -2;
pub const OFFSET_END: i64 = -1;
pub const OFFSET_STORED: i64 = -1000;
pub const OFFSET_INVALID: i64 = -1001;

/// A consume position within a partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Offset {
    /// Start of the partition's retained log
    Beginning,
    /// One past the last message in the partition
    End,
    /// The offset committed for the consumer group
    Stored,
    /// No offset set
    #[default]
    Invalid,
    /// An absolute offset
    Offset(i64),
}

impl Offset {
    /// Decodes a raw offset, mapping the reserved sentinels to their variants.
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            OFFSET_BEGINNING => Offset::Beginning,
            OFFSET_END => Offset::End,
            OFFSET_STORED => Offset::Stored,
            OFFSET_INVALID => Offset::Invalid,
            n if n >= 0 => Offset::Offset(n),
            _ => Offset::Invalid,
        }
    }

    pub fn to_raw(self) -> i64 {
        match self {
            Offset::Beginning => OFFSET_BEGINNING,
            Offset::End => OFFSET_END,
            Offset::Stored => OFFSET_STORED,
            Offset::Invalid => OFFSET_INVALID,
            Offset::Offset(n) => n,
        }
    }

    /// The absolute offset, if this is one.
    pub fn absolute(self) -> Option<i64> {
        match self {
            Offset::Offset(n) => Some(n),
            _ => None,
        }
    }
}

/// A topic partition together with its offset state.
///
/// Identity is `(topic, partition)`; offset, leader epoch and error are
/// per-call state carried alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
    pub offset: Offset,
    pub leader_epoch: Option<i32>,
    pub error: ErrorCode,
}

impl TopicPartition {
    pub fn new<T: Into<String>>(topic: T, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset: Offset::Invalid,
            leader_epoch: None,
            error: ErrorCode::NoError,
        }
    }

    /// A descriptor naming a topic with no concrete partition.
    pub fn for_topic<T: Into<String>>(topic: T) -> Self {
        Self::new(topic, PARTITION_UNASSIGNED)
    }

    pub fn with_offset(mut self, offset: Offset) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_leader_epoch(mut self, leader_epoch: i32) -> Self {
        self.leader_epoch = Some(leader_epoch);
        self
    }

    /// True when both descriptors name the same topic partition.
    pub fn same_partition(&self, other: &TopicPartition) -> bool {
        self.partition == other.partition && self.topic == other.topic
    }

    pub fn key(&self) -> (&str, i32) {
        (&self.topic, self.partition)
    }

    pub fn is_unassigned(&self) -> bool {
        self.partition == PARTITION_UNASSIGNED
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// Low and high offset bounds currently available for a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkOffsets {
    pub low: i64,
    pub high: i64,
}

impl WatermarkOffsets {
    /// Number of messages between the two watermarks.
    pub fn len(&self) -> i64 {
        (self.high - self.low).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A message returned from a poll.
///
/// `error` carries the poll sub-code: `NoError` for a real record,
/// `PartitionEof` when the end of a partition was reached, or one of the
/// timeout codes when nothing arrived in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Option<Bytes>,
    pub headers: HashMap<String, String>,
    pub timestamp: Option<i64>,
    pub leader_epoch: Option<i32>,
    pub error: ErrorCode,
}

impl Message {
    /// A data-less message carrying only a poll sub-code.
    pub fn empty(error: ErrorCode) -> Self {
        Self {
            topic: String::new(),
            partition: PARTITION_UNASSIGNED,
            offset: OFFSET_INVALID,
            key: None,
            payload: None,
            headers: HashMap::new(),
            timestamp: None,
            leader_epoch: None,
            error,
        }
    }

    /// A partition EOF marker positioned at `offset`.
    pub fn eof<T: Into<String>>(topic: T, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            ..Self::empty(ErrorCode::PartitionEof)
        }
    }

    pub fn is_eof(&self) -> bool {
        self.error == ErrorCode::PartitionEof
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.error, ErrorCode::TimedOut | ErrorCode::TimedOutQueue)
    }

    /// True for a real record rather than an EOF or timeout marker.
    pub fn has_data(&self) -> bool {
        self.error == ErrorCode::NoError
    }

    /// Key plus payload size in bytes.
    pub fn size(&self) -> usize {
        self.key.as_ref().map_or(0, |k| k.len()) + self.payload.as_ref().map_or(0, |p| p.len())
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition).with_offset(Offset::from_raw(self.offset))
    }
}

/// Messages gathered by a bounded consume, plus the partitions that hit EOF.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumedBatch {
    pub messages: Vec<Message>,
    pub eof_partitions: Vec<TopicPartition>,
}

impl ConsumedBatch {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Commit flavour passed to the underlying client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Block until the broker acknowledges
    Sync,
    /// Enqueue and return immediately
    Async,
}

/// Group rebalance protocol in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalanceProtocol {
    None,
    Eager,
    Cooperative,
}

impl RebalanceProtocol {
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "EAGER" => RebalanceProtocol::Eager,
            "COOPERATIVE" => RebalanceProtocol::Cooperative,
            _ => RebalanceProtocol::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RebalanceProtocol::None => "NONE",
            RebalanceProtocol::Eager => "EAGER",
            RebalanceProtocol::Cooperative => "COOPERATIVE",
        }
    }
}

impl fmt::Display for RebalanceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
