use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for consumer operations
pub type Result<T> = std::result::Result<T, ConsumerError>;

/// Error codes reported by the underlying client.
///
/// Negative values are raised locally by the client library, positive
/// values come from the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[default]
    NoError,
    /// Generic local failure
    Fail,
    /// Broker transport failure
    Transport,
    /// Client instance is being destroyed
    Destroy,
    /// Reached the end of a partition
    PartitionEof,
    /// Unknown partition
    UnknownPartition,
    /// Unknown topic
    UnknownTopic,
    /// All brokers are down
    AllBrokersDown,
    /// Invalid argument or configuration
    InvalidArg,
    /// Operation timed out
    TimedOut,
    /// Queue is full
    QueueFull,
    /// Conflicting use
    Conflict,
    /// Local state does not permit the operation
    State,
    /// No offset to commit
    NoOffset,
    /// Timed out waiting on a queue
    TimedOutQueue,
    /// Fatal client error
    Fatal,
    /// Unknown broker error
    Unknown,
    OffsetOutOfRange,
    UnknownTopicOrPartition,
    NotLeaderForPartition,
    RequestTimedOut,
    CoordinatorLoadInProgress,
    CoordinatorNotAvailable,
    NotCoordinator,
    IllegalGeneration,
    InvalidGroupId,
    UnknownMemberId,
    RebalanceInProgress,
    TopicAuthorizationFailed,
    GroupAuthorizationFailed,
}

impl ErrorCode {
    /// Decodes a raw numeric code; anything unrecognised maps to `Unknown`.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => ErrorCode::NoError,
            -196 => ErrorCode::Fail,
            -195 => ErrorCode::Transport,
            -197 => ErrorCode::Destroy,
            -191 => ErrorCode::PartitionEof,
            -190 => ErrorCode::UnknownPartition,
            -188 => ErrorCode::UnknownTopic,
            -187 => ErrorCode::AllBrokersDown,
            -186 => ErrorCode::InvalidArg,
            -185 => ErrorCode::TimedOut,
            -184 => ErrorCode::QueueFull,
            -173 => ErrorCode::Conflict,
            -172 => ErrorCode::State,
            -168 => ErrorCode::NoOffset,
            -166 => ErrorCode::TimedOutQueue,
            -150 => ErrorCode::Fatal,
            1 => ErrorCode::OffsetOutOfRange,
            3 => ErrorCode::UnknownTopicOrPartition,
            6 => ErrorCode::NotLeaderForPartition,
            7 => ErrorCode::RequestTimedOut,
            14 => ErrorCode::CoordinatorLoadInProgress,
            15 => ErrorCode::CoordinatorNotAvailable,
            16 => ErrorCode::NotCoordinator,
            22 => ErrorCode::IllegalGeneration,
            24 => ErrorCode::InvalidGroupId,
            25 => ErrorCode::UnknownMemberId,
            27 => ErrorCode::RebalanceInProgress,
            29 => ErrorCode::TopicAuthorizationFailed,
            30 => ErrorCode::GroupAuthorizationFailed,
            _ => ErrorCode::Unknown,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            ErrorCode::NoError => 0,
            ErrorCode::Fail => -196,
            ErrorCode::Transport => -195,
            ErrorCode::Destroy => -197,
            ErrorCode::PartitionEof => -191,
            ErrorCode::UnknownPartition => -190,
            ErrorCode::UnknownTopic => -188,
            ErrorCode::AllBrokersDown => -187,
            ErrorCode::InvalidArg => -186,
            ErrorCode::TimedOut => -185,
            ErrorCode::QueueFull => -184,
            ErrorCode::Conflict => -173,
            ErrorCode::State => -172,
            ErrorCode::NoOffset => -168,
            ErrorCode::TimedOutQueue => -166,
            ErrorCode::Fatal => -150,
            ErrorCode::Unknown => -1,
            ErrorCode::OffsetOutOfRange => 1,
            ErrorCode::UnknownTopicOrPartition => 3,
            ErrorCode::NotLeaderForPartition => 6,
            ErrorCode::RequestTimedOut => 7,
            ErrorCode::CoordinatorLoadInProgress => 14,
            ErrorCode::CoordinatorNotAvailable => 15,
            ErrorCode::NotCoordinator => 16,
            ErrorCode::IllegalGeneration => 22,
            ErrorCode::InvalidGroupId => 24,
            ErrorCode::UnknownMemberId => 25,
            ErrorCode::RebalanceInProgress => 27,
            ErrorCode::TopicAuthorizationFailed => 29,
            ErrorCode::GroupAuthorizationFailed => 30,
        }
    }

    /// Human-readable description of the code
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "Success",
            ErrorCode::Fail => "Local: Failed",
            ErrorCode::Transport => "Local: Broker transport failure",
            ErrorCode::Destroy => "Local: Broker handle destroyed",
            ErrorCode::PartitionEof => "Broker: No more messages",
            ErrorCode::UnknownPartition => "Local: Unknown partition",
            ErrorCode::UnknownTopic => "Local: Unknown topic",
            ErrorCode::AllBrokersDown => "Local: All broker connections are down",
            ErrorCode::InvalidArg => "Local: Invalid argument or configuration",
            ErrorCode::TimedOut => "Local: Timed out",
            ErrorCode::QueueFull => "Local: Queue full",
            ErrorCode::Conflict => "Local: Conflicting use",
            ErrorCode::State => "Local: Erroneous state",
            ErrorCode::NoOffset => "Local: No offset stored",
            ErrorCode::TimedOutQueue => "Local: Timed out in queue",
            ErrorCode::Fatal => "Local: Fatal error",
            ErrorCode::Unknown => "Unknown broker error",
            ErrorCode::OffsetOutOfRange => "Broker: Offset out of range",
            ErrorCode::UnknownTopicOrPartition => "Broker: Unknown topic or partition",
            ErrorCode::NotLeaderForPartition => "Broker: Not leader for partition",
            ErrorCode::RequestTimedOut => "Broker: Request timed out",
            ErrorCode::CoordinatorLoadInProgress => "Broker: Coordinator load in progress",
            ErrorCode::CoordinatorNotAvailable => "Broker: Coordinator not available",
            ErrorCode::NotCoordinator => "Broker: Not coordinator",
            ErrorCode::IllegalGeneration => "Broker: Specified group generation id is not valid",
            ErrorCode::InvalidGroupId => "Broker: Invalid group.id",
            ErrorCode::UnknownMemberId => "Broker: Unknown member",
            ErrorCode::RebalanceInProgress => "Broker: Group rebalance in progress",
            ErrorCode::TopicAuthorizationFailed => "Broker: Topic authorization failed",
            ErrorCode::GroupAuthorizationFailed => "Broker: Group authorization failed",
        }
    }

    /// EOF and poll timeouts are steady-state conditions, not failures.
    pub fn is_timeout_like(&self) -> bool {
        matches!(
            self,
            ErrorCode::PartitionEof | ErrorCode::TimedOut | ErrorCode::TimedOutQueue
        )
    }

    pub fn is_error(&self) -> bool {
        *self != ErrorCode::NoError
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Error object returned by the underlying client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub code: ErrorCode,
    pub reason: Option<String>,
    pub fatal: bool,
    pub retriable: bool,
}

impl NativeError {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            reason: None,
            fatal: false,
            retriable: false,
        }
    }

    pub fn with_reason<T: Into<String>>(code: ErrorCode, reason: T) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(code)
        }
    }

    pub fn retriable(mut self) -> Self {
        self.retriable = true;
        self
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} ({})", reason, self.code),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for NativeError {}

impl From<ErrorCode> for NativeError {
    fn from(code: ErrorCode) -> Self {
        NativeError::new(code)
    }
}

/// Errors surfaced by consumer operations
#[derive(Error, Debug, Clone)]
pub enum ConsumerError {
    /// The consumer is not in a state that permits the operation
    #[error("Invalid state: {0}")]
    State(String),

    /// Bad consumer setup
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The underlying client rejected the operation
    #[error("Protocol error: {0}")]
    Protocol(NativeError),

    /// Malformed partition list or descriptor
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Internal dispatch failure
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad classification of a [`ConsumerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    State,
    Config,
    Protocol,
    TimeoutLike,
    Validation,
    Internal,
}

impl ConsumerError {
    pub fn disconnected() -> Self {
        ConsumerError::State("KafkaConsumer is not connected".to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsumerError::State(_) => ErrorKind::State,
            ConsumerError::Config(_) => ErrorKind::Config,
            ConsumerError::Protocol(e) if e.code.is_timeout_like() => ErrorKind::TimeoutLike,
            ConsumerError::Protocol(_) => ErrorKind::Protocol,
            ConsumerError::Validation(_) => ErrorKind::Validation,
            ConsumerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The error code handed back to the host binding.
    pub fn code(&self) -> ErrorCode {
        match self {
            ConsumerError::State(_) => ErrorCode::State,
            ConsumerError::Config(_) | ConsumerError::Validation(_) => ErrorCode::InvalidArg,
            ConsumerError::Protocol(e) => e.code,
            ConsumerError::Internal(_) => ErrorCode::Fail,
        }
    }

    /// The native error object, when the failure came from the client.
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            ConsumerError::Protocol(e) => Some(e),
            _ => None,
        }
    }

    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self.kind() {
            ErrorKind::State => "state",
            ErrorKind::Config => "configuration",
            ErrorKind::Protocol => "protocol",
            ErrorKind::TimeoutLike => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::Internal => "internal",
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ConsumerError::Protocol(e) => {
                if e.fatal {
                    return false;
                }
                e.retriable
                    || matches!(
                        e.code,
                        ErrorCode::TimedOut
                            | ErrorCode::TimedOutQueue
                            | ErrorCode::Transport
                            | ErrorCode::AllBrokersDown
                            | ErrorCode::RequestTimedOut
                            | ErrorCode::CoordinatorLoadInProgress
                            | ErrorCode::CoordinatorNotAvailable
                            | ErrorCode::NotCoordinator
                            | ErrorCode::RebalanceInProgress
                    )
            }
            ConsumerError::State(_)
            | ConsumerError::Config(_)
            | ConsumerError::Validation(_)
            | ConsumerError::Internal(_) => false,
        }
    }
}

impl From<NativeError> for ConsumerError {
    fn from(err: NativeError) -> Self {
        ConsumerError::Protocol(err)
    }
}

impl From<ErrorCode> for ConsumerError {
    fn from(code: ErrorCode) -> Self {
        ConsumerError::Protocol(NativeError::new(code))
    }
}

impl From<toml::de::Error> for ConsumerError {
    fn from(err: toml::de::Error) -> Self {
        ConsumerError::Config(err.to_string())
    }
}

impl From<std::io::Error> for ConsumerError {
    fn from(err: std::io::Error) -> Self {
        ConsumerError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ConsumerError {
    fn from(err: tokio::task::JoinError) -> Self {
        ConsumerError::Internal(err.to_string())
    }
}
