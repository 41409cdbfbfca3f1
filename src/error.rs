use crate::core::Timestamp;
use thiserror::Error;

/// Why a stream refused a packet or a close.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream is closed")]
    Closed,
    #[error("timestamp {got} does not follow last accepted timestamp {last}")]
    NonIncreasingTimestamp { last: Timestamp, got: Timestamp },
    #[error("timestamp {0} cannot be carried by a packet")]
    InvalidTimestamp(Timestamp),
    #[error("queue is full")]
    QueueFull,
    #[error("expected `{expected}`, got `{got}`")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },
    #[error("no such graph input stream")]
    UnknownStream,
    #[error("graph is not running")]
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Bad topology or contract, found before any packet flows.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Rejected injection or close. The run itself is unaffected.
    #[error("stream `{stream}`: {reason}")]
    StreamProtocol { stream: String, reason: StreamError },

    #[error("node `{node}` failed at {timestamp}: {message}")]
    Processing {
        node: String,
        timestamp: Timestamp,
        message: String,
    },

    #[error("observer on `{stream}` failed at {timestamp}: {message}")]
    Observer {
        stream: String,
        timestamp: Timestamp,
        message: String,
    },

    #[error("graph has not been started")]
    NotRunning,

    #[error("graph has already been started")]
    AlreadyStarted,

    #[error("internal scheduler error: {0}")]
    Internal(String),
}

impl GraphError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn stream(stream: impl Into<String>, reason: StreamError) -> Self {
        Self::StreamProtocol {
            stream: stream.into(),
            reason,
        }
    }

    pub(crate) fn processing(node: &str, timestamp: Timestamp, err: &anyhow::Error) -> Self {
        Self::Processing {
            node: node.to_string(),
            timestamp,
            message: format!("{:#}", err),
        }
    }

    /// Whether this error ended a run, as opposed to rejecting one call.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::StreamProtocol { .. })
    }
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;
