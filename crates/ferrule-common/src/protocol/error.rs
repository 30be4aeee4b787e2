use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::status::Status;

/// Which side of the wire an invocation timed out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// The request never made it onto the wire.
    Client,
    /// The request was sent but no response arrived in time.
    Server,
    /// The caller stopped waiting before the invocation completed.
    Wait,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Client => f.write_str("client"),
            TimeoutKind::Server => f.write_str("server"),
            TimeoutKind::Wait => f.write_str("wait"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum FerruleError {
    /// Malformed frame, bad magic, unknown message code or serializer.
    /// Fatal for the connection it was read from.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Channel {0} is closed")]
    Closed(u64),

    /// The channel's outbound queue stayed full for the whole retry budget.
    #[error("Channel {0} outbound queue is full")]
    ChannelBusy(u64),

    #[error("{kind} timeout after {millis}ms")]
    Timeout { kind: TimeoutKind, millis: u64 },

    /// Request-level failure reported by the provider (service not found,
    /// bad request, busy, flow control...). The connection stays usable.
    #[error("Remote error [{status:?}]: {message}")]
    Remote { status: Status, message: String },

    /// The provider method itself failed. `expected` is set when the
    /// provider declared the failure as part of the method's contract.
    #[error("Business error (expected: {expected}): {message}")]
    Business { message: String, expected: bool },

    #[error("No available provider for {0}")]
    NoAvailableProvider(String),

    #[error("All {attempts} attempts failed, last error: {last}")]
    AllTargetsFailed { attempts: usize, last: Box<FerruleError> },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl FerruleError {
    /// Whether a fail-over invoker may try another provider after this error.
    ///
    /// Business errors and bad requests would fail identically elsewhere.
    pub fn is_retryable(&self) -> bool {
        match self {
            FerruleError::Business { .. } | FerruleError::InvalidRequest(_) => false,
            FerruleError::Remote { status, .. } => !matches!(
                status,
                Status::BadRequest | Status::DeserializationFail
            ),
            _ => true,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FerruleError::Timeout { .. })
    }
}

impl From<std::io::Error> for FerruleError {
    fn from(err: std::io::Error) -> Self {
        FerruleError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for FerruleError {
    fn from(err: serde_json::Error) -> Self {
        FerruleError::Serialization(err.to_string())
    }
}

impl From<std::net::AddrParseError> for FerruleError {
    fn from(err: std::net::AddrParseError) -> Self {
        FerruleError::InvalidRequest(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FerruleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_names_side() {
        let err = FerruleError::Timeout {
            kind: TimeoutKind::Server,
            millis: 3000,
        };
        assert_eq!(err.to_string(), "server timeout after 3000ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FerruleError::Connection("reset".into()).is_retryable());
        assert!(FerruleError::Remote {
            status: Status::ServerBusy,
            message: String::new(),
        }
        .is_retryable());
        assert!(!FerruleError::Remote {
            status: Status::BadRequest,
            message: String::new(),
        }
        .is_retryable());
        assert!(!FerruleError::Business {
            message: "nope".into(),
            expected: true,
        }
        .is_retryable());
    }

    #[test]
    fn test_io_error_is_cloneable() {
        let err: FerruleError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
