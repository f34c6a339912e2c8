//! Error types for the transport layer

use bytes::Bytes;
use giop::{GiopError, SystemException};
use std::sync::Arc;
use thiserror::Error;

/// How an error is handled by the layers above the one that raised it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Try the next contact info; never surfaced on its own
    Transient,
    /// Peer named a different target
    Redirect,
    /// Ends the invocation that observed it
    FatalToInvocation,
    /// Aborts the connection and every waiter registered on it
    FatalToConnection,
    /// A caller bug; returned as-is, never retried
    ProgrammingError,
}

/// Transport error types
///
/// Cloneable so a single connection abort can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection closed by peer")]
    ClosedByPeer,

    #[error("connect to {endpoint} failed: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    #[error("timeout")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("duplicate request id {0}")]
    DuplicateRequestId(u32),

    #[error("request id space exhausted")]
    RequestIdsExhausted,

    #[error("system exception: {0}")]
    SystemException(SystemException),

    #[error("user exception ({} bytes)", .0.len())]
    UserException(Bytes),

    #[error("more than {0} redirects")]
    RedirectLimitExceeded(usize),

    #[error("object reference has no usable profile")]
    NoContactInfo,

    #[error("acceptor {0} is not initialized")]
    NotInitialized(String),

    #[error("event multiplexer has shut down")]
    MultiplexerShutdown,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ConnectFailed { .. } | Self::ClosedByPeer => ErrorClass::Transient,
            Self::SystemException(ex) if ex.is_retryable() => ErrorClass::Transient,
            Self::Io(_) | Self::Protocol(_) | Self::ConnectionClosed => {
                ErrorClass::FatalToConnection
            }
            Self::DuplicateRequestId(_) | Self::RequestIdsExhausted | Self::Config(_) => {
                ErrorClass::ProgrammingError
            }
            Self::SystemException(_)
            | Self::UserException(_)
            | Self::Timeout
            | Self::Cancelled
            | Self::RedirectLimitExceeded(_)
            | Self::NoContactInfo
            | Self::NotInitialized(_)
            | Self::MultiplexerShutdown => ErrorClass::FatalToInvocation,
        }
    }

    /// Whether the failover iterator may move on to the next candidate.
    ///
    /// Connection-level failures count as retryable here: the connection is
    /// gone, but another endpoint may still serve the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Transient | ErrorClass::FatalToConnection
        ) && !matches!(self, Self::Protocol(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<GiopError> for TransportError {
    fn from(e: GiopError) -> Self {
        match e {
            GiopError::Io(io) => Self::Io(Arc::new(io)),
            GiopError::ConnectionClosed => Self::ClosedByPeer,
            other => Self::Protocol(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;
    use giop::{CompletionStatus, SystemExceptionKind};

    #[test]
    fn test_classification() {
        let refused = TransportError::ConnectFailed {
            endpoint: "iiop://127.0.0.1:1".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(refused.class(), ErrorClass::Transient);
        assert!(refused.is_retryable());

        let reset: TransportError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert_eq!(reset.class(), ErrorClass::FatalToConnection);
        assert!(reset.is_retryable());

        let marshal = TransportError::SystemException(SystemException::new(
            SystemExceptionKind::Marshal,
            0,
            CompletionStatus::No,
        ));
        assert_eq!(marshal.class(), ErrorClass::FatalToInvocation);
        assert!(!marshal.is_retryable());

        assert_eq!(
            TransportError::DuplicateRequestId(3).class(),
            ErrorClass::ProgrammingError
        );
    }

    #[test]
    fn test_wire_errors_map() {
        assert!(matches!(
            TransportError::from(GiopError::ConnectionClosed),
            TransportError::ClosedByPeer
        ));
        assert!(matches!(
            TransportError::from(GiopError::InvalidMessageType(9)),
            TransportError::Protocol(_)
        ));
    }
}
