use hublink_protocol::{ProtocolError, TransactionId};
use thiserror::Error;

use crate::config::ConfigError;
use crate::state::ConnectionState;

pub type SessionResult<T> = std::result::Result<T, SessionError>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no connection: call connect() first")]
    NoConnection,

    #[error("connection is {0}")]
    NotConnected(ConnectionState),

    /// The hub answered with `HUB:ERROR`.
    #[error("hub error: {0}")]
    Remote(String),

    #[error("timed out after {timeout_ms}ms waiting for {key} (transaction_id={transaction_id})")]
    Timeout {
        key: String,
        transaction_id: TransactionId,
        timeout_ms: u64,
    },

    /// The connection was discarded while the request was still pending.
    #[error("connection discarded before {key} was answered (transaction_id={transaction_id})")]
    Disconnected {
        key: String,
        transaction_id: TransactionId,
    },

    #[error("connection closed")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("failed to encode payload for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {key} payload: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Failures that may succeed after a reconnect.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoConnection
                | Self::NotConnected(_)
                | Self::Timeout { .. }
                | Self::Disconnected { .. }
                | Self::Closed
        )
    }

    /// The message carried by a `HUB:ERROR` frame, if this is one.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::Remote(message) => Some(message),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_errors() {
        assert!(SessionError::NoConnection.is_transient());
        assert!(SessionError::NotConnected(ConnectionState::Closed).is_transient());
        assert!(!SessionError::Remote("boom".to_string()).is_transient());
    }

    #[test]
    fn remote_message_accessor() {
        let err = SessionError::Remote("boom".to_string());
        assert_eq!(err.remote_message(), Some("boom"));
        assert_eq!(err.to_string(), "hub error: boom");
        assert!(SessionError::Closed.remote_message().is_none());
    }
}
