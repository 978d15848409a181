use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse lifecycle of the underlying connection.
///
/// `Connecting -> Open -> Closing -> Closed`, or `Open -> Closed` directly when
/// the transport fails. There is no separate error state.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether frames may be handed to the transport. Frames written while
    /// `Connecting` are queued and flushed once the transport opens.
    pub fn accepts_frames(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Open => write!(f, "OPEN"),
            ConnectionState::Closing => write!(f, "CLOSING"),
            ConnectionState::Closed => write!(f, "CLOSED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_live_states_accept_frames() {
        assert!(ConnectionState::Connecting.accepts_frames());
        assert!(ConnectionState::Open.accepts_frames());
        assert!(!ConnectionState::Closing.accepts_frames());
        assert!(!ConnectionState::Closed.accepts_frames());
    }

    #[test]
    fn serializes_as_upper_case() {
        let json = serde_json::to_string(&ConnectionState::Closing).unwrap();
        assert_eq!(json, "\"CLOSING\"");
        assert_eq!(ConnectionState::Open.to_string(), "OPEN");
    }
}
