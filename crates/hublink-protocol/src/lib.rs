pub mod codec;
pub mod date;
pub mod error;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use codec::Codec;
pub use error::ProtocolError;

/// Key the hub uses to reject a specific outstanding request.
pub const ERROR_KEY: &str = "HUB:ERROR";

/// Default key of the application-level readiness frame.
pub const DEFAULT_WELCOME_KEY: &str = "WELCOME";

/// Suffix appended to a subscription key to tear it down upstream.
pub const UNSUBSCRIBE_SUFFIX: &str = ":UNSUBSCRIBE";

/// Length of client-generated transaction identifiers.
pub const TRANSACTION_ID_LEN: usize = 12;

/// Returns the teardown key for a subscription key (`PRICE` -> `PRICE:UNSUBSCRIBE`).
pub fn unsubscribe_key(key: &str) -> String {
    format!("{key}{UNSUBSCRIBE_SUFFIX}")
}

/// Client-generated correlation token linking a request or subscription to
/// its replies.
///
/// Uniqueness is statistical only: 12 alphanumeric characters give ~71 bits
/// of randomness, which is plenty for the lifetime of one connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TRANSACTION_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The `{ key, payload, transaction_id }` unit of wire communication.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub key: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub payload: Option<serde_json::Value>,
    pub transaction_id: TransactionId,
}

/// Deserialize a field that is present on the wire, keeping an explicit
/// `null` as `Some(Value::Null)`. Absent fields fall back to `default`.
pub(crate) fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}

/// A decoded inbound frame, classified by what the dispatcher must do with it.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Success reply or subscription push, routed by transaction id.
    Reply(Envelope),
    /// `HUB:ERROR` frame rejecting one outstanding request.
    Error {
        transaction_id: TransactionId,
        message: String,
    },
    /// Application-level readiness signal.
    Welcome { payload: Option<serde_json::Value> },
    /// Keyed frame with no transaction id. Nothing in the core consumes these.
    Untagged {
        key: String,
        payload: Option<serde_json::Value>,
    },
}

impl Inbound {
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            Inbound::Reply(envelope) => Some(&envelope.transaction_id),
            Inbound::Error { transaction_id, .. } => Some(transaction_id),
            Inbound::Welcome { .. } | Inbound::Untagged { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Typed command keys
// ---------------------------------------------------------------------------

/// A request/response command with a fixed key and payload shapes.
///
/// ```
/// use hublink_protocol::Command;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize)]
/// struct BalanceQuery { wallet: String }
///
/// #[derive(Deserialize)]
/// struct Balance { amount: String }
///
/// struct GetBalance;
///
/// impl Command for GetBalance {
///     const KEY: &'static str = "WALLET:BALANCE";
///     type Request = BalanceQuery;
///     type Response = Balance;
/// }
/// ```
pub trait Command {
    const KEY: &'static str;
    type Request: Serialize;
    type Response: DeserializeOwned;
}

/// A push subscription with a fixed key, argument shape and update shape.
pub trait Topic {
    const KEY: &'static str;
    type Args: Serialize;
    type Update: DeserializeOwned;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_are_fixed_length_alphanumeric() {
        let id = TransactionId::generate();
        assert_eq!(id.as_str().len(), TRANSACTION_ID_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn transaction_ids_differ_between_calls() {
        let a = TransactionId::generate();
        let b = TransactionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn unsubscribe_key_appends_marker() {
        assert_eq!(unsubscribe_key("PRICE"), "PRICE:UNSUBSCRIBE");
        assert_eq!(
            unsubscribe_key("STORE:ORDERS"),
            "STORE:ORDERS:UNSUBSCRIBE"
        );
    }

    #[test]
    fn envelope_omits_missing_payload() {
        let envelope = Envelope {
            key: "PRICE:UNSUBSCRIBE".to_string(),
            payload: None,
            transaction_id: TransactionId::from("abc123def456"),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(
            json,
            r#"{"key":"PRICE:UNSUBSCRIBE","transaction_id":"abc123def456"}"#
        );
    }

    #[test]
    fn inbound_transaction_id_accessor() {
        let reply = Inbound::Reply(Envelope {
            key: "ECHO".to_string(),
            payload: None,
            transaction_id: TransactionId::from("t1"),
        });
        assert_eq!(reply.transaction_id().map(|t| t.as_str()), Some("t1"));
        assert!(Inbound::Welcome { payload: None }.transaction_id().is_none());
    }
}
