use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::{DEFAULT_WELCOME_KEY, ERROR_KEY, Envelope, Inbound, TransactionId, date};

/// Message codec for the hub's JSON text frames.
///
/// Outbound frames are `{ key, payload?, transaction_id }`. Inbound frames are
/// classified into [`Inbound`] by key: the error key, the welcome key, and
/// everything else (routed by transaction id).
///
/// An absent payload stays absent and an explicit `null` payload stays
/// `Some(Value::Null)` in both directions. ISO-8601 strings in inbound
/// payloads are revived into tagged dates unless disabled with
/// [`Codec::with_date_revival`].
#[derive(Debug, Clone)]
pub struct Codec {
    welcome_key: String,
    revive_dates: bool,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            welcome_key: DEFAULT_WELCOME_KEY.to_string(),
            revive_dates: true,
        }
    }
}

#[derive(Serialize)]
struct OutboundFrame<'a> {
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a Value>,
    transaction_id: &'a TransactionId,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    key: Option<String>,
    #[serde(default, deserialize_with = "crate::present")]
    payload: Option<Value>,
    #[serde(default)]
    transaction_id: Option<TransactionId>,
    #[serde(default)]
    message: Option<String>,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_welcome_key(mut self, key: impl Into<String>) -> Self {
        self.welcome_key = key.into();
        self
    }

    /// Whether ISO-8601 strings in inbound payloads are rewritten into tagged
    /// dates (see [`date::revive`]). On by default.
    pub fn with_date_revival(mut self, enabled: bool) -> Self {
        self.revive_dates = enabled;
        self
    }

    pub fn welcome_key(&self) -> &str {
        &self.welcome_key
    }

    pub fn revives_dates(&self) -> bool {
        self.revive_dates
    }

    pub fn encode(
        &self,
        key: &str,
        payload: Option<&Value>,
        transaction_id: &TransactionId,
    ) -> Result<String, ProtocolError> {
        let frame = OutboundFrame {
            key,
            payload,
            transaction_id,
        };
        Ok(serde_json::to_string(&frame)?)
    }

    pub fn encode_envelope(&self, envelope: &Envelope) -> Result<String, ProtocolError> {
        self.encode(
            &envelope.key,
            envelope.payload.as_ref(),
            &envelope.transaction_id,
        )
    }

    /// Encode the teardown frame for a subscription opened under `key`.
    pub fn encode_unsubscribe(
        &self,
        key: &str,
        transaction_id: &TransactionId,
    ) -> Result<String, ProtocolError> {
        self.encode(&crate::unsubscribe_key(key), None, transaction_id)
    }

    pub fn decode(&self, text: &str) -> Result<Inbound, ProtocolError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        let key = raw.key.ok_or(ProtocolError::MissingKey)?;
        let mut payload = raw.payload;
        if self.revive_dates {
            if let Some(payload) = payload.as_mut() {
                date::revive(payload);
            }
        }

        if key == ERROR_KEY {
            let transaction_id = raw
                .transaction_id
                .ok_or_else(|| ProtocolError::MissingTransactionId(key.clone()))?;
            let message = raw
                .message
                .or_else(|| {
                    payload
                        .as_ref()
                        .and_then(|p| p.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "unknown hub error".to_string());
            return Ok(Inbound::Error {
                transaction_id,
                message,
            });
        }

        if key == self.welcome_key {
            return Ok(Inbound::Welcome { payload });
        }

        Ok(match raw.transaction_id {
            Some(transaction_id) => Inbound::Reply(Envelope {
                key,
                payload,
                transaction_id,
            }),
            None => Inbound::Untagged { key, payload },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tid(s: &str) -> TransactionId {
        TransactionId::from(s)
    }

    #[test]
    fn encode_request_frame() {
        let codec = Codec::new();
        let text = codec
            .encode("ECHO", Some(&json!({"msg": "hi"})), &tid("aaaabbbbcccc"))
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"key": "ECHO", "payload": {"msg": "hi"}, "transaction_id": "aaaabbbbcccc"})
        );
    }

    #[test]
    fn encode_unsubscribe_frame_has_no_payload() {
        let codec = Codec::new();
        let text = codec
            .encode_unsubscribe("PRICE", &tid("aaaabbbbcccc"))
            .unwrap();
        assert_eq!(
            text,
            r#"{"key":"PRICE:UNSUBSCRIBE","transaction_id":"aaaabbbbcccc"}"#
        );
    }

    #[test]
    fn decode_reply() {
        let codec = Codec::new();
        let inbound = codec
            .decode(r#"{"key":"ECHO","payload":{"msg":"hi"},"transaction_id":"t1"}"#)
            .unwrap();
        assert_eq!(
            inbound,
            Inbound::Reply(Envelope {
                key: "ECHO".to_string(),
                payload: Some(json!({"msg": "hi"})),
                transaction_id: tid("t1"),
            })
        );
    }

    #[test]
    fn decode_error_frame() {
        let codec = Codec::new();
        let inbound = codec
            .decode(r#"{"key":"HUB:ERROR","transaction_id":"t1","message":"boom"}"#)
            .unwrap();
        assert_eq!(
            inbound,
            Inbound::Error {
                transaction_id: tid("t1"),
                message: "boom".to_string(),
            }
        );
    }

    #[test]
    fn decode_error_frame_without_id_is_rejected() {
        let codec = Codec::new();
        let err = codec
            .decode(r#"{"key":"HUB:ERROR","message":"boom"}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingTransactionId(_)));
    }

    #[test]
    fn decode_welcome_uses_configured_key() {
        let codec = Codec::new().with_welcome_key("HUB:HELLO");
        assert_eq!(
            codec.decode(r#"{"key":"HUB:HELLO"}"#).unwrap(),
            Inbound::Welcome { payload: None }
        );
        assert!(matches!(
            codec.decode(r#"{"key":"WELCOME"}"#).unwrap(),
            Inbound::Untagged { .. }
        ));
    }

    #[test]
    fn decode_malformed_frames() {
        let codec = Codec::new();
        assert!(matches!(
            codec.decode("{not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
        assert!(matches!(
            codec.decode(r#"{"payload":1}"#),
            Err(ProtocolError::MissingKey)
        ));
    }

    #[test]
    fn round_trip_preserves_envelope() {
        let codec = Codec::new();
        let envelope = Envelope {
            key: "STORE:LIST".to_string(),
            payload: Some(json!({"page": 2, "filters": ["art", "music"]})),
            transaction_id: TransactionId::generate(),
        };
        let text = codec.encode_envelope(&envelope).unwrap();
        assert_eq!(codec.decode(&text).unwrap(), Inbound::Reply(envelope));
    }

    #[test]
    fn explicit_null_payload_is_kept() {
        let codec = Codec::new();
        let text = codec.encode("X", Some(&Value::Null), &tid("t1")).unwrap();
        assert_eq!(text, r#"{"key":"X","payload":null,"transaction_id":"t1"}"#);
        assert_eq!(
            codec.decode(&text).unwrap(),
            Inbound::Reply(Envelope {
                key: "X".to_string(),
                payload: Some(Value::Null),
                transaction_id: tid("t1"),
            })
        );

        let absent = codec.encode("X", None, &tid("t1")).unwrap();
        assert_eq!(absent, r#"{"key":"X","transaction_id":"t1"}"#);
        let Inbound::Reply(envelope) = codec.decode(&absent).unwrap() else {
            panic!("expected reply");
        };
        assert_eq!(envelope.payload, None);
    }

    #[test]
    fn default_codec_revives_dates() {
        let text = r#"{"key":"X","payload":{"at":"2024-05-06T07:08:09Z"},"transaction_id":"t"}"#;
        let Inbound::Reply(envelope) = Codec::new().decode(text).unwrap() else {
            panic!("expected reply");
        };
        let payload = envelope.payload.unwrap();
        assert!(date::is_tagged(&payload["at"]));
        assert_eq!(date::from_value(&payload["at"]).unwrap().timestamp(), 1_714_979_289);

        let Inbound::Reply(plain) = Codec::new().with_date_revival(false).decode(text).unwrap()
        else {
            panic!("expected reply");
        };
        assert_eq!(plain.payload.unwrap()["at"], "2024-05-06T07:08:09Z");
    }

    #[test]
    fn round_trip_with_revival_turns_iso_strings_into_dates() {
        let codec = Codec::new();
        let created = "2024-05-06T07:08:09.250Z";
        let envelope = Envelope {
            key: "COLLECTION:GET".to_string(),
            payload: Some(json!({"name": "Genesis", "created_at": created})),
            transaction_id: tid("t9"),
        };
        let text = codec.encode_envelope(&envelope).unwrap();
        let Inbound::Reply(decoded) = codec.decode(&text).unwrap() else {
            panic!("expected reply");
        };
        let payload = decoded.payload.unwrap();
        assert_eq!(payload["name"], "Genesis");
        let revived = date::from_value(&payload["created_at"]).unwrap();
        let original = date::parse(created).unwrap();
        assert_eq!(revived.timestamp(), original.timestamp());

        // Reviving an already-revived payload is a no-op.
        let mut again = payload.clone();
        date::revive(&mut again);
        assert_eq!(again, payload);
    }
}
