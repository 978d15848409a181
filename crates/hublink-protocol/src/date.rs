//! Date values on the wire.
//!
//! The hub sends timestamps as ISO-8601 strings. Typed payloads should use
//! this module as a serde helper:
//!
//! ```
//! use chrono::{DateTime, Utc};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Listing {
//!     #[serde(with = "hublink_protocol::date")]
//!     created_at: DateTime<Utc>,
//! }
//! ```
//!
//! The helper accepts both a plain ISO-8601 string and the tagged
//! `{"$date": "<iso>"}` form produced by [`revive`], so payloads decode the
//! same way whether or not heuristic revival is enabled on the codec.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::{Map, Value};
use std::sync::LazyLock;

use crate::error::ProtocolError;

/// Object key of the explicit tagged date form.
pub const DATE_TAG: &str = "$date";

static ISO_DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?$")
        .expect("static regex")
});

/// Whether `s` has the shape of an ISO-8601 date-time.
pub fn looks_like_date(s: &str) -> bool {
    ISO_DATE_TIME.is_match(s)
}

/// Parse an ISO-8601 date-time. A missing offset is read as UTC.
pub fn parse(s: &str) -> Result<DateTime<Utc>, ProtocolError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ProtocolError::InvalidDate(s.to_string()))
}

/// Canonical wire text for a date.
pub fn format(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// The tagged `{"$date": "<iso>"}` representation of a date.
pub fn tagged(dt: &DateTime<Utc>) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(DATE_TAG.to_string(), Value::String(format(dt)));
    Value::Object(map)
}

/// Read a date from either a plain ISO string or the tagged form.
pub fn from_value(value: &Value) -> Result<DateTime<Utc>, ProtocolError> {
    match value {
        Value::String(s) => parse(s),
        Value::Object(map) if map.len() == 1 => match map.get(DATE_TAG) {
            Some(Value::String(s)) => parse(s),
            _ => Err(ProtocolError::InvalidDate(value.to_string())),
        },
        other => Err(ProtocolError::InvalidDate(other.to_string())),
    }
}

/// Whether `value` is a tagged date.
pub fn is_tagged(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.len() == 1 && map.get(DATE_TAG).is_some_and(Value::is_string))
}

/// Walk `value` and rewrite every string that looks like an ISO-8601
/// date-time into the tagged form. Strings that match the pattern but do not
/// parse (e.g. month 13) are left untouched.
pub fn revive(value: &mut Value) {
    let replacement = match value {
        Value::String(s) if looks_like_date(s) => parse(s).ok().map(|dt| tagged(&dt)),
        Value::Array(items) => {
            items.iter_mut().for_each(revive);
            None
        }
        // Already-tagged dates stay as they are.
        Value::Object(map) if map.len() == 1 && map.contains_key(DATE_TAG) => None,
        Value::Object(map) => {
            map.values_mut().for_each(revive);
            None
        }
        _ => None,
    };
    if let Some(replacement) = replacement {
        *value = replacement;
    }
}

pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(dt))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    from_value(&value).map_err(serde::de::Error::custom)
}

/// Same as the parent module, for optional fields.
pub mod option {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S>(dt: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match dt {
            Some(dt) => super::serialize(dt, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(None),
            value => super::from_value(&value)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
