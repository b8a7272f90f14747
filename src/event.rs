// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Event: the unit of data flowing through the ingestion pipeline.
//!
//! An event is a key, a timestamp and a schema-less payload. It is built by a
//! producer, queued in an ingestion buffer, and finally persisted as one row.
//!
//! # Invariants
//! - Events are immutable once constructed (stamping returns a new value)
//! - The key must be non-empty before the event enters a buffer
//! - Duplicate keys are valid: events carry no identity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{EventError, EventResult};

/// Arbitrary JSON-like payload attached to an event.
pub type Payload = serde_json::Map<String, Value>;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    key: String,

    /// `None` until the event is emitted; emission stamps the current time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "null_as_empty")]
    data: Payload,
}

/// `0001-01-01T00:00:00Z` in Unix seconds. Some producers send this zero
/// instant instead of omitting an unset timestamp.
const ZERO_INSTANT_SECS: i64 = -62_135_596_800;

fn is_zero_instant(ts: &DateTime<Utc>) -> bool {
    ts.timestamp() == ZERO_INSTANT_SECS && ts.timestamp_subsec_nanos() == 0
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Payload, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Payload>::deserialize(deserializer)?.unwrap_or_default())
}

impl Event {
    /// Create an event with an empty payload and no timestamp.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            timestamp: None,
            data: Payload::new(),
        }
    }

    /// Replace the whole payload.
    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = data;
        self
    }

    /// Add (or overwrite) a single payload field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    /// Pin the event to an explicit instant.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// `None` when unset, including the zero instant.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.filter(|ts| !is_zero_instant(ts))
    }

    pub fn data(&self) -> &Payload {
        &self.data
    }

    /// Returns the event with `now` as its timestamp if it had none.
    pub fn stamped(self, now: DateTime<Utc>) -> Self {
        match self.timestamp() {
            Some(_) => self,
            None => self.at(now),
        }
    }

    /// Boundary validation, run before an event is accepted into a buffer.
    pub fn validate(&self) -> EventResult<()> {
        if self.key.trim().is_empty() {
            return Err(EventError::EmptyKey);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_empty_key_rejected() {
        assert_eq!(Event::new("").validate(), Err(EventError::EmptyKey));
        assert_eq!(Event::new("   ").validate(), Err(EventError::EmptyKey));
        assert!(Event::new("page_view").validate().is_ok());
    }

    #[test]
    fn test_stamped_keeps_explicit_timestamp() {
        let explicit = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let event = Event::new("login").at(explicit).stamped(later);
        assert_eq!(event.timestamp(), Some(explicit));

        let event = Event::new("login").stamped(later);
        assert_eq!(event.timestamp(), Some(later));
    }

    #[test]
    fn test_deserialize_without_timestamp_or_data() {
        let event: Event = serde_json::from_value(json!({ "key": "signup" })).unwrap();
        assert_eq!(event.key(), "signup");
        assert!(event.timestamp().is_none());
        assert!(event.data().is_empty());
    }

    #[test]
    fn test_wire_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let event = Event::new("click")
            .with_field("button", "buy")
            .with_field("price", 9.5)
            .at(ts);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["key"], "click");
        assert_eq!(value["timestamp"], "2024-06-01T12:00:00Z");
        assert_eq!(value["data"]["button"], "buy");
        assert_eq!(value["data"]["price"], 9.5);

        // Unstamped events omit the field entirely
        let value = serde_json::to_value(Event::new("click")).unwrap();
        assert!(value.get("timestamp").is_none());
    }

    #[test]
    fn test_null_data_reads_as_empty() {
        let raw = r#"{"key":"page_view","timestamp":"2024-01-01T00:00:00Z","data":null}"#;
        let event: Event = serde_json::from_str(raw).unwrap();
        assert!(event.data().is_empty());
        assert_eq!(
            event.timestamp(),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_zero_instant_counts_as_unset() {
        let raw = r#"{"key":"page_view","timestamp":"0001-01-01T00:00:00Z","data":null}"#;
        let event: Event = serde_json::from_str(raw).unwrap();
        assert!(event.timestamp().is_none());

        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap();
        assert_eq!(event.stamped(now).timestamp(), Some(now));

        // One nanosecond later is a real (if odd) instant
        let zero = Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap();
        let odd = zero + chrono::Duration::nanoseconds(1);
        assert_eq!(Event::new("x").at(odd).stamped(now).timestamp(), Some(odd));
    }

    #[test]
    fn test_nested_payload_preserved() {
        let raw = json!({
            "key": "checkout",
            "data": { "items": [1, 2, 3], "user": { "id": 7, "vip": true } }
        });
        let event: Event = serde_json::from_value(raw).unwrap();
        assert_eq!(event.data()["user"]["id"], 7);
        assert_eq!(event.data()["items"].as_array().map(Vec::len), Some(3));
    }
}
