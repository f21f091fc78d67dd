//! Event messages and tracking tokens.
//!
//! Payloads are carried as `serde_json::Value` so handlers, interceptors and
//! sources can be composed without knowing concrete payload types.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key/value metadata attached to a message. Correlation data lives here.
pub type MetaData = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// EventMessage
// ---------------------------------------------------------------------------

/// An event flowing from a message source into event processors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Unique message identifier (UUID v4 unless supplied by the source).
    pub identifier: String,
    /// Logical payload type name, e.g. `"OrderPlaced"`.
    pub payload_type: String,
    /// The payload itself.
    pub payload: Value,
    /// Identifier of the aggregate that published this event, if any.
    pub aggregate_identifier: Option<String>,
    /// Message metadata.
    pub metadata: MetaData,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp_millis: u64,
}

impl EventMessage {
    /// Creates a message with a fresh identifier and the current timestamp.
    #[must_use]
    pub fn new(payload_type: impl Into<String>, payload: Value) -> Self {
        Self {
            identifier: uuid::Uuid::new_v4().to_string(),
            payload_type: payload_type.into(),
            payload,
            aggregate_identifier: None,
            metadata: MetaData::new(),
            timestamp_millis: now_millis(),
        }
    }

    /// Sets the aggregate identifier.
    #[must_use]
    pub fn with_aggregate(mut self, aggregate_identifier: impl Into<String>) -> Self {
        self.aggregate_identifier = Some(aggregate_identifier.into());
        self
    }

    /// Adds a single metadata entry, replacing any existing value for `key`.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merges `extra` into this message's metadata. Entries in `extra` win.
    #[must_use]
    pub fn and_metadata(mut self, extra: &MetaData) -> Self {
        for (key, value) in extra {
            self.metadata.insert(key.clone(), value.clone());
        }
        self
    }

    /// Returns a metadata entry as a string slice, if present and a string.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

// ---------------------------------------------------------------------------
// TrackingToken
// ---------------------------------------------------------------------------

/// Position of an event within a streamable message source.
///
/// Tokens are global, zero-based indexes. A processor that stored token `n`
/// has handled every event up to and including index `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackingToken(pub u64);

impl TrackingToken {
    /// The index this token points at.
    #[must_use]
    pub fn index(self) -> u64 {
        self.0
    }
}

/// An event paired with its position in the source it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedEventMessage {
    pub token: TrackingToken,
    pub message: EventMessage,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn new_message_has_unique_identifier() {
        let a = EventMessage::new("OrderPlaced", json!({"id": 1}));
        let b = EventMessage::new("OrderPlaced", json!({"id": 1}));
        assert_ne!(a.identifier, b.identifier);
        assert!(a.aggregate_identifier.is_none());
        assert!(a.metadata.is_empty());
    }

    #[test]
    fn and_metadata_overrides_existing_keys() {
        let mut extra = MetaData::new();
        extra.insert("traceId".to_string(), json!("t-2"));
        extra.insert("tenant".to_string(), json!("acme"));

        let msg = EventMessage::new("OrderPlaced", Value::Null)
            .with_metadata("traceId", "t-1")
            .and_metadata(&extra);

        assert_eq!(msg.metadata_str("traceId"), Some("t-2"));
        assert_eq!(msg.metadata_str("tenant"), Some("acme"));
    }

    #[test]
    fn message_serializes_to_json() {
        let msg = EventMessage::new("OrderPlaced", json!({"total": 10})).with_aggregate("order-1");
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: EventMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn tokens_order_by_index() {
        assert!(TrackingToken(3) > TrackingToken(2));
        assert_eq!(TrackingToken(7).index(), 7);
    }
}
