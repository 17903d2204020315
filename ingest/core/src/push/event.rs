//! Push channel events

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IngestError, Result};

/// One server-pushed event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    /// Logical channel (filled from the connection when absent)
    #[serde(default)]
    pub channel: String,

    /// Event type, e.g. `message.part.updated`
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event payload
    #[serde(default)]
    pub properties: Value,

    /// Producer sequence number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,

    /// Resumption id, sent back as `lastEventId` on reconnect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    /// Producer timestamp (ms since epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,

    /// Session the event belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl PushEvent {
    /// Build an event with empty metadata
    pub fn new(channel: impl Into<String>, event_type: impl Into<String>, properties: Value) -> Self {
        Self {
            channel: channel.into(),
            event_type: event_type.into(),
            properties,
            sequence: None,
            event_id: None,
            timestamp: None,
            session_id: None,
        }
    }

    /// Set the resumption id
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Parse one line of the push stream
    ///
    /// An empty or missing `channel` is replaced by `default_channel`.
    pub fn parse(line: &str, default_channel: &str) -> Result<Self> {
        let mut event: Self = serde_json::from_str(line)
            .map_err(|e| IngestError::Parse(format!("Malformed push event: {e}")))?;
        if event.channel.is_empty() {
            event.channel = default_channel.to_string();
        }
        Ok(event)
    }

    /// String at a path inside `properties`
    #[must_use]
    pub fn property_str(&self, path: &[&str]) -> Option<&str> {
        path.iter()
            .try_fold(&self.properties, |value, key| value.get(key))
            .and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_fills_channel() {
        let event = PushEvent::parse(
            r#"{"type":"session.status","properties":{"sessionId":"s1"},"eventId":"e7"}"#,
            "workspace",
        )
        .unwrap();
        assert_eq!(event.channel, "workspace");
        assert_eq!(event.event_type, "session.status");
        assert_eq!(event.event_id.as_deref(), Some("e7"));
        assert_eq!(event.property_str(&["sessionId"]), Some("s1"));
    }

    #[test]
    fn test_parse_keeps_explicit_channel() {
        let event = PushEvent::parse(r#"{"type":"x","channel":"other"}"#, "workspace").unwrap();
        assert_eq!(event.channel, "other");
        assert_eq!(event.properties, Value::Null);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let err = PushEvent::parse("{not json", "c").unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
        assert!(PushEvent::parse(r#"{"properties":{}}"#, "c").is_err());
    }

    #[test]
    fn test_nested_property() {
        let event = PushEvent::new(
            "c",
            "message.part.updated",
            json!({"part": {"id": "p1", "messageId": "m1"}}),
        );
        assert_eq!(event.property_str(&["part", "messageId"]), Some("m1"));
        assert_eq!(event.property_str(&["part", "missing"]), None);
    }
}
