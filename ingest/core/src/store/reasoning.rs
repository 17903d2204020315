//! Reasoning segments
//!
//! In-flight map of reasoning blocks keyed by `(message id, segment id)`.
//! Segment ids are only unique within a message: id-less blocks all share
//! the default id and AI-SDK ids restart per message. A segment is opened
//! by `start`, grown by `append` and stamped by `end`; closed segments stay
//! readable until the store is cleared.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MessageId;

/// One reasoning block
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReasoningSegment {
    /// Segment id
    pub id: String,
    /// Message the reasoning belongs to
    pub message_id: MessageId,
    /// Accumulated text
    pub text: String,
    /// When the segment opened
    pub started_at: DateTime<Utc>,
    /// When the segment closed (None while in flight)
    pub ended_at: Option<DateTime<Utc>>,
}

impl ReasoningSegment {
    /// Whether the segment is still receiving text
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

type SegmentKey = (MessageId, String);

fn key(message_id: &MessageId, segment_id: &str) -> SegmentKey {
    (message_id.clone(), segment_id.to_string())
}

/// Reasoning segments in start order
#[derive(Debug, Default)]
pub struct ReasoningSegments {
    order: Vec<SegmentKey>,
    by_key: HashMap<SegmentKey, ReasoningSegment>,
}

impl ReasoningSegments {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a segment; restarting an existing one resets its text
    pub fn start(&mut self, message_id: &MessageId, segment_id: &str) {
        let segment = ReasoningSegment {
            id: segment_id.to_string(),
            message_id: message_id.clone(),
            text: String::new(),
            started_at: Utc::now(),
            ended_at: None,
        };
        let key = key(message_id, segment_id);
        if self.by_key.insert(key.clone(), segment).is_none() {
            self.order.push(key);
        }
    }

    /// Append text to an open segment
    pub fn append(&mut self, message_id: &MessageId, segment_id: &str, delta: &str) -> bool {
        match self.by_key.get_mut(&key(message_id, segment_id)) {
            Some(segment) if segment.is_open() => {
                segment.text.push_str(delta);
                true
            }
            _ => false,
        }
    }

    /// Close a segment
    pub fn end(&mut self, message_id: &MessageId, segment_id: &str) -> bool {
        match self.by_key.get_mut(&key(message_id, segment_id)) {
            Some(segment) if segment.is_open() => {
                segment.ended_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Look up a segment
    #[must_use]
    pub fn get(&self, message_id: &MessageId, segment_id: &str) -> Option<&ReasoningSegment> {
        self.by_key.get(&key(message_id, segment_id))
    }

    /// Segments belonging to one message, in start order
    pub fn for_message<'a>(
        &'a self,
        message_id: &'a MessageId,
    ) -> impl Iterator<Item = &'a ReasoningSegment> + 'a {
        self.order
            .iter()
            .filter(move |(owner, _)| owner == message_id)
            .filter_map(|key| self.by_key.get(key))
    }

    /// Number of segments still open
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.by_key.values().filter(|s| s.is_open()).count()
    }

    /// Number of segments
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no segment was ever started
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.by_key.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_lifecycle() {
        let mut segments = ReasoningSegments::new();
        let m1 = MessageId::from("m1");

        segments.start(&m1, "r1");
        assert!(segments.append(&m1, "r1", "first "));
        assert!(segments.append(&m1, "r1", "thought"));
        assert_eq!(segments.in_flight(), 1);

        assert!(segments.end(&m1, "r1"));
        assert!(!segments.append(&m1, "r1", "late"));
        assert!(!segments.end(&m1, "r1"));

        let segment = segments.get(&m1, "r1").unwrap();
        assert_eq!(segment.text, "first thought");
        assert!(segment.ended_at.unwrap() >= segment.started_at);
        assert_eq!(segments.in_flight(), 0);
    }

    #[test]
    fn test_for_message_filters() {
        let mut segments = ReasoningSegments::new();
        let m1 = MessageId::from("m1");
        let m2 = MessageId::from("m2");
        segments.start(&m1, "a");
        segments.start(&m2, "b");
        segments.start(&m1, "c");

        let ids: Vec<_> = segments.for_message(&m1).map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_same_segment_id_in_two_messages() {
        let mut segments = ReasoningSegments::new();
        let m1 = MessageId::from("m1");
        let m2 = MessageId::from("m2");

        segments.start(&m1, "reasoning");
        segments.append(&m1, "reasoning", "first thoughts");
        segments.end(&m1, "reasoning");
        segments.start(&m2, "reasoning");
        segments.append(&m2, "reasoning", "second");

        assert_eq!(segments.len(), 2);
        let first: Vec<_> = segments.for_message(&m1).map(|s| s.text.as_str()).collect();
        assert_eq!(first, vec!["first thoughts"]);
        assert!(!segments.get(&m1, "reasoning").unwrap().is_open());
        assert!(segments.get(&m2, "reasoning").unwrap().is_open());
    }

    #[test]
    fn test_restart_keeps_single_order_entry() {
        let mut segments = ReasoningSegments::new();
        let m1 = MessageId::from("m1");
        segments.start(&m1, "r");
        segments.append(&m1, "r", "old");
        segments.start(&m1, "r");
        assert_eq!(segments.len(), 1);
        assert_eq!(segments.get(&m1, "r").unwrap().text, "");
    }

    #[test]
    fn test_unknown_segment() {
        let mut segments = ReasoningSegments::new();
        let m1 = MessageId::from("m1");
        assert!(!segments.append(&m1, "missing", "x"));
        assert!(!segments.end(&m1, "missing"));
    }
}
