//! Current Message Id Resolution
//!
//! Events that carry no `messageId` are attributed with a three-tier fallback:
//!
//! 1. the explicit id on the event,
//! 2. the last id established earlier in this session (by `message-start` or
//!    any explicitly tagged event),
//! 3. a session-scoped sentinel id.
//!
//! The fallback exists for raw-dialect producers that never tag ids. It is a
//! compatibility heuristic: two interleaved id-less messages on one session
//! cannot be told apart. Producers should tag every event.

use uuid::Uuid;

use crate::store::MessageId;

/// Prefix of the per-session sentinel id
pub const SENTINEL_PREFIX: &str = "stream-";

/// Tracks the current message id for one decoding session
#[derive(Clone, Debug)]
pub struct MessageIdResolver {
    last: Option<MessageId>,
    sentinel: MessageId,
}

impl Default for MessageIdResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIdResolver {
    /// Create a resolver with a fresh random sentinel
    #[must_use]
    pub fn new() -> Self {
        Self::with_sentinel(MessageId(format!("{SENTINEL_PREFIX}{}", Uuid::new_v4())))
    }

    /// Create a resolver with a caller-chosen sentinel (e.g. a pre-created
    /// assistant placeholder)
    #[must_use]
    pub fn with_sentinel(sentinel: MessageId) -> Self {
        Self {
            last: None,
            sentinel,
        }
    }

    /// Resolve the id for an event, remembering explicit ids
    pub fn resolve(&mut self, explicit: Option<&str>) -> MessageId {
        match explicit {
            Some(id) if !id.is_empty() => {
                let id = MessageId::from(id);
                self.last = Some(id.clone());
                id
            }
            _ => self.current(),
        }
    }

    /// The id an id-less event would be attributed to right now
    #[must_use]
    pub fn current(&self) -> MessageId {
        self.last.clone().unwrap_or_else(|| self.sentinel.clone())
    }

    /// The session sentinel
    #[must_use]
    pub fn sentinel(&self) -> &MessageId {
        &self.sentinel
    }

    /// Whether any explicit id has been seen
    #[must_use]
    pub fn has_explicit(&self) -> bool {
        self.last.is_some()
    }
}
