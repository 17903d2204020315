//! Activity log
//!
//! Flat append-only record of session-level happenings (finishes, errors,
//! push notices). Same order + by-id layout as the message store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One entry in the activity log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Entry id
    pub id: String,
    /// Category, e.g. `finish` or `error`
    pub kind: String,
    /// One-line description
    pub summary: String,
    /// Structured detail
    pub data: Value,
    /// When the entry was recorded
    pub at: DateTime<Utc>,
}

/// Append-only activity entries
#[derive(Debug, Default)]
pub struct ActivityLog {
    order: Vec<String>,
    by_id: HashMap<String, ActivityEvent>,
}

impl ActivityLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry and return its id
    pub fn append(&mut self, kind: impl Into<String>, summary: impl Into<String>, data: Value) -> String {
        let id = Uuid::new_v4().to_string();
        let event = ActivityEvent {
            id: id.clone(),
            kind: kind.into(),
            summary: summary.into(),
            data,
            at: Utc::now(),
        };
        self.order.push(id.clone());
        self.by_id.insert(id.clone(), event);
        id
    }

    /// Look up an entry
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ActivityEvent> {
        self.by_id.get(id)
    }

    /// Entries in insertion order
    pub fn entries(&self) -> impl Iterator<Item = &ActivityEvent> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.by_id.clear();
    }
}
