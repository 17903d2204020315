//! Normalized Conversation Store
//!
//! Canonical keyed conversation state fed by stream sessions and coalesced
//! push batches.
//!
//! # Design Philosophy
//!
//! Streaming produces tens of updates per second against the newest message
//! while the conversation may hold thousands. Messages therefore live in a
//! `HashMap` keyed by id with a separate `order` vector, and every mutation
//! is a single keyed lookup followed by an edit of that one message. Nothing
//! rescans the conversation.
//!
//! Invariants:
//! - `order` and the keys of `by_id` are equal as sets
//! - `order` holds no duplicates
//! - messages are removed only by [`ConversationStore::clear`]
//!
//! Mutations are expressed as [`StoreCommand`]s and applied through
//! [`ConversationStore::apply`]; every applied command broadcasts a
//! [`StoreChange`] to subscribers. The convenience methods are thin wrappers
//! over `apply`.

mod activity;
mod message;
mod reasoning;

pub use activity::{ActivityEvent, ActivityLog};
pub use message::{ConversationId, ConversationMessage, MessageId, MessageRole, Part};
pub use reasoning::{ReasoningSegment, ReasoningSegments};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of the change broadcast; slow subscribers observe `Lagged`
pub const CHANGE_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// Commands & changes
// ============================================================================

/// A keyed mutation of the store
#[derive(Clone, Debug, PartialEq)]
pub enum StoreCommand {
    /// Insert a copy of a message (replacing one with the same id in place)
    AddMessage(ConversationMessage),
    /// Create an empty message unless one with this id exists
    EnsureMessage {
        /// Message id
        id: MessageId,
        /// Role for a newly created message
        role: MessageRole,
    },
    /// Append to the message's first text part
    AppendTextDelta {
        /// Target message
        id: MessageId,
        /// Text to append
        delta: String,
    },
    /// Add a tool call part
    AddToolCall {
        /// Target message
        id: MessageId,
        /// Tool call id
        call_id: String,
        /// Tool name
        name: String,
        /// Initial arguments
        args: Value,
    },
    /// Replace a tool call's arguments
    UpdateToolCall {
        /// Target message
        id: MessageId,
        /// Tool call id
        call_id: String,
        /// Final arguments
        args: Value,
    },
    /// Record a tool result
    AddToolResult {
        /// Target message
        id: MessageId,
        /// Tool call id
        call_id: String,
        /// Tool output
        result: Value,
    },
    /// Upsert a data part by `(kind, part_id)`
    UpdateDataPart {
        /// Target message
        id: MessageId,
        /// Part type
        kind: String,
        /// Part id (None always appends)
        part_id: Option<String>,
        /// Payload
        data: Value,
        /// Transient flag
        transient: bool,
    },
    /// Open (or restart) a reasoning segment
    StartReasoning {
        /// Owning message
        id: MessageId,
        /// Segment id, unique within the message
        segment_id: String,
    },
    /// Append to an open reasoning segment
    AppendReasoning {
        /// Owning message
        id: MessageId,
        /// Segment id
        segment_id: String,
        /// Text to append
        delta: String,
    },
    /// Close a reasoning segment
    EndReasoning {
        /// Owning message
        id: MessageId,
        /// Segment id
        segment_id: String,
    },
    /// Record an activity log entry
    AppendActivity {
        /// Category, e.g. `finish` or `error`
        kind: String,
        /// One-line description
        summary: String,
        /// Structured detail
        data: Value,
    },
    /// Reset all state
    Clear,
}

/// What an applied command changed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreChange {
    /// A message was inserted
    MessageAdded(MessageId),
    /// An existing message was modified
    MessageUpdated(MessageId),
    /// A reasoning segment was opened, grown or closed
    ReasoningUpdated {
        /// Owning message
        id: MessageId,
        /// Segment id
        segment_id: String,
    },
    /// An activity entry was recorded (carries the entry id)
    ActivityAppended(String),
    /// All state was reset
    Cleared,
}

/// Store instrumentation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Keyed message lookups performed
    pub keyed_lookups: u64,
    /// Commands that changed state
    pub commands_applied: u64,
}

// ============================================================================
// Store
// ============================================================================

/// Normalized conversation state plus its activity log and reasoning map
#[derive(Debug)]
pub struct ConversationStore {
    order: Vec<MessageId>,
    by_id: HashMap<MessageId, ConversationMessage>,
    activity: ActivityLog,
    reasoning: ReasoningSegments,
    keyed_lookups: AtomicU64,
    commands_applied: u64,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            order: Vec::new(),
            by_id: HashMap::new(),
            activity: ActivityLog::new(),
            reasoning: ReasoningSegments::new(),
            keyed_lookups: AtomicU64::new(0),
            commands_applied: 0,
            changes,
        }
    }

    /// Subscribe to changes applied after this call
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Apply a command; returns None when its target does not exist or
    /// nothing changed
    pub fn apply(&mut self, command: StoreCommand) -> Option<StoreChange> {
        let change = match command {
            StoreCommand::AddMessage(message) => self.insert_message(message),
            StoreCommand::EnsureMessage { id, role } => {
                if self.lookup_mut(&id).is_some() {
                    return None;
                }
                self.insert_message(ConversationMessage::new(id, role))
            }
            StoreCommand::AppendTextDelta { id, delta } => {
                let message = self.lookup_mut(&id)?;
                append_text(message, &delta);
                StoreChange::MessageUpdated(id)
            }
            StoreCommand::AddToolCall {
                id,
                call_id,
                name,
                args,
            } => {
                let message = self.lookup_mut(&id)?;
                if message.tool_call(&call_id).is_some() {
                    return None;
                }
                message.parts.push(Part::ToolCall {
                    call_id,
                    name,
                    args,
                });
                StoreChange::MessageUpdated(id)
            }
            StoreCommand::UpdateToolCall { id, call_id, args } => {
                let message = self.lookup_mut(&id)?;
                let part = message.parts.iter_mut().find_map(|part| match part {
                    Part::ToolCall {
                        call_id: existing,
                        args: slot,
                        ..
                    } if *existing == call_id => Some(slot),
                    _ => None,
                })?;
                *part = args;
                StoreChange::MessageUpdated(id)
            }
            StoreCommand::AddToolResult {
                id,
                call_id,
                result,
            } => {
                let message = self.lookup_mut(&id)?;
                let existing = message.parts.iter_mut().find_map(|part| match part {
                    Part::ToolResult {
                        call_id: existing,
                        result: slot,
                    } if *existing == call_id => Some(slot),
                    _ => None,
                });
                match existing {
                    Some(slot) => *slot = result,
                    None => message.parts.push(Part::ToolResult { call_id, result }),
                }
                StoreChange::MessageUpdated(id)
            }
            StoreCommand::UpdateDataPart {
                id,
                kind,
                part_id,
                data,
                transient,
            } => {
                let message = self.lookup_mut(&id)?;
                upsert_data_part(message, kind, part_id, data, transient);
                StoreChange::MessageUpdated(id)
            }
            StoreCommand::StartReasoning { id, segment_id } => {
                self.reasoning.start(&id, &segment_id);
                StoreChange::ReasoningUpdated { id, segment_id }
            }
            StoreCommand::AppendReasoning {
                id,
                segment_id,
                delta,
            } => {
                if !self.reasoning.append(&id, &segment_id, &delta) {
                    return None;
                }
                StoreChange::ReasoningUpdated { id, segment_id }
            }
            StoreCommand::EndReasoning { id, segment_id } => {
                if !self.reasoning.end(&id, &segment_id) {
                    return None;
                }
                StoreChange::ReasoningUpdated { id, segment_id }
            }
            StoreCommand::AppendActivity {
                kind,
                summary,
                data,
            } => StoreChange::ActivityAppended(self.activity.append(kind, summary, data)),
            StoreCommand::Clear => {
                self.order.clear();
                self.by_id.clear();
                self.activity.clear();
                self.reasoning.clear();
                StoreChange::Cleared
            }
        };

        self.commands_applied += 1;
        // No subscribers is not an error
        let _ = self.changes.send(change.clone());
        Some(change)
    }

    // ------------------------------------------------------------------------
    // Keyed operations
    // ------------------------------------------------------------------------

    /// Insert a copy of `message`
    pub fn add_message(&mut self, message: &ConversationMessage) {
        self.apply(StoreCommand::AddMessage(message.clone()));
    }

    /// Create an empty message unless it exists; returns true when created
    pub fn ensure_message(&mut self, id: &MessageId, role: MessageRole) -> bool {
        self.apply(StoreCommand::EnsureMessage {
            id: id.clone(),
            role,
        })
        .is_some()
    }

    /// Mutate one message in place
    pub fn update_message<F>(&mut self, id: &MessageId, mutate: F) -> bool
    where
        F: FnOnce(&mut ConversationMessage),
    {
        let Some(message) = self.lookup_mut(id) else {
            return false;
        };
        mutate(message);
        // Callers may rewrite the id field; the key stays authoritative
        message.id = id.clone();
        self.commands_applied += 1;
        let _ = self.changes.send(StoreChange::MessageUpdated(id.clone()));
        true
    }

    /// Append text to the message's first text part
    pub fn append_text_delta(&mut self, id: &MessageId, delta: &str) -> bool {
        self.apply(StoreCommand::AppendTextDelta {
            id: id.clone(),
            delta: delta.to_string(),
        })
        .is_some()
    }

    /// Add a tool call to one message
    pub fn add_tool_call(&mut self, id: &MessageId, call_id: &str, name: &str, args: Value) -> bool {
        self.apply(StoreCommand::AddToolCall {
            id: id.clone(),
            call_id: call_id.to_string(),
            name: name.to_string(),
            args,
        })
        .is_some()
    }

    /// Replace a tool call's arguments
    pub fn update_tool_call(&mut self, id: &MessageId, call_id: &str, args: Value) -> bool {
        self.apply(StoreCommand::UpdateToolCall {
            id: id.clone(),
            call_id: call_id.to_string(),
            args,
        })
        .is_some()
    }

    /// Record a tool result
    pub fn add_tool_result(&mut self, id: &MessageId, call_id: &str, result: Value) -> bool {
        self.apply(StoreCommand::AddToolResult {
            id: id.clone(),
            call_id: call_id.to_string(),
            result,
        })
        .is_some()
    }

    /// Upsert a data part keyed by `(kind, part_id)`
    pub fn update_data_part(
        &mut self,
        id: &MessageId,
        kind: &str,
        part_id: Option<&str>,
        data: Value,
        transient: bool,
    ) -> bool {
        self.apply(StoreCommand::UpdateDataPart {
            id: id.clone(),
            kind: kind.to_string(),
            part_id: part_id.map(String::from),
            data,
            transient,
        })
        .is_some()
    }

    /// Open a reasoning segment of one message
    pub fn start_reasoning(&mut self, id: &MessageId, segment_id: &str) {
        self.apply(StoreCommand::StartReasoning {
            id: id.clone(),
            segment_id: segment_id.to_string(),
        });
    }

    /// Append to an open reasoning segment; false when it is unknown or closed
    pub fn append_reasoning(&mut self, id: &MessageId, segment_id: &str, delta: &str) -> bool {
        self.apply(StoreCommand::AppendReasoning {
            id: id.clone(),
            segment_id: segment_id.to_string(),
            delta: delta.to_string(),
        })
        .is_some()
    }

    /// Close a reasoning segment
    pub fn end_reasoning(&mut self, id: &MessageId, segment_id: &str) -> bool {
        self.apply(StoreCommand::EndReasoning {
            id: id.clone(),
            segment_id: segment_id.to_string(),
        })
        .is_some()
    }

    /// Record an activity entry and return its id
    pub fn append_activity(
        &mut self,
        kind: impl Into<String>,
        summary: impl Into<String>,
        data: Value,
    ) -> Option<String> {
        let change = self.apply(StoreCommand::AppendActivity {
            kind: kind.into(),
            summary: summary.into(),
            data,
        });
        match change {
            Some(StoreChange::ActivityAppended(entry_id)) => Some(entry_id),
            _ => None,
        }
    }

    /// Reset messages, activity and reasoning
    pub fn clear(&mut self) {
        self.apply(StoreCommand::Clear);
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Look up a message by id
    #[must_use]
    pub fn get_message(&self, id: &MessageId) -> Option<&ConversationMessage> {
        self.keyed_lookups.fetch_add(1, Ordering::Relaxed);
        self.by_id.get(id)
    }

    /// Messages in insertion order
    #[must_use]
    pub fn messages(&self) -> Vec<&ConversationMessage> {
        self.order.iter().filter_map(|id| self.by_id.get(id)).collect()
    }

    /// Message ids in insertion order
    #[must_use]
    pub fn order(&self) -> &[MessageId] {
        &self.order
    }

    /// Number of messages
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.order.len()
    }

    /// Activity log
    #[must_use]
    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// Reasoning segments
    #[must_use]
    pub fn reasoning(&self) -> &ReasoningSegments {
        &self.reasoning
    }

    /// Instrumentation counters
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            keyed_lookups: self.keyed_lookups.load(Ordering::Relaxed),
            commands_applied: self.commands_applied,
        }
    }

    fn lookup_mut(&mut self, id: &MessageId) -> Option<&mut ConversationMessage> {
        self.keyed_lookups.fetch_add(1, Ordering::Relaxed);
        self.by_id.get_mut(id)
    }

    fn insert_message(&mut self, message: ConversationMessage) -> StoreChange {
        let id = message.id.clone();
        if self.by_id.insert(id.clone(), message).is_some() {
            StoreChange::MessageUpdated(id)
        } else {
            self.order.push(id.clone());
            StoreChange::MessageAdded(id)
        }
    }
}

fn append_text(message: &mut ConversationMessage, delta: &str) {
    for part in &mut message.parts {
        if let Part::Text { text } = part {
            text.push_str(delta);
            return;
        }
    }
    message.parts.push(Part::text(delta));
}

fn upsert_data_part(
    message: &mut ConversationMessage,
    kind: String,
    part_id: Option<String>,
    data: Value,
    transient: bool,
) {
    if part_id.is_some() {
        let existing = message.parts.iter_mut().find(|part| {
            matches!(
                part,
                Part::DataPart { kind: k, part_id: p, .. } if *k == kind && *p == part_id
            )
        });
        if let Some(slot) = existing {
            *slot = Part::DataPart {
                kind,
                part_id,
                data,
                transient,
            };
            return;
        }
    }
    message.parts.push(Part::DataPart {
        kind,
        part_id,
        data,
        transient,
    });
}
