//! Event sinks
//!
//! A session forwards every decoded event to exactly one [`StreamSink`].
//! Closures work directly; [`StoreSink`] applies events to a
//! [`ConversationStore`].

use serde_json::{json, Map, Value};

use crate::events::StreamEvent;
use crate::store::{ConversationStore, MessageId, MessageRole};

/// Receiver of decoded stream events
pub trait StreamSink {
    /// Handle one event. Terminal events arrive at most once per session.
    fn on_event(&mut self, event: StreamEvent);
}

impl<F> StreamSink for F
where
    F: FnMut(StreamEvent),
{
    fn on_event(&mut self, event: StreamEvent) {
        self(event);
    }
}

/// Sink that applies events to a conversation store
#[derive(Debug)]
pub struct StoreSink<'a> {
    store: &'a mut ConversationStore,
    role: MessageRole,
}

impl<'a> StoreSink<'a> {
    /// Apply events to `store`, creating assistant messages on demand
    pub fn new(store: &'a mut ConversationStore) -> Self {
        Self {
            store,
            role: MessageRole::Assistant,
        }
    }

    /// Role used for messages created by this sink
    #[must_use]
    pub fn with_role(mut self, role: MessageRole) -> Self {
        self.role = role;
        self
    }

    fn ensure(&mut self, id: &MessageId) {
        if self.store.ensure_message(id, self.role) {
            tracing::debug!(message_id = %id, "Created message from stream");
        }
    }
}

impl StreamSink for StoreSink<'_> {
    fn on_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::MessageStart { message_id } => self.ensure(&message_id),
            StreamEvent::TextDelta { message_id, delta } => {
                self.ensure(&message_id);
                self.store.append_text_delta(&message_id, &delta);
            }
            StreamEvent::ReasoningStart {
                message_id,
                segment_id,
            } => {
                self.ensure(&message_id);
                self.store.start_reasoning(&message_id, &segment_id);
            }
            StreamEvent::ReasoningDelta {
                message_id,
                segment_id,
                delta,
            } => {
                self.ensure(&message_id);
                // A delta without a start opens the segment; a closed one stays closed
                if self.store.reasoning().get(&message_id, &segment_id).is_none() {
                    self.store.start_reasoning(&message_id, &segment_id);
                }
                self.store.append_reasoning(&message_id, &segment_id, &delta);
            }
            StreamEvent::ReasoningEnd {
                message_id,
                segment_id,
            } => {
                self.store.end_reasoning(&message_id, &segment_id);
            }
            StreamEvent::ToolCallStart {
                message_id,
                call_id,
                name,
            } => {
                self.ensure(&message_id);
                self.store
                    .add_tool_call(&message_id, &call_id, &name, Value::Object(Map::new()));
            }
            // Arguments are applied once complete
            StreamEvent::ToolCallDelta { .. } => {}
            StreamEvent::ToolCallEnd {
                message_id,
                call_id,
                args,
            } => {
                self.ensure(&message_id);
                if !self.store.update_tool_call(&message_id, &call_id, args.clone()) {
                    self.store.add_tool_call(&message_id, &call_id, "", args);
                }
            }
            StreamEvent::ToolResult {
                message_id,
                call_id,
                result,
            } => {
                self.ensure(&message_id);
                self.store.add_tool_result(&message_id, &call_id, result);
            }
            StreamEvent::DataPart {
                message_id,
                kind,
                part_id,
                data,
                transient,
            } => {
                self.ensure(&message_id);
                self.store
                    .update_data_part(&message_id, &kind, part_id.as_deref(), data, transient);
            }
            StreamEvent::Finish { reason } => {
                self.store.append_activity(
                    "finish",
                    format!("Stream finished: {reason}"),
                    json!({ "reason": reason }),
                );
            }
            StreamEvent::Error { message } => {
                self.store.append_activity(
                    "error",
                    format!("Stream failed: {message}"),
                    json!({ "message": message }),
                );
            }
        }
    }
}
