//! Typed object dispatch
//!
//! Shared by framed `data:` payloads and raw `b:` lines. Dispatch is on the
//! object's `type` field; unknown types are dropped.

use serde_json::{Map, Value};

use super::{error_message, str_field, StreamDecoder};
use crate::events::{StreamEvent, DEFAULT_FINISH_REASON};

/// Segment id used when a reasoning event carries none
const DEFAULT_SEGMENT_ID: &str = "reasoning";

impl StreamDecoder {
    /// Dispatch one typed object; returns false when it was not understood
    pub(super) fn decode_typed(
        &mut self,
        obj: &Map<String, Value>,
        events: &mut Vec<StreamEvent>,
    ) -> bool {
        let Some(kind) = str_field(obj, "type") else {
            return false;
        };
        let explicit = str_field(obj, "messageId");

        match kind {
            "start" | "message-start" => {
                let message_id = self.ids.resolve(explicit);
                events.push(StreamEvent::MessageStart { message_id });
            }

            "text-delta" => {
                let Some(delta) = str_field(obj, "delta").or_else(|| str_field(obj, "textDelta"))
                else {
                    return false;
                };
                let message_id = self.ids.resolve(explicit);
                if !delta.is_empty() {
                    events.push(StreamEvent::TextDelta {
                        message_id,
                        delta: delta.to_string(),
                    });
                }
            }

            // Boundaries only; they still establish the message id
            "text-start" | "text-end" | "start-step" | "finish-step" => {
                self.ids.resolve(explicit);
            }

            "reasoning-start" | "reasoning-delta" | "reasoning-end" => {
                return self.decode_reasoning(kind, obj, explicit, events);
            }

            "tool-call" => {
                let Some(call_id) = call_id_field(obj) else {
                    return false;
                };
                let message_id = self.ids.resolve(explicit);
                let args = obj
                    .get("args")
                    .or_else(|| obj.get("input"))
                    .cloned()
                    .unwrap_or_else(empty_object);
                events.push(StreamEvent::ToolCallStart {
                    message_id: message_id.clone(),
                    call_id: call_id.to_string(),
                    name: tool_name_field(obj).to_string(),
                });
                events.push(StreamEvent::ToolCallEnd {
                    message_id,
                    call_id: call_id.to_string(),
                    args,
                });
            }

            "tool-input-start" => {
                let Some(call_id) = call_id_field(obj) else {
                    return false;
                };
                let name = tool_name_field(obj);
                let message_id = self.ids.resolve(explicit);
                self.tool_inputs.open(call_id, name);
                events.push(StreamEvent::ToolCallStart {
                    message_id,
                    call_id: call_id.to_string(),
                    name: name.to_string(),
                });
            }

            "tool-input-delta" => {
                let Some(call_id) = call_id_field(obj) else {
                    return false;
                };
                let delta = str_field(obj, "inputTextDelta")
                    .or_else(|| str_field(obj, "argsTextDelta"))
                    .unwrap_or_default();
                if !self.tool_inputs.append(call_id, delta) {
                    tracing::debug!(call_id, "Tool input delta for unknown call");
                    return false;
                }
                let message_id = self.ids.resolve(explicit);
                events.push(StreamEvent::ToolCallDelta {
                    message_id,
                    call_id: call_id.to_string(),
                    arg_text_delta: delta.to_string(),
                });
            }

            "tool-input-end" => {
                let Some(call_id) = call_id_field(obj) else {
                    return false;
                };
                let Some(closed) = self.tool_inputs.close(call_id) else {
                    tracing::debug!(call_id, "Tool input end for unknown call");
                    return false;
                };
                let message_id = self.ids.resolve(explicit);
                events.push(StreamEvent::ToolCallEnd {
                    message_id,
                    call_id: call_id.to_string(),
                    args: closed.args,
                });
            }

            "tool-input-available" => {
                let Some(call_id) = call_id_field(obj) else {
                    return false;
                };
                let message_id = self.ids.resolve(explicit);
                if !self.tool_inputs.discard(call_id) {
                    events.push(StreamEvent::ToolCallStart {
                        message_id: message_id.clone(),
                        call_id: call_id.to_string(),
                        name: tool_name_field(obj).to_string(),
                    });
                }
                events.push(StreamEvent::ToolCallEnd {
                    message_id,
                    call_id: call_id.to_string(),
                    args: obj.get("input").cloned().unwrap_or_else(empty_object),
                });
            }

            "tool-result" | "tool-output-available" => {
                let Some(call_id) = call_id_field(obj) else {
                    return false;
                };
                let message_id = self.ids.resolve(explicit);
                let result = obj
                    .get("result")
                    .or_else(|| obj.get("output"))
                    .cloned()
                    .unwrap_or(Value::Null);
                events.push(StreamEvent::ToolResult {
                    message_id,
                    call_id: call_id.to_string(),
                    result,
                });
            }

            "finish" | "finish-message" => {
                let reason = str_field(obj, "finishReason").unwrap_or(DEFAULT_FINISH_REASON);
                self.emit_terminal(StreamEvent::finish(reason), events);
            }

            "error" => {
                let message = error_message(&Value::Object(obj.clone()));
                self.emit_terminal(StreamEvent::error(message), events);
            }

            data if data.starts_with("data-") => {
                let event = self.data_part(data, obj);
                events.push(event);
            }

            other => {
                tracing::trace!(kind = other, "Ignoring unknown event type");
                return false;
            }
        }
        true
    }

    fn decode_reasoning(
        &mut self,
        kind: &str,
        obj: &Map<String, Value>,
        explicit: Option<&str>,
        events: &mut Vec<StreamEvent>,
    ) -> bool {
        let message_id = self.ids.resolve(explicit);
        let segment_id = str_field(obj, "id").unwrap_or(DEFAULT_SEGMENT_ID).to_string();

        let event = match kind {
            "reasoning-start" => StreamEvent::ReasoningStart {
                message_id,
                segment_id,
            },
            "reasoning-end" => StreamEvent::ReasoningEnd {
                message_id,
                segment_id,
            },
            _ => {
                let Some(delta) = str_field(obj, "delta").or_else(|| str_field(obj, "textDelta"))
                else {
                    return false;
                };
                StreamEvent::ReasoningDelta {
                    message_id,
                    segment_id,
                    delta: delta.to_string(),
                }
            }
        };
        events.push(event);
        true
    }

    /// Build a `DataPart` event from a `data-*` object
    pub(super) fn data_part(&mut self, kind: &str, obj: &Map<String, Value>) -> StreamEvent {
        StreamEvent::DataPart {
            message_id: self.ids.resolve(str_field(obj, "messageId")),
            kind: kind.to_string(),
            part_id: str_field(obj, "id").map(String::from),
            data: obj.get("data").cloned().unwrap_or(Value::Null),
            transient: obj.get("transient").and_then(Value::as_bool).unwrap_or(false),
        }
    }
}

fn call_id_field(obj: &Map<String, Value>) -> Option<&str> {
    str_field(obj, "toolCallId").filter(|id| !id.is_empty())
}

fn tool_name_field(obj: &Map<String, Value>) -> &str {
    str_field(obj, "toolName").unwrap_or_default()
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}
