//! Stream Decoder
//!
//! Incremental line decoder that turns streamed response text into
//! [`StreamEvent`]s. Two wire dialects coexist on the same stream and decode
//! into the same union.
//!
//! # Framed dialect
//!
//! ```text
//! data: {"type":"text-delta","messageId":"m1","delta":"Hel"}
//! data: {"type":"finish","finishReason":"stop"}
//! data: [DONE]
//! ```
//!
//! The JSON payload is dispatched on its `type` field. A payload that is not
//! JSON is retried as a raw-dialect line.
//!
//! # Raw dialect
//!
//! ```text
//! 0:"Hel"                       text delta (JSON-quoted or bare)
//! b:{"type":"tool-input-start"} typed object, dispatched like the framed dialect
//! d:{"finishReason":"stop"}     finish
//! e:{"message":"overloaded"}    error
//! 8:[{"type":"data-status"}]    data parts
//! f:{"messageId":"m1"}          step start, establishes the message id
//! ```
//!
//! # Guarantees
//!
//! - **Chunk-boundary invariance**: a partial trailing line is held across
//!   [`StreamDecoder::feed`] calls, so splitting the input anywhere yields the
//!   same event sequence as feeding it whole.
//! - **Malformed lines never abort**: unrecognized or unparsable lines are
//!   dropped and counted in [`DecoderStats::dropped`].
//! - **One terminal event**: after the first `Finish`/`Error` no further
//!   terminal event is emitted; [`StreamDecoder::end`] synthesizes
//!   `Finish("stop")` only if none was seen.

mod message_id;
mod tool_input;
mod typed;

pub use message_id::{MessageIdResolver, SENTINEL_PREFIX};
pub use tool_input::{ClosedInput, ToolInputAccumulator};

use serde_json::{Map, Value};

use crate::events::{StreamEvent, DEFAULT_ERROR_MESSAGE, DEFAULT_FINISH_REASON};
use crate::store::MessageId;

/// Sentinel payload that terminates a framed stream
const DONE_SENTINEL: &str = "[DONE]";

/// Prefix of framed-dialect lines
const FRAMED_PREFIX: &str = "data:";

/// Line counters for one decoder
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Non-blank lines seen
    pub lines: u64,
    /// Lines dropped as unrecognized or malformed
    pub dropped: u64,
    /// Events emitted
    pub events: u64,
}

/// Incremental decoder for one streamed exchange
#[derive(Debug)]
pub struct StreamDecoder {
    /// Trailing partial line carried between `feed` calls
    buffer: String,
    /// Current message id attribution
    ids: MessageIdResolver,
    /// Open tool-input streams
    tool_inputs: ToolInputAccumulator,
    /// Whether a Finish/Error has been emitted
    terminated: bool,
    stats: DecoderStats,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    /// Create a decoder with a random sentinel message id
    #[must_use]
    pub fn new() -> Self {
        Self::with_resolver(MessageIdResolver::new())
    }

    /// Create a decoder whose id-less events fall back to `sentinel`
    #[must_use]
    pub fn with_sentinel(sentinel: MessageId) -> Self {
        Self::with_resolver(MessageIdResolver::with_sentinel(sentinel))
    }

    fn with_resolver(ids: MessageIdResolver) -> Self {
        Self {
            buffer: String::new(),
            ids,
            tool_inputs: ToolInputAccumulator::new(),
            terminated: false,
            stats: DecoderStats::default(),
        }
    }

    /// Feed a chunk of text; returns events for every line it completes
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        let mut events = Vec::new();
        for line in complete.lines() {
            self.decode_line(line, &mut events);
        }
        events
    }

    /// Flush the buffered partial line and close the stream
    ///
    /// Synthesizes `Finish("stop")` when no terminal event was emitted.
    pub fn end(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        let rest = std::mem::take(&mut self.buffer);
        let line = rest.strip_suffix('\r').unwrap_or(&rest);
        self.decode_line(line, &mut events);

        if !self.terminated {
            self.emit_terminal(StreamEvent::finish(DEFAULT_FINISH_REASON), &mut events);
        }

        if self.tool_inputs.open_count() > 0 {
            tracing::debug!(
                open = self.tool_inputs.open_count(),
                "Stream ended with unfinished tool input"
            );
        }

        events
    }

    /// Whether a terminal event has been emitted
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Message id an id-less event would be attributed to
    #[must_use]
    pub fn current_message_id(&self) -> MessageId {
        self.ids.current()
    }

    /// Line counters
    #[must_use]
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Bytes currently held as a partial line
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    // ------------------------------------------------------------------------
    // Line routing
    // ------------------------------------------------------------------------

    fn decode_line(&mut self, line: &str, events: &mut Vec<StreamEvent>) {
        if line.trim().is_empty() {
            return;
        }
        self.stats.lines += 1;
        let before = events.len();

        let handled = match line.strip_prefix(FRAMED_PREFIX) {
            Some(payload) => self.decode_framed(payload.strip_prefix(' ').unwrap_or(payload), events),
            None => self.decode_raw(line, events),
        };

        if !handled {
            self.stats.dropped += 1;
            tracing::trace!(line, "Dropped undecodable stream line");
        }
        self.stats.events += (events.len() - before) as u64;
    }

    fn decode_framed(&mut self, payload: &str, events: &mut Vec<StreamEvent>) -> bool {
        if payload.trim() == DONE_SENTINEL {
            self.emit_terminal(StreamEvent::finish(DEFAULT_FINISH_REASON), events);
            return true;
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(obj)) => self.decode_typed(&obj, events),
            Ok(_) => false,
            Err(_) => self.decode_raw(payload, events),
        }
    }

    fn decode_raw(&mut self, line: &str, events: &mut Vec<StreamEvent>) -> bool {
        let Some((tag, payload)) = line.split_once(':') else {
            return false;
        };

        match tag {
            "0" => {
                self.decode_raw_text(payload, events);
                true
            }
            "b" => match parse_object(payload) {
                Some(obj) => self.decode_typed(&obj, events),
                None => false,
            },
            "d" => {
                let reason = parse_object(payload)
                    .as_ref()
                    .and_then(|obj| str_field(obj, "finishReason"))
                    .unwrap_or(DEFAULT_FINISH_REASON)
                    .to_string();
                self.emit_terminal(StreamEvent::finish(reason), events);
                true
            }
            "e" => {
                let message = serde_json::from_str::<Value>(payload)
                    .map(|value| error_message(&value))
                    .unwrap_or_else(|_| DEFAULT_ERROR_MESSAGE.to_string());
                self.emit_terminal(StreamEvent::error(message), events);
                true
            }
            "8" => self.decode_data_array(payload, events),
            "f" => match parse_object(payload) {
                Some(obj) => {
                    let message_id = self.ids.resolve(str_field(&obj, "messageId"));
                    events.push(StreamEvent::MessageStart { message_id });
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    fn decode_raw_text(&mut self, payload: &str, events: &mut Vec<StreamEvent>) {
        let delta = serde_json::from_str::<String>(payload).unwrap_or_else(|_| payload.to_string());
        if delta.is_empty() {
            return;
        }
        events.push(StreamEvent::TextDelta {
            message_id: self.ids.current(),
            delta,
        });
    }

    fn decode_data_array(&mut self, payload: &str, events: &mut Vec<StreamEvent>) -> bool {
        let Ok(Value::Array(items)) = serde_json::from_str::<Value>(payload) else {
            return false;
        };

        for item in &items {
            let Some(obj) = item.as_object() else {
                continue;
            };
            match str_field(obj, "type") {
                Some(kind) if kind.starts_with("data-") => {
                    let event = self.data_part(kind, obj);
                    events.push(event);
                }
                _ => {}
            }
        }
        true
    }

    fn emit_terminal(&mut self, event: StreamEvent, events: &mut Vec<StreamEvent>) {
        if self.terminated {
            tracing::debug!(event = event.name(), "Ignoring terminal event after completion");
            return;
        }
        self.terminated = true;
        events.push(event);
    }
}

// ----------------------------------------------------------------------------
// JSON helpers
// ----------------------------------------------------------------------------

fn parse_object(payload: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

/// Extract a readable message from an error payload
fn error_message(value: &Value) -> String {
    let found = match value {
        Value::String(text) => Some(text.as_str()),
        Value::Object(obj) => ["errorText", "message", "error"]
            .iter()
            .find_map(|key| match obj.get(*key) {
                Some(Value::String(text)) => Some(text.as_str()),
                Some(Value::Object(inner)) => str_field(inner, "message"),
                _ => None,
            }),
        _ => None,
    };

    match found {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => DEFAULT_ERROR_MESSAGE.to_string(),
    }
}
