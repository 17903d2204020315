//! Streaming Tool Input Accumulator
//!
//! Producers deliver tool calls in one of three shapes: an atomic `tool-call`,
//! the `tool-input-start` / `-delta` / `-end` triad, or the triad closed by
//! `tool-input-available`. The triad is normalized here: argument text is
//! accumulated per call id and parsed once when the call closes.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Argument text collected for one open call
#[derive(Clone, Debug, Default)]
struct PendingInput {
    name: String,
    text: String,
}

/// A tool call whose argument stream has closed
#[derive(Clone, Debug, PartialEq)]
pub struct ClosedInput {
    /// Tool name given at start
    pub name: String,
    /// Parsed arguments, or an empty object when the text is not valid JSON
    pub args: Value,
}

/// Per-call argument buffers for one decoding session
#[derive(Debug, Default)]
pub struct ToolInputAccumulator {
    pending: HashMap<String, PendingInput>,
}

impl ToolInputAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reopen) an accumulator for `call_id`
    pub fn open(&mut self, call_id: &str, name: &str) {
        self.pending.insert(
            call_id.to_string(),
            PendingInput {
                name: name.to_string(),
                text: String::new(),
            },
        );
    }

    /// Append argument text; returns false when the call was never opened
    pub fn append(&mut self, call_id: &str, delta: &str) -> bool {
        match self.pending.get_mut(call_id) {
            Some(input) => {
                input.text.push_str(delta);
                true
            }
            None => false,
        }
    }

    /// Close the call and parse its arguments. The entry is discarded.
    pub fn close(&mut self, call_id: &str) -> Option<ClosedInput> {
        let input = self.pending.remove(call_id)?;
        let args = parse_args(&input.text, call_id);
        Some(ClosedInput {
            name: input.name,
            args,
        })
    }

    /// Drop the call without parsing (used when the producer sends the final
    /// input itself)
    pub fn discard(&mut self, call_id: &str) -> bool {
        self.pending.remove(call_id).is_some()
    }

    /// Whether `call_id` is currently streaming
    #[must_use]
    pub fn is_open(&self, call_id: &str) -> bool {
        self.pending.contains_key(call_id)
    }

    /// Number of calls still streaming
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.pending.len()
    }
}

fn parse_args(text: &str, call_id: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Object(Map::new());
    }
    match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(call_id, error = %e, "Unparsable tool arguments, using empty object");
            Value::Object(Map::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accumulates_and_parses() {
        let mut acc = ToolInputAccumulator::new();
        acc.open("t1", "read");
        assert!(acc.append("t1", "{\"path\":"));
        assert!(acc.append("t1", "\"a.ts\"}"));

        let closed = acc.close("t1").unwrap();
        assert_eq!(closed.name, "read");
        assert_eq!(closed.args, json!({"path": "a.ts"}));
        assert!(!acc.is_open("t1"));
    }

    #[test]
    fn test_invalid_json_becomes_empty_object() {
        let mut acc = ToolInputAccumulator::new();
        acc.open("t1", "read");
        acc.append("t1", "{\"path\":");
        assert_eq!(acc.close("t1").unwrap().args, json!({}));
    }

    #[test]
    fn test_unknown_call() {
        let mut acc = ToolInputAccumulator::new();
        assert!(!acc.append("missing", "x"));
        assert!(acc.close("missing").is_none());
        assert!(!acc.discard("missing"));
    }

    #[test]
    fn test_interleaved_calls_stay_separate() {
        let mut acc = ToolInputAccumulator::new();
        acc.open("a", "read");
        acc.open("b", "write");
        acc.append("a", "{\"x\":1}");
        acc.append("b", "{\"y\":2}");
        assert_eq!(acc.open_count(), 2);
        assert_eq!(acc.close("b").unwrap().args, json!({"y": 2}));
        assert_eq!(acc.close("a").unwrap().args, json!({"x": 1}));
    }
}
