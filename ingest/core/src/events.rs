//! Stream Events
//!
//! The typed output of [`crate::decoder::StreamDecoder`]. Both wire dialects
//! decode into this one union, and sessions dispatch it through a single
//! [`crate::session::StreamSink`] instead of a bag of optional callbacks.
//!
//! Every non-terminal event carries the message id it was attributed to (see
//! [`crate::decoder::MessageIdResolver`]). `Finish` and `Error` are terminal;
//! exactly one of them reaches a sink per session.

use serde::Serialize;
use serde_json::Value;

use crate::store::MessageId;

/// Finish reason synthesized when a stream ends without an explicit one
pub const DEFAULT_FINISH_REASON: &str = "stop";

/// Finish reason emitted when the session deadline elapses
pub const TIMEOUT_FINISH_REASON: &str = "timeout";

/// Error text used when an error event carries no readable message
pub const DEFAULT_ERROR_MESSAGE: &str = "Unknown stream error";

/// One decoded unit of the streaming protocol
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    /// A new assistant message begins
    MessageStart {
        /// Id of the message that subsequent id-less events attach to
        message_id: MessageId,
    },

    /// Incremental text for a message
    TextDelta {
        /// Target message
        message_id: MessageId,
        /// Text to append
        delta: String,
    },

    /// A reasoning segment opens
    ReasoningStart {
        /// Message the reasoning belongs to
        message_id: MessageId,
        /// Segment identifier
        segment_id: String,
    },

    /// Incremental reasoning text
    ReasoningDelta {
        /// Message the reasoning belongs to
        message_id: MessageId,
        /// Segment identifier
        segment_id: String,
        /// Text to append
        delta: String,
    },

    /// A reasoning segment closes
    ReasoningEnd {
        /// Message the reasoning belongs to
        message_id: MessageId,
        /// Segment identifier
        segment_id: String,
    },

    /// A tool call was announced (arguments may still be streaming)
    ToolCallStart {
        /// Message that owns the call
        message_id: MessageId,
        /// Tool call identifier
        call_id: String,
        /// Tool name
        name: String,
    },

    /// A fragment of the tool call's JSON argument text
    ToolCallDelta {
        /// Message that owns the call
        message_id: MessageId,
        /// Tool call identifier
        call_id: String,
        /// Raw argument text fragment
        arg_text_delta: String,
    },

    /// Tool call arguments are complete
    ToolCallEnd {
        /// Message that owns the call
        message_id: MessageId,
        /// Tool call identifier
        call_id: String,
        /// Parsed arguments (empty object when unparsable)
        args: Value,
    },

    /// Result of a tool call
    ToolResult {
        /// Message that owns the call
        message_id: MessageId,
        /// Tool call identifier
        call_id: String,
        /// Tool output
        result: Value,
    },

    /// Custom `data-*` part
    DataPart {
        /// Message the part belongs to
        message_id: MessageId,
        /// Full part type, e.g. `data-status`
        kind: String,
        /// Part id used for upserts (absent parts are always appended)
        part_id: Option<String>,
        /// Payload
        data: Value,
        /// Transient parts are rendered but not kept in history
        transient: bool,
    },

    /// Stream completed
    Finish {
        /// Finish reason (`stop`, `length`, `tool-calls`, `timeout`, ...)
        reason: String,
    },

    /// Stream failed
    Error {
        /// Human-readable error
        message: String,
    },
}

impl StreamEvent {
    /// Build a finish event
    pub fn finish(reason: impl Into<String>) -> Self {
        Self::Finish {
            reason: reason.into(),
        }
    }

    /// Build an error event
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this event ends the session
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }

    /// Message this event is attributed to, if any
    #[must_use]
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::MessageStart { message_id }
            | Self::TextDelta { message_id, .. }
            | Self::ReasoningStart { message_id, .. }
            | Self::ReasoningDelta { message_id, .. }
            | Self::ReasoningEnd { message_id, .. }
            | Self::ToolCallStart { message_id, .. }
            | Self::ToolCallDelta { message_id, .. }
            | Self::ToolCallEnd { message_id, .. }
            | Self::ToolResult { message_id, .. }
            | Self::DataPart { message_id, .. } => Some(message_id),
            Self::Finish { .. } | Self::Error { .. } => None,
        }
    }

    /// Short name, matching the serialized `type` tag
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message-start",
            Self::TextDelta { .. } => "text-delta",
            Self::ReasoningStart { .. } => "reasoning-start",
            Self::ReasoningDelta { .. } => "reasoning-delta",
            Self::ReasoningEnd { .. } => "reasoning-end",
            Self::ToolCallStart { .. } => "tool-call-start",
            Self::ToolCallDelta { .. } => "tool-call-delta",
            Self::ToolCallEnd { .. } => "tool-call-end",
            Self::ToolResult { .. } => "tool-result",
            Self::DataPart { .. } => "data-part",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
        }
    }
}
