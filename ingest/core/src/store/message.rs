//! Conversation Messages
//!
//! Identifier newtypes and the message/part model held by
//! [`super::ConversationStore`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message identifier as it appears on the wire
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Borrow the raw id
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Conversation identifier (one in-flight session per conversation)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Who authored a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The human
    User,
    /// The remote agent
    Assistant,
    /// System / instructions
    System,
}

/// One ordered piece of a message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Part {
    /// Plain text
    Text {
        /// Accumulated text
        text: String,
    },
    /// A tool invocation
    ToolCall {
        /// Tool call identifier
        call_id: String,
        /// Tool name
        name: String,
        /// Arguments (empty object until complete)
        args: Value,
    },
    /// Output of a tool invocation
    ToolResult {
        /// Tool call identifier
        call_id: String,
        /// Tool output
        result: Value,
    },
    /// Custom data part, upserted by `(kind, part_id)`
    DataPart {
        /// Part type, e.g. `data-status`
        kind: String,
        /// Part id
        part_id: Option<String>,
        /// Payload
        data: Value,
        /// Whether the part is transient
        transient: bool,
    },
}

impl Part {
    /// Build a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// A message in the conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: MessageRole,
    /// Ordered parts
    pub parts: Vec<Part>,
}

impl ConversationMessage {
    /// Create an empty message
    pub fn new(id: impl Into<MessageId>, role: MessageRole) -> Self {
        Self {
            id: id.into(),
            role,
            parts: Vec::new(),
        }
    }

    /// Create a message holding a single text part
    pub fn with_text(id: impl Into<MessageId>, role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            parts: vec![Part::text(text)],
        }
    }

    /// Text of the first text part
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        })
    }

    /// Find a tool call part by call id
    #[must_use]
    pub fn tool_call(&self, call_id: &str) -> Option<&Part> {
        self.parts
            .iter()
            .find(|part| matches!(part, Part::ToolCall { call_id: id, .. } if id == call_id))
    }
}
