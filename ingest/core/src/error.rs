//! Error Types
//!
//! One taxonomy for the whole ingestion pipeline. Each variant maps to a
//! propagation rule:
//!
//! - `Parse`: malformed line or JSON. Swallowed at line granularity by the
//!   decoder, reported non-fatally by the push connection.
//! - `Network`: transport failure. The only retryable kind; drives push
//!   reconnection and ends a streaming session with one error callback.
//! - `Timeout`: no completion within the session deadline.
//! - `Cancelled`: user-initiated, never surfaced to callbacks.
//! - `Upstream`: explicit error event sent by the producer.
//! - `Config`: configuration could not be loaded or validated.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors produced by the ingestion pipeline
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed line, frame or JSON payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// Transport-level failure (connect, read, HTTP status)
    #[error("Network error: {0}")]
    Network(String),

    /// Deadline elapsed before the exchange completed
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Cancelled by the owner of the cancellation token
    #[error("Cancelled")]
    Cancelled,

    /// Error event emitted by the remote producer
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Invalid or unreadable configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl IngestError {
    /// Whether the failure should trigger a reconnect with backoff
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Short machine-readable name of the error kind
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_) => ErrorKind::Parse,
            Self::Network(_) => ErrorKind::Network,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Upstream(_) => ErrorKind::Upstream,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Error classification without payload, for notices and metrics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`IngestError::Parse`]
    Parse,
    /// See [`IngestError::Network`]
    Network,
    /// See [`IngestError::Timeout`]
    Timeout,
    /// See [`IngestError::Cancelled`]
    Cancelled,
    /// See [`IngestError::Upstream`]
    Upstream,
    /// See [`IngestError::Config`]
    Config,
}

impl ErrorKind {
    /// Whether errors of this kind are retried
    #[must_use]
    pub fn is_retryable(self) -> bool {
        self == Self::Network
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, IngestError>;
