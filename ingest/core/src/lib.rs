//! Ingest Core - Real-time Streaming Ingestion for Agent Conversations
//!
//! This crate turns a remote agent's streamed response into incremental,
//! render-ready conversation state. It knows nothing about how that state is
//! displayed; a TUI, a web view or a headless test harness can all sit on top.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────── per exchange ─────────────────────────┐
//! │                                                               │
//! │  HTTP body ──► StreamSession ──► StreamDecoder ──► StreamSink │
//! │   (bytes)      (read/timeout/     (framed + raw    (typed     │
//! │                 cancel race)       dialects)        events)   │
//! │                                                      │        │
//! └──────────────────────────────────────────────────────┼────────┘
//!                                                        ▼
//!                                            ┌────────────────────┐
//!                                            │ ConversationStore  │
//!                                            │  order + by_id     │
//!                                            │  activity, reasoning│
//!                                            └────────────────────┘
//!
//! ┌──────────────────────── long-lived ───────────────────────────┐
//! │                                                               │
//! │  GET /event ──► PushConnection ──► EventCoalescer ──► batches │
//! │               (resume, backoff)    (keyed supersede,          │
//! │                                     one flush per window)     │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StreamDecoder`]: incremental bytes-to-events decoder
//! - [`StreamSession`]: one request/response exchange
//! - [`SessionRegistry`]: at most one in-flight session per conversation
//! - [`PushConnection`]: resumable push channel with reconnection
//! - [`EventCoalescer`]: collapses bursts of push events
//! - [`ConversationStore`]: normalized message state with O(1) updates
//!
//! # Quick Start
//!
//! ```ignore
//! use ingest_core::{ConversationStore, SessionOptions, StoreSink, StreamSession};
//! use ingest_core::session::HttpResponseBody;
//!
//! let response = reqwest::get(url).await?;
//! let mut body = HttpResponseBody::from_response(response).await?;
//!
//! let mut store = ConversationStore::new();
//! let mut sink = StoreSink::new(&mut store);
//! let outcome = StreamSession::new()
//!     .run(&mut body, &mut sink, SessionOptions::default())
//!     .await?;
//! ```
//!
//! # Module Overview
//!
//! - [`decoder`]: line decoder for the framed and raw wire dialects
//! - [`session`]: exchange orchestration, sinks, body adapters, registry
//! - [`push`]: push channel transport, events, backoff and metrics
//! - [`coalescer`]: windowed event coalescing and its async pump
//! - [`store`]: normalized conversation state, activity log, reasoning
//! - [`events`]: the typed stream event union
//! - [`config`]: TOML, environment and CLI configuration
//! - [`error`]: crate error type

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod coalescer;
pub mod config;
pub mod decoder;
pub mod error;
pub mod events;
pub mod push;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use coalescer::{default_coalesce_key, run_coalescer, CoalescerStats, EventCoalescer};
pub use decoder::{DecoderStats, StreamDecoder};
pub use error::{ErrorKind, IngestError, Result};
pub use events::StreamEvent;
pub use push::{
    BackoffPolicy, ConnectionMetrics, ConnectionNotice, ConnectionStatus, HttpPushTransport,
    PushConfig, PushConnection, PushEvent, PushTransport,
};
pub use session::{
    SessionOptions, SessionOutcome, SessionRegistry, SessionStats, SessionTicket, StoreSink,
    StreamSession, StreamSink,
};
pub use store::{
    ConversationId, ConversationMessage, ConversationStore, MessageId, MessageRole, Part,
    StoreChange, StoreCommand,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, IngestConfig,
};
