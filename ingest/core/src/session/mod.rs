//! Stream Session
//!
//! Drives one request/response exchange: reads the response body chunk by
//! chunk, decodes complete lines and forwards events to a sink, while racing
//! the read against a deadline and a cancellation token.
//!
//! # Design Philosophy
//!
//! Completion is the one thing a caller must be able to rely on. Whatever
//! the exit path (end of stream, read error, deadline, cancellation) the
//! response body is released exactly once, and at most one terminal event
//! (`Finish` or `Error`) reaches the sink. Cancellation is silent: the caller
//! cancelled, so the caller already knows.
//!
//! ```text
//!   ┌──────────────┐   bytes   ┌─────────────┐  events  ┌──────────┐
//!   │ ResponseBody │ ────────► │ line buffer │ ───────► │   Sink   │
//!   └──────────────┘           │  + decoder  │          └──────────┘
//!          ▲                   └─────────────┘
//!          │ select! { cancel, deadline, next_chunk }
//! ```

mod body;
mod registry;
mod sink;

pub use body::{HttpResponseBody, ReaderBody, ResponseBody, DEFAULT_READ_SIZE};
pub use registry::{SessionRegistry, SessionTicket};
pub use sink::{StoreSink, StreamSink};

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::decoder::StreamDecoder;
use crate::error::Result;
use crate::events::{StreamEvent, TIMEOUT_FINISH_REASON};
use crate::store::MessageId;

/// Per-run options
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    /// Cancels the run without a terminal event
    pub cancel: CancellationToken,
    /// Deadline measured from the start of the run
    pub timeout: Option<Duration>,
}

impl SessionOptions {
    /// Options with the given cancellation token and no deadline
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            timeout: None,
        }
    }

    /// Set the deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How a run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Body reached end of stream
    Completed,
    /// Deadline elapsed; `Finish("timeout")` was emitted unless a terminal
    /// event had already been delivered
    TimedOut,
    /// Cancelled; no terminal event was emitted
    Cancelled,
}

/// Counters for one run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Chunks read from the body
    pub chunks: u64,
    /// Bytes read from the body
    pub bytes: u64,
    /// Events delivered to the sink
    pub events: u64,
}

/// One streamed exchange
#[derive(Debug)]
pub struct StreamSession {
    decoder: StreamDecoder,
    /// Bytes after the last newline, held until the line completes
    pending: Vec<u8>,
    completed: bool,
    stats: SessionStats,
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

enum Step {
    Cancelled,
    TimedOut,
    Chunk(Result<Option<Vec<u8>>>),
}

/// Guard releasing the body exactly once, including on early return
struct BodyGuard<'a, B: ResponseBody + ?Sized> {
    body: &'a mut B,
    released: bool,
}

impl<B: ResponseBody + ?Sized> BodyGuard<'_, B> {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.body.release();
        }
    }
}

impl<B: ResponseBody + ?Sized> Drop for BodyGuard<'_, B> {
    fn drop(&mut self) {
        self.release();
    }
}

impl StreamSession {
    /// Session with a fresh decoder
    #[must_use]
    pub fn new() -> Self {
        Self::with_decoder(StreamDecoder::new())
    }

    /// Session whose id-less events are attributed to `placeholder`
    #[must_use]
    pub fn for_message(placeholder: MessageId) -> Self {
        Self::with_decoder(StreamDecoder::with_sentinel(placeholder))
    }

    /// Session with a caller-built decoder
    #[must_use]
    pub fn with_decoder(decoder: StreamDecoder) -> Self {
        Self {
            decoder,
            pending: Vec::new(),
            completed: false,
            stats: SessionStats::default(),
        }
    }

    /// Whether a terminal event has been delivered
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Run counters
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Read `body` to the end, forwarding events to `sink`
    ///
    /// Returns `Err` only for read failures, after an `Error` event has been
    /// delivered. The body is released on every path.
    pub async fn run<B, S>(
        &mut self,
        body: &mut B,
        sink: &mut S,
        options: SessionOptions,
    ) -> Result<SessionOutcome>
    where
        B: ResponseBody + ?Sized,
        S: StreamSink + ?Sized,
    {
        let deadline = options.timeout.map(|timeout| Instant::now() + timeout);
        let mut guard = BodyGuard {
            body,
            released: false,
        };

        loop {
            let step = tokio::select! {
                biased;
                () = options.cancel.cancelled() => Step::Cancelled,
                () = sleep_until(deadline) => Step::TimedOut,
                chunk = guard.body.next_chunk() => Step::Chunk(chunk),
            };

            match step {
                Step::Cancelled => {
                    guard.release();
                    tracing::debug!(events = self.stats.events, "Stream session cancelled");
                    return Ok(SessionOutcome::Cancelled);
                }
                Step::TimedOut => {
                    guard.release();
                    tracing::debug!(events = self.stats.events, "Stream session timed out");
                    self.deliver(StreamEvent::finish(TIMEOUT_FINISH_REASON), sink);
                    return Ok(SessionOutcome::TimedOut);
                }
                Step::Chunk(Ok(Some(chunk))) => {
                    self.stats.chunks += 1;
                    self.stats.bytes += chunk.len() as u64;
                    self.ingest(&chunk, sink);
                }
                Step::Chunk(Ok(None)) => {
                    guard.release();
                    self.finish_stream(sink);
                    return Ok(SessionOutcome::Completed);
                }
                Step::Chunk(Err(e)) => {
                    guard.release();
                    tracing::warn!(error = %e, "Stream read failed");
                    self.deliver(StreamEvent::error(e.to_string()), sink);
                    return Err(e);
                }
            }
        }
    }

    fn ingest<S: StreamSink + ?Sized>(&mut self, chunk: &[u8], sink: &mut S) {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|b| *b == b'\n') else {
            return;
        };
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        // Split on bytes first so multi-byte characters never straddle a decode
        let text = String::from_utf8_lossy(&complete);
        for event in self.decoder.feed(&text) {
            self.deliver(event, sink);
        }
    }

    fn finish_stream<S: StreamSink + ?Sized>(&mut self, sink: &mut S) {
        let mut events = Vec::new();
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            events.extend(self.decoder.feed(&String::from_utf8_lossy(&rest)));
        }
        events.extend(self.decoder.end());

        for event in events {
            self.deliver(event, sink);
        }
    }

    fn deliver<S: StreamSink + ?Sized>(&mut self, event: StreamEvent, sink: &mut S) {
        if event.is_terminal() {
            if self.completed {
                return;
            }
            self.completed = true;
        }
        self.stats.events += 1;
        sink.on_event(event);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
