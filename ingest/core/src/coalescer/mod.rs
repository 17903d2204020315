//! Event Coalescer
//!
//! Buffers push events for a short window and collapses events that describe
//! the same entity, so a burst of status or part updates reaches the store as
//! one batch holding only the latest value per entity.
//!
//! # Design Philosophy
//!
//! - **Replace in place**: a superseding event takes the slot of the one it
//!   replaces, so batch order is first-seen order per key.
//! - **Keyless events are never merged**: only event types with a coalesce
//!   key are collapsed; everything else passes through in order.
//! - **One deadline per window**: the first buffered event arms the flush
//!   deadline at `max(0, window - elapsed_since_last_flush)`. Later events
//!   never push it back, so latency is bounded by one window.
//! - **Bounded**: reaching `max_buffered` forces a flush before the next
//!   event is accepted.
//!
//! The type is synchronous; [`run_coalescer`] drives it from a channel with a
//! tokio timer.

mod pump;

pub use pump::run_coalescer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::push::PushEvent;

/// Default flush window
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(50);

/// Default buffer cap
pub const DEFAULT_MAX_BUFFERED: usize = 500;

/// Computes the coalesce key of an event; None means never merge
pub type KeyFn = Arc<dyn Fn(&PushEvent) -> Option<String> + Send + Sync>;

/// Coalesce key for the built-in event types
///
/// | type | key |
/// |---|---|
/// | `session.status` | `status:<sessionId>` |
/// | `message.part.updated` | `part:<messageId>:<partId>` |
/// | `message.updated` | `message:<id>` |
/// | `session.updated` | `session:<id>` |
#[must_use]
pub fn default_coalesce_key(event: &PushEvent) -> Option<String> {
    match event.event_type.as_str() {
        "session.status" => {
            let session = event
                .property_str(&["sessionId"])
                .or(event.session_id.as_deref())?;
            Some(format!("status:{session}"))
        }
        "message.part.updated" => {
            let message = event
                .property_str(&["part", "messageId"])
                .or_else(|| event.property_str(&["messageId"]))?;
            let part = event
                .property_str(&["part", "id"])
                .or_else(|| event.property_str(&["partId"]))?;
            Some(format!("part:{message}:{part}"))
        }
        "message.updated" => {
            let id = info_id(event)?;
            Some(format!("message:{id}"))
        }
        "session.updated" => {
            let id = info_id(event)?;
            Some(format!("session:{id}"))
        }
        _ => None,
    }
}

fn info_id(event: &PushEvent) -> Option<&str> {
    event
        .property_str(&["info", "id"])
        .or_else(|| event.property_str(&["id"]))
}

/// Coalescer counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Events accepted by `add`
    pub received: u64,
    /// Events replaced by a later event with the same key
    pub superseded: u64,
    /// Non-empty batches handed out
    pub flushed_batches: u64,
    /// Events handed out
    pub flushed_events: u64,
    /// Flushes triggered by the buffer cap
    pub forced_flushes: u64,
}

/// Windowed, key-deduplicating event buffer
pub struct EventCoalescer {
    window: Duration,
    max_buffered: usize,
    key_fn: KeyFn,
    buffer: Vec<PushEvent>,
    /// `(channel, key)` → index in `buffer`
    slots: HashMap<(String, String), usize>,
    deadline: Option<Instant>,
    last_flush: Option<Instant>,
    stats: CoalescerStats,
}

impl std::fmt::Debug for EventCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCoalescer")
            .field("window", &self.window)
            .field("max_buffered", &self.max_buffered)
            .field("buffered", &self.buffer.len())
            .field("deadline", &self.deadline)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Default for EventCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_MAX_BUFFERED)
    }
}

impl EventCoalescer {
    /// Coalescer with the default key function
    #[must_use]
    pub fn new(window: Duration, max_buffered: usize) -> Self {
        Self {
            window,
            max_buffered: max_buffered.max(1),
            key_fn: Arc::new(default_coalesce_key),
            buffer: Vec::new(),
            slots: HashMap::new(),
            deadline: None,
            last_flush: None,
            stats: CoalescerStats::default(),
        }
    }

    /// Replace the key function
    #[must_use]
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&PushEvent) -> Option<String> + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    /// Buffer an event
    ///
    /// Returns a batch when the buffer was full and had to be flushed first.
    pub fn add(&mut self, event: PushEvent) -> Option<Vec<PushEvent>> {
        self.add_at(event, Instant::now())
    }

    /// [`Self::add`] with an explicit clock reading
    pub fn add_at(&mut self, event: PushEvent, now: Instant) -> Option<Vec<PushEvent>> {
        self.stats.received += 1;

        let slot_key = (self.key_fn)(&event).map(|key| (event.channel.clone(), key));
        if let Some(&index) = slot_key.as_ref().and_then(|key| self.slots.get(key)) {
            self.buffer[index] = event;
            self.stats.superseded += 1;
            return None;
        }

        let mut forced = None;
        if self.buffer.len() >= self.max_buffered {
            tracing::debug!(buffered = self.buffer.len(), "Coalescer full, forcing flush");
            self.stats.forced_flushes += 1;
            forced = Some(self.flush_at(now));
        }

        if let Some(key) = slot_key {
            self.slots.insert(key, self.buffer.len());
        }
        self.buffer.push(event);

        if self.deadline.is_none() {
            let elapsed = self
                .last_flush
                .map_or(self.window, |last| now.saturating_duration_since(last));
            self.deadline = Some(now + self.window.saturating_sub(elapsed));
        }

        forced
    }

    /// When the buffered events are due, if any are buffered
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Flush if the deadline has passed
    pub fn poll_due(&mut self, now: Instant) -> Option<Vec<PushEvent>> {
        match self.deadline {
            Some(deadline) if deadline <= now => Some(self.flush_at(now)),
            _ => None,
        }
    }

    /// Hand out everything buffered and start a new window
    pub fn flush(&mut self) -> Vec<PushEvent> {
        self.flush_at(Instant::now())
    }

    /// Hand out everything buffered without starting a new window (shutdown)
    pub fn drain(&mut self) -> Vec<PushEvent> {
        let batch = self.flush_at(Instant::now());
        self.last_flush = None;
        batch
    }

    /// Events currently buffered
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Counters
    #[must_use]
    pub fn stats(&self) -> CoalescerStats {
        self.stats
    }

    fn flush_at(&mut self, now: Instant) -> Vec<PushEvent> {
        self.slots.clear();
        self.deadline = None;
        self.last_flush = Some(now);

        let batch = std::mem::take(&mut self.buffer);
        if !batch.is_empty() {
            self.stats.flushed_batches += 1;
            self.stats.flushed_events += batch.len() as u64;
            tracing::trace!(events = batch.len(), "Coalescer flushed batch");
        }
        batch
    }
}
