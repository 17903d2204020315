//! Connection metrics

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Read-only snapshot of a connection's counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetrics {
    /// Connection attempts made
    pub attempts: u64,
    /// Attempts that opened a stream
    pub successes: u64,
    /// Well-formed events received
    pub events_received: u64,
    /// Transport failures plus malformed events
    pub errors: u64,
    /// Delay chosen for the pending (or last) reconnect
    pub current_backoff_ms: u64,
}

/// Live counters shared between a connection and its task
#[derive(Debug, Default)]
pub(crate) struct MetricsCounters {
    pub(crate) attempts: AtomicU64,
    pub(crate) successes: AtomicU64,
    pub(crate) events_received: AtomicU64,
    pub(crate) errors: AtomicU64,
    pub(crate) current_backoff_ms: AtomicU64,
}

impl MetricsCounters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> ConnectionMetrics {
        ConnectionMetrics {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            current_backoff_ms: self.current_backoff_ms.load(Ordering::Relaxed),
        }
    }
}
