//! Reconnect backoff

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff with additive jitter
///
/// `delay(attempt) = min(base * 2^attempt, max) + uniform[0, jitter)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Cap on the exponential term
    pub max: Duration,
    /// Upper bound (exclusive) of the random term
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max: Duration::from_millis(30_000),
            jitter: Duration::from_millis(500),
        }
    }
}

impl BackoffPolicy {
    /// Exponential term for `attempt` (0-indexed), without jitter
    #[must_use]
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// Delay before retry number `attempt` (0-indexed)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as f64;
        let jitter = (rand::random::<f64>() * jitter_ms) as u64;
        self.capped_delay(attempt) + Duration::from_millis(jitter)
    }
}
