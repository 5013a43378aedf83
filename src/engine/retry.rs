// src/engine/retry.rs

use std::time::Duration;

/// How failed routine invocations are retried.
///
/// The delay before retry number `attempt` (starting at 1) is
/// `min(attempt * factor * min_delay, max_delay)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure. Ignored by persistent
    /// triggers, which retry until cancelled.
    pub max_retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);
pub const DEFAULT_FACTOR: f64 = 2.0;

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            factor: DEFAULT_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Policy that retries `max_retries` times with the default backoff.
    pub fn retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    /// Backoff to wait before the given attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let secs = self.min_delay.as_secs_f64() * f64::from(attempt) * self.factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}
