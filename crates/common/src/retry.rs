//! Reconnection backoff strategy.
//!
//! Tracks consecutive failures and derives the next delay with exponential
//! backoff and jitter. The counter is owned by whichever component drives the
//! retry loop: incremented on each failed attempt, reset the moment an
//! attempt succeeds, so the first failure after a healthy stretch backs off
//! from the base delay again.

use std::time::Duration;

use rand::Rng;

/// Default base delay for the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default delay cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(25);

/// Default jitter factor (0.0 = no jitter, 1.0 = full jitter).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.25;

/// Maximum exponent for backoff calculation to prevent overflow.
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Exponential backoff with jitter, keyed off a consecutive-failure counter.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    consecutive_failures: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_factor: f64,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base delay for exponential backoff.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter factor, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    /// Number of failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record a failed attempt.
    pub fn increment_consecutive_failures(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Record a successful attempt; the next delay starts from the base again.
    pub fn reset_consecutive_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Delay to wait before the next attempt, derived from the current
    /// failure count. Does not mutate the counter.
    #[must_use]
    pub fn next_retry_delay(&self) -> Duration {
        self.apply_jitter(self.exponential_delay())
    }

    fn exponential_delay(&self) -> Duration {
        let base_millis = self.base_delay.as_millis() as u64;
        let max_millis = self.max_delay.as_millis() as u64;

        let exponent = self.consecutive_failures.min(MAX_BACKOFF_EXPONENT);
        let multiplier = 2_u64.saturating_pow(exponent);
        let delay_millis = base_millis.saturating_mul(multiplier).min(max_millis);

        Duration::from_millis(delay_millis)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor == 0.0 {
            return delay;
        }

        let mut rng = rand::thread_rng();
        let delay_millis = delay.as_millis() as f64;
        let jitter_range = delay_millis * self.jitter_factor;

        let jitter = rng.gen_range(-jitter_range / 2.0..=jitter_range / 2.0);
        let final_millis = (delay_millis + jitter).max(0.0) as u64;

        Duration::from_millis(final_millis)
    }
}
