//! Push reconnection delay policies.

use rand::Rng;
use std::time::Duration;

use crate::config::DEFAULT_RECONNECT_DELAY_MS;

/// Decides how long to wait before the next connection attempt.
///
/// `attempt` is 1 for the first retry after a close and resets once a
/// connection opens.
pub trait ReconnectPolicy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Waits the same amount every time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay(pub Duration);

impl Default for FixedDelay {
    fn default() -> Self {
        Self(Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS))
    }
}

impl ReconnectPolicy for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// Doubles the delay per attempt up to `max`, with optional jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the computed delay to randomize, in `[0, 1]`.
    pub jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    fn ceiling(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        if self.jitter <= 0.0 {
            return ceiling;
        }
        let spread = ceiling.mul_f64(self.jitter);
        let low = ceiling.saturating_sub(spread);
        let offset = rand::thread_rng().gen_range(0.0..=1.0);
        low + spread.mul_f64(offset)
    }
}
