//! Reconnection backoff policy.

use std::time::Duration;

/// Exponential backoff with an attempt ceiling.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)`. Once `max_attempts`
/// retries have been spent the policy gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    /// Delay before the given 1-based attempt. Saturates instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let factor = 2u32.checked_pow(exp).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Given how many retries have already been made since the last
    /// successful open, return the next attempt number and its delay, or
    /// `None` when the ceiling is reached.
    pub fn next_attempt(&self, attempts_made: u32) -> Option<(u32, Duration)> {
        if attempts_made >= self.max_attempts {
            return None;
        }
        let attempt = attempts_made + 1;
        Some((attempt, self.delay_for(attempt)))
    }
}
