//! Exponential backoff shared by resubscription and watermark writes.

use std::time::Duration;

use crate::config::RetryPolicy;

/// Tracks consecutive failures of one operation and hands out delays.
///
/// Delays double from `initial_delay` on every failure and are capped at
/// `max_delay`. A success resets the sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
        }
    }

    /// Record a failed attempt.
    ///
    /// Returns the delay before the next attempt, or `None` once the
    /// policy's attempt budget is spent.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if let Some(max) = self.policy.max_attempts
            && self.consecutive_failures >= max
        {
            return None;
        }
        Some(self.current_delay())
    }

    /// Reset after a successful attempt
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Failed attempts since the last success
    pub fn failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn current_delay(&self) -> Duration {
        // 2^31 overflows any sane initial delay well before the cap matters
        let exponent = self.consecutive_failures.saturating_sub(1).min(31);
        self.policy
            .initial_delay()
            .saturating_mul(1u32 << exponent)
            .min(self.policy.max_delay())
    }
}
