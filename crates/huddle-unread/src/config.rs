//! Configuration for the unread engine.
//!
//! Durations are stored as milliseconds so a config can be written by hand
//! in TOML or JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UnreadError};

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
    /// Total attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry forever with delays between `initial` and `max`.
    pub fn unbounded(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay_ms: initial.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            max_attempts: None,
        }
    }

    /// Give up after `attempts` total attempts.
    pub fn bounded(initial: Duration, max: Duration, attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts),
            ..Self::unbounded(initial, max)
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.initial_delay_ms == 0 {
            return Err(UnreadError::Config(format!(
                "{}: initial_delay_ms must be positive",
                name
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(UnreadError::Config(format!(
                "{}: max_delay_ms ({}) is below initial_delay_ms ({})",
                name, self.max_delay_ms, self.initial_delay_ms
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(UnreadError::Config(format!(
                "{}: max_attempts must be at least 1",
                name
            )));
        }
        Ok(())
    }
}

/// Configuration for [`UnreadTracker`](crate::UnreadTracker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnreadConfig {
    /// Suppress repeated identical counts from a tracker.
    pub dedupe_counts: bool,
    /// Backoff for re-establishing a failed watermark or feed subscription.
    pub resubscribe: RetryPolicy,
    /// Backoff for baseline and mark-as-read watermark writes.
    pub write: RetryPolicy,
}

impl Default for UnreadConfig {
    fn default() -> Self {
        Self {
            // 1s doubling up to 64s, like peer delivery retries
            resubscribe: RetryPolicy::unbounded(Duration::from_secs(1), Duration::from_secs(64)),
            write: RetryPolicy::bounded(
                Duration::from_millis(500),
                Duration::from_secs(8),
                5,
            ),
            dedupe_counts: true,
        }
    }
}

impl UnreadConfig {
    /// Millisecond-scale delays for tests and simulations.
    pub fn testing() -> Self {
        Self {
            resubscribe: RetryPolicy::unbounded(
                Duration::from_millis(5),
                Duration::from_millis(40),
            ),
            write: RetryPolicy::bounded(Duration::from_millis(2), Duration::from_millis(20), 5),
            dedupe_counts: true,
        }
    }

    /// Set the resubscription backoff
    pub fn with_resubscribe(mut self, policy: RetryPolicy) -> Self {
        self.resubscribe = policy;
        self
    }

    /// Set the write backoff
    pub fn with_write(mut self, policy: RetryPolicy) -> Self {
        self.write = policy;
        self
    }

    /// Enable or disable count de-duplication
    pub fn with_dedupe_counts(mut self, enabled: bool) -> Self {
        self.dedupe_counts = enabled;
        self
    }

    /// Check that every policy is usable.
    pub fn validate(&self) -> Result<()> {
        self.resubscribe.validate("resubscribe")?;
        self.write.validate("write")
    }
}
