//! # Redelivery Backoff
//!
//! Exponential backoff for work-queue redelivery.
//!
//! A failed message is hidden for longer on every attempt so that a
//! struggling downstream dependency is not hammered by immediate retries.
//! Jitter spreads redeliveries of messages that failed together.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serializable backoff settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub multiplier: f64,
    pub use_jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 30,
            max_delay_secs: 12 * 60 * 60,
            multiplier: 2.0,
            use_jitter: true,
        }
    }
}

/// Backoff policy applied to visibility timeouts of failed messages
///
/// # Examples
///
/// ```rust
/// use replay_transport::retry::RedeliveryBackoff;
/// use std::time::Duration;
///
/// let backoff = RedeliveryBackoff::default().without_jitter();
///
/// // First failure: 30s, second: 60s
/// assert_eq!(backoff.calculate_delay(1), Duration::from_secs(30));
/// assert_eq!(backoff.calculate_delay(2), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct RedeliveryBackoff {
    /// Delay after the first failed delivery
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    pub max_delay: Duration,

    /// Exponential growth factor
    pub backoff_multiplier: f64,

    pub use_jitter: bool,

    /// Jitter range as a fraction of the delay (0.25 = ±25%)
    pub jitter_percent: f64,
}

impl Default for RedeliveryBackoff {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl From<&BackoffConfig> for RedeliveryBackoff {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
            backoff_multiplier: config.multiplier,
            use_jitter: config.use_jitter,
            jitter_percent: 0.25,
        }
    }
}

impl RedeliveryBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier,
            use_jitter: true,
            jitter_percent: 0.25,
        }
    }

    /// Disable jitter (deterministic delays for tests)
    pub fn without_jitter(mut self) -> Self {
        self.use_jitter = false;
        self
    }

    /// Set custom jitter percentage (0.0 to 1.0)
    pub fn with_jitter_percent(mut self, percent: f64) -> Self {
        self.jitter_percent = percent.clamp(0.0, 1.0);
        self
    }

    /// Delay before redelivering a message that has failed
    /// `delivery_count` times: `initial * multiplier^(delivery_count - 1)`,
    /// capped at `max_delay`.
    pub fn calculate_delay(&self, delivery_count: u32) -> Duration {
        let exponent = delivery_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        let capped_delay_secs = base_delay_secs.min(self.max_delay.as_secs_f64());

        let final_delay_secs = if self.use_jitter {
            Self::add_jitter(capped_delay_secs, self.jitter_percent)
        } else {
            capped_delay_secs
        };

        Duration::from_secs_f64(final_delay_secs)
    }

    /// Visibility timeout to apply after a failure: the backoff delay, but
    /// never shorter than the queue's regular visibility timeout.
    pub fn visibility_timeout(&self, delivery_count: u32, base: Duration) -> Duration {
        self.calculate_delay(delivery_count).max(base)
    }

    fn add_jitter(delay_secs: f64, jitter_percent: f64) -> f64 {
        let jitter_range = delay_secs * jitter_percent;
        if jitter_range <= 0.0 {
            return delay_secs;
        }

        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);

        (delay_secs + jitter).max(0.0)
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
