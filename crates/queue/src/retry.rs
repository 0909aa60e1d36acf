//! Retry backoff and dead letter entries.

#![allow(missing_docs)]

use std::time::Duration;

use fanout_common::config::QueueConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff between retries.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Random spread applied to each delay, as a fraction of it (0.0 disables).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(15),
            max_delay: Duration::from_secs(3600 * 6), // 6 hours
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl From<&QueueConfig> for RetryConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.retry_initial_delay_secs),
            max_delay: Duration::from_secs(config.retry_max_delay_secs),
            ..Self::default()
        }
    }
}

impl RetryConfig {
    /// Backoff without jitter, for deterministic schedules.
    #[must_use]
    pub fn fixed(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            jitter: 0.0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1 for the first retry).
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let mut delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if self.jitter > 0.0 {
            let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            delay_secs *= 1.0 + spread;
        }

        let max_secs = self.max_delay.as_secs_f64();
        if !delay_secs.is_finite() || delay_secs > max_secs {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay_secs.max(0.0))
        }
    }
}

/// Dead letter entry for a job that ran out of retries or failed for good.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry<T> {
    /// Job ID.
    pub id: String,
    /// The failed job.
    pub job: T,
    /// Number of failed executions.
    pub attempts: u32,
    /// Last error message.
    pub last_error: String,
    /// Timestamp of last failure.
    pub failed_at: chrono::DateTime<chrono::Utc>,
}

impl<T> DeadLetterEntry<T> {
    /// Create a new dead letter entry.
    pub fn new(id: String, job: T, attempts: u32, error: String) -> Self {
        Self {
            id,
            job,
            attempts,
            last_error: error,
            failed_at: chrono::Utc::now(),
        }
    }
}
