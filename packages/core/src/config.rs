//! Retry and polling policy shared by the queue and its workers.

use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// Immutable policy values handed to `JobQueue` and `Worker` at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Retry ceiling applied to jobs enqueued without their own.
    pub max_retries: u32,
    /// Base of the exponential backoff, in seconds.
    pub backoff_base: f64,
    /// Seconds a worker sleeps when the queue is empty.
    pub worker_poll_interval: f64,
    /// Seconds after which a held lock is considered abandoned.
    pub lock_timeout: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2.0,
            worker_poll_interval: 1.0,
            lock_timeout: 300,
        }
    }
}

impl QueueConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_base(mut self, backoff_base: f64) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.worker_poll_interval = interval.as_secs_f64();
        self
    }

    /// Delay before a job that has failed `attempts` times becomes eligible again.
    ///
    /// `backoff_base ^ attempts` seconds, saturating at `TimeDelta::MAX`.
    pub fn backoff_delay(&self, attempts: u32) -> TimeDelta {
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let secs = self.backoff_base.max(0.0).powi(exponent);
        // float-to-int casts saturate; NaN becomes 0
        let millis = (secs * 1000.0) as i64;
        TimeDelta::try_milliseconds(millis).unwrap_or(TimeDelta::MAX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.worker_poll_interval).unwrap_or(Duration::from_secs(1))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_with_attempts() {
        let config = QueueConfig::default();
        assert_eq!(config.backoff_delay(1), TimeDelta::seconds(2));
        assert_eq!(config.backoff_delay(2), TimeDelta::seconds(4));
        assert_eq!(config.backoff_delay(3), TimeDelta::seconds(8));

        let config = config.with_backoff_base(3.0);
        assert_eq!(config.backoff_delay(2), TimeDelta::seconds(9));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let config = QueueConfig::default().with_backoff_base(10.0);
        assert_eq!(config.backoff_delay(u32::MAX), TimeDelta::MAX);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config: QueueConfig = serde_json::from_str(r#"{"max_retries": 5}"#).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff_base, 2.0);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn invalid_poll_interval_uses_one_second() {
        let config = QueueConfig {
            worker_poll_interval: -1.0,
            ..Default::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }
}
