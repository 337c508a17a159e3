//! Retry bookkeeping for failed sends.
//!
//! After a failed attempt the retry count is incremented. While it stays below
//! `max_retries` the row goes back to `queued` with an exponential delay of
//! `base * 2^(retry_count - 1)` capped at `max_delay`; once it reaches the
//! limit the row is `failed` with no further attempt scheduled.

use std::time::Duration;

use chrono::{DateTime, Utc};

use herald_common::config::AppConfig;
use herald_common::types::{NotificationRecord, NotificationStatus};

use crate::queue::FailureUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(900),
        }
    }
}

impl RetryPolicy {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.notify_max_retries,
            base_delay: Duration::from_secs(config.notify_backoff_base_secs),
            max_delay: Duration::from_secs(config.notify_max_backoff_secs),
        }
    }

    /// Delay before the next attempt, given the already-incremented retry count.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Bookkeeping for a failed attempt on `record`.
    pub fn on_failure(
        &self,
        record: &NotificationRecord,
        error: &str,
        now: DateTime<Utc>,
    ) -> FailureUpdate {
        let retry_count = record.retry_count.max(0).saturating_add(1);

        if retry_count as u32 >= self.max_retries {
            return FailureUpdate {
                retry_count,
                status: NotificationStatus::Failed,
                next_attempt_at: None,
                error_message: error.to_string(),
            };
        }

        let delay = self.backoff(retry_count as u32);
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        FailureUpdate {
            retry_count,
            status: NotificationStatus::Queued,
            next_attempt_at: now.checked_add_signed(delay),
            error_message: error.to_string(),
        }
    }
}
