use std::time::Duration;

use chrono::{DateTime, Utc};

/// Exponential backoff for failed backup copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupRetryPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_retries: i64,
}

impl Default for BackupRetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max_delay: Duration::from_secs(60 * 60),
            max_retries: 5,
        }
    }
}

impl BackupRetryPolicy {
    /// Delay before the next attempt after `failures` failed attempts.
    pub fn delay(&self, failures: i64) -> Duration {
        let exponent = failures.saturating_sub(1).clamp(0, 20) as u32;
        self.base
            .checked_mul(1_u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn next_attempt_at(&self, now: DateTime<Utc>, failures: i64) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay(failures))
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        now + delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let policy = BackupRetryPolicy {
            base: Duration::from_secs(10),
            max_delay: Duration::from_secs(100),
            max_retries: 5,
        };
        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(2), Duration::from_secs(20));
        assert_eq!(policy.delay(3), Duration::from_secs(40));
        assert_eq!(policy.delay(5), Duration::from_secs(100));
        assert_eq!(policy.delay(60), Duration::from_secs(100));
    }
}
