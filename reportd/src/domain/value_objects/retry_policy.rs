//! Retry policy value object.

use std::time::Duration;

use crate::config::FetchConfig;

/// Exponential retry schedule for transient failures.
///
/// `max_attempts` counts the first try, so a policy of 3 attempts sleeps at
/// most twice.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(15),
            backoff_multiplier: 3.0,
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy that never retries.
    #[cfg(test)]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.retries.max(1),
            initial_delay: config.initial_delay,
            backoff_multiplier: config.delay_multiplier,
        }
    }

    /// Delay to wait after the given failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay
            .mul_f64(self.backoff_multiplier.powi(attempt as i32))
    }

    /// Whether another attempt is allowed after `attempt` (0-indexed) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Total time spent sleeping if every attempt fails.
    #[cfg(test)]
    pub fn max_total_delay(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(15));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(45));
        assert_eq!(policy.max_total_delay(), Duration::from_secs(60));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.should_retry(0));
        assert_eq!(policy.max_total_delay(), Duration::ZERO);
    }
}
