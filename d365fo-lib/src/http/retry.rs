//! Retry configuration for transient HTTP failures.

use std::time::Duration;

/// Configuration for automatic retry behavior.
///
/// Controls how the session handles 429/503 responses and transport-level
/// failures. 401 responses are handled separately (single token refresh and
/// retry); other 4xx/5xx responses are terminal.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use d365fo_lib::http::RetryConfig;
///
/// let config = RetryConfig::default()
///     .max_attempts(3)
///     .initial_delay(Duration::from_millis(250));
///
/// let no_retry = RetryConfig::no_retry();
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial delay between attempts (doubles each attempt).
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Whether to retry on HTTP 429 and 503.
    pub retry_on_status: bool,
    /// Whether to retry on transport errors.
    pub retry_on_network: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            retry_on_status: true,
            retry_on_network: true,
        }
    }
}

impl RetryConfig {
    /// Creates a config with all retries disabled.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            retry_on_status: false,
            retry_on_network: false,
            ..Default::default()
        }
    }

    /// Sets the maximum number of attempts.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Sets the initial delay between attempts.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay between attempts.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Returns the backoff delay before the given retry.
    ///
    /// `attempt` is zero-based: the delay before the first retry is
    /// `initial_delay`, doubling each attempt and capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(0), Duration::from_millis(500));
        assert_eq!(config.delay_for(1), Duration::from_secs(1));
        assert_eq!(config.delay_for(2), Duration::from_secs(2));
        assert_eq!(config.delay_for(3), Duration::from_secs(4));
        assert_eq!(config.delay_for(4), Duration::from_secs(8));
        assert_eq!(config.delay_for(5), Duration::from_secs(15));
        assert_eq!(config.delay_for(30), Duration::from_secs(15));
    }

    #[test]
    fn test_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert!(!config.retry_on_status);
        assert!(!config.retry_on_network);
    }
}
