//! Retry policy for the classifier client.
//!
//! Unlike a generic HTTP retry policy (exponential backoff with jitter),
//! the tool-poisoning engine's classifier calls use a fixed linear
//! schedule to respect a rate limiter's recovery window: 2s, 4s, 6s.

use std::time::Duration;

/// Retry configuration matching §4.6: up to 3 retries, linearly increasing
/// backoff, a per-call timeout, and a mandatory inter-request delay applied
/// regardless of outcome (to avoid tripping the rate limiter in the first
/// place).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
    pub inter_request_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
            inter_request_delay: Duration::from_secs(1),
        }
    }
}

/// Linear backoff delay before retry attempt `attempt` (0-indexed): the
/// first retry waits `base_delay`, the second `2 * base_delay`, and so on.
pub fn linear_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    config.base_delay * (attempt + 1)
}

/// Whether an error text carries a rate-limit signal: an explicit HTTP 429
/// or a recognizable rate-limit token in the message.
pub fn is_rate_limited(status: Option<u16>, message: &str) -> bool {
    if status == Some(429) {
        return true;
    }
    let lowered = message.to_lowercase();
    lowered.contains("rate limit") || lowered.contains("429") || lowered.contains("too many requests")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff_matches_spec_schedule() {
        let config = RetryConfig::default();
        assert_eq!(linear_backoff(0, &config), Duration::from_secs(2));
        assert_eq!(linear_backoff(1, &config), Duration::from_secs(4));
        assert_eq!(linear_backoff(2, &config), Duration::from_secs(6));
    }

    #[test]
    fn is_rate_limited_detects_status_and_text() {
        assert!(is_rate_limited(Some(429), ""));
        assert!(is_rate_limited(None, "Error: rate limit exceeded"));
        assert!(is_rate_limited(None, "too many requests, slow down"));
        assert!(!is_rate_limited(Some(500), "internal server error"));
    }
}
