//! Retry policy
//!
//! Default retry behavior for read calls (GET and list). Mutating RPCs are
//! never retried at this layer: a safe retry of a non-idempotent call needs
//! an idempotency token the server honours, which is a per-kind concern.

use rand::Rng;
use std::time::Duration;

/// Retry predicate plus backoff schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied after each attempt
    pub multiplier: f64,
    /// Ceiling on the computed delay
    pub max_delay: Duration,
    /// Total attempts, including the first
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries, used for mutating calls
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether an HTTP response is worth retrying
    ///
    /// Transient codes: 429 (rate limit), 503 (unavailable), 504 (deadline),
    /// and 500 when the body hints the failure is retriable.
    pub fn is_transient(&self, status: u16, body: &str) -> bool {
        match status {
            429 | 503 | 504 => true,
            500 => body.contains("retry") || body.contains("UNAVAILABLE"),
            _ => false,
        }
    }

    /// Delay before retry number `attempt` (0-based), with full jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jittered = rand::thread_rng().gen_range(0.0..=capped);
        Duration::from_secs_f64(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_codes() {
        let policy = RetryPolicy::default();
        assert!(policy.is_transient(429, ""));
        assert!(policy.is_transient(503, ""));
        assert!(policy.is_transient(504, ""));
        assert!(policy.is_transient(500, r#"{"error":{"message":"please retry"}}"#));
        assert!(!policy.is_transient(500, r#"{"error":{"message":"boom"}}"#));
        assert!(!policy.is_transient(404, ""));
        assert!(!policy.is_transient(400, ""));
    }

    #[test]
    fn test_backoff_bounded_by_cap() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(4),
            max_attempts: 10,
        };
        for attempt in 0..10 {
            assert!(policy.backoff(attempt) <= Duration::from_secs(4));
        }
    }

    #[test]
    fn test_none_makes_single_attempt() {
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}
