//! Exponential backoff retry policy.
//!
//! The policy is a pure decision function over (error kind, attempt
//! count), so it can be unit-tested without mocking any network calls.
//! Callers own the actual sleeping; the policy only says whether to try
//! again and how long to wait first.

use std::time::Duration;

use crate::error::ErrorKind;

/// Configuration for the backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each retry.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Create a policy suitable for quick unit tests (no real waiting).
    pub fn instant() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        }
    }

    /// Backoff delay after a failed `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    /// Decide what to do after `attempt` (1-based) failed with `kind`.
    ///
    /// Only transient failures are ever retried; permanent failures and
    /// exhausted attempts give up immediately.
    pub fn decide(&self, kind: ErrorKind, attempt: u32) -> RetryDecision {
        if kind != ErrorKind::Transient {
            return RetryDecision::GiveUp;
        }
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.delay_for(attempt),
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after waiting for `delay`.
    Retry { delay: Duration },
    /// Stop; surface the last error to the caller.
    GiveUp,
}

impl RetryDecision {
    /// Whether the decision is to retry.
    pub fn should_retry(&self) -> bool {
        matches!(self, RetryDecision::Retry { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };

        assert_eq!(policy.delay_for(9), Duration::from_secs(5));
    }

    #[test]
    fn test_permanent_errors_never_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.decide(ErrorKind::Permanent, 1),
            RetryDecision::GiveUp
        );
        assert_eq!(policy.decide(ErrorKind::Conflict, 1), RetryDecision::GiveUp);
    }

    #[test]
    fn test_transient_retries_until_exhausted() {
        let policy = RetryPolicy::default();

        assert!(policy.decide(ErrorKind::Transient, 1).should_retry());
        assert!(policy.decide(ErrorKind::Transient, 2).should_retry());
        // Third attempt is the last one allowed.
        assert_eq!(
            policy.decide(ErrorKind::Transient, 3),
            RetryDecision::GiveUp
        );
    }
}
