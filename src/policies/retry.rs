//! # Ready-made retry predicates.
//!
//! The registry's `retry` policy is any `Fn(&Descriptor, &TaskSnapshot, &TaskError) -> bool`.
//! [`RetryPolicy`] covers the common shapes so callers do not have to write the closure.
//!
//! The snapshot passed to the predicate already counts the failure being decided on:
//! after the first failed attempt `snapshot.failures == 1`.
//!
//! ```text
//! RetryPolicy::Never             → fail on the first error (default)
//! RetryPolicy::MaxAttempts(3)    → up to 3 attempts in total
//! RetryPolicy::OnTimeout(2)      → retry timeouts only, up to 2 attempts
//! ```

use crate::core::TaskSnapshot;
use crate::error::TaskError;

/// Policy deciding whether a failed attempt re-runs in place.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Never retry.
    #[default]
    Never,
    /// Retry any error while fewer than `n` attempts have failed.
    MaxAttempts(u32),
    /// Retry only timeouts while fewer than `n` attempts have failed.
    OnTimeout(u32),
}

impl RetryPolicy {
    /// Decides whether the attempt that just failed with `error` should run again.
    ///
    /// Dependency failures are never retried in place: the failed dependency has to be
    /// re-run first, which only a fresh `run` can do.
    pub fn should_retry(&self, snapshot: &TaskSnapshot, error: &TaskError) -> bool {
        if error.is_dependency() {
            return false;
        }
        match *self {
            RetryPolicy::Never => false,
            RetryPolicy::MaxAttempts(n) => snapshot.failures < n,
            RetryPolicy::OnTimeout(n) => error.is_timeout() && snapshot.failures < n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskStatus;
    use std::time::Duration;

    fn failed(failures: u32) -> TaskSnapshot {
        TaskSnapshot {
            failures,
            status: TaskStatus::Error,
            ..TaskSnapshot::new("a".into())
        }
    }

    #[test]
    fn max_attempts_counts_the_current_failure() {
        let policy = RetryPolicy::MaxAttempts(3);
        let err = TaskError::fail("boom");
        assert!(policy.should_retry(&failed(1), &err));
        assert!(policy.should_retry(&failed(2), &err));
        assert!(!policy.should_retry(&failed(3), &err));
    }

    #[test]
    fn on_timeout_ignores_other_errors() {
        let policy = RetryPolicy::OnTimeout(5);
        let timeout = TaskError::Timeout {
            timeout: Duration::from_secs(1),
        };
        assert!(policy.should_retry(&failed(1), &timeout));
        assert!(!policy.should_retry(&failed(1), &TaskError::Deadlock));
    }

    #[test]
    fn dependency_failures_are_not_retried() {
        let err = TaskError::dependency("a".into(), TaskError::fail("x"));
        assert!(!RetryPolicy::MaxAttempts(10).should_retry(&failed(1), &err));
    }
}
