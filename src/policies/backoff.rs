//! # Delay between in-place retries.
//!
//! A retried task re-runs with the same queue entry. [`BackoffPolicy`] decides how long the
//! actor waits before that next attempt. The default is [`BackoffPolicy::none`]: retry
//! immediately.
//!
//! The delay for retry `n` (0-based) is `first × factor^n`, clamped to `max`, then jittered.
//! The base is derived from `n` alone, so jitter never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use depvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(2), Duration::from_millis(400));
//! assert_eq!(backoff.next(10), Duration::from_secs(1));
//! assert_eq!(BackoffPolicy::none().next(5), Duration::ZERO);
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to the clamped delay.
    pub jitter: JitterPolicy,
}

impl BackoffPolicy {
    /// Retry immediately.
    pub const fn none() -> Self {
        Self {
            first: Duration::ZERO,
            max: Duration::ZERO,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Constant delay between retries.
    pub const fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Exponential growth from `first`, doubling up to `max`.
    pub const fn exponential(first: Duration, max: Duration) -> Self {
        Self {
            first,
            max,
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Returns a copy using the given jitter.
    pub const fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Computes the delay before retry number `retry` (0-based).
    pub fn next(&self, retry: u32) -> Duration {
        if self.first.is_zero() || self.max.is_zero() {
            return Duration::ZERO;
        }
        let exp = retry.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

impl Default for BackoffPolicy {
    /// Returns [`BackoffPolicy::none`].
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_waits() {
        let policy = BackoffPolicy::default();
        for retry in 0..8 {
            assert_eq!(policy.next(retry), Duration::ZERO);
        }
    }

    #[test]
    fn constant_stays_constant() {
        let policy = BackoffPolicy::constant(Duration::from_millis(250));
        assert_eq!(policy.next(0), Duration::from_millis(250));
        assert_eq!(policy.next(9), Duration::from_millis(250));
    }

    #[test]
    fn exponential_is_capped() {
        let policy = BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(3), Duration::from_millis(800));
        assert_eq!(policy.next(4), Duration::from_secs(1));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn first_above_max_is_clamped() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(10),
            max: Duration::from_secs(5),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.next(0), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_below_base() {
        let policy = BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_secs(30))
            .with_jitter(JitterPolicy::Full);
        for retry in 0..10 {
            let base = Duration::from_millis(100 * 2u64.pow(retry));
            assert!(policy.next(retry) <= base.min(Duration::from_secs(30)));
        }
    }
}
