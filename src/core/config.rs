//! # Engine configuration.
//!
//! [`Config`] holds the engine-wide defaults that the registry policies fall back to.
//!
//! ## Sentinel values
//! - `timeout = 0s` → no timeout unless the `timeout` policy returns one
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(6000);

/// Global configuration for an [`Engine`](crate::Engine).
///
/// ## Field semantics
/// - `timeout`: per-attempt timeout used when the `timeout` policy returns `None`
///   (`0s` = no timeout)
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `backoff`: delay between in-place retries
#[derive(Clone, Debug)]
pub struct Config {
    /// Default per-attempt timeout.
    pub timeout: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Receivers that lag behind more than `bus_capacity` events skip older items.
    pub bus_capacity: usize,

    /// Delay before each in-place retry. Zero by default.
    pub backoff: BackoffPolicy,
}

impl Config {
    /// Returns the default per-attempt timeout as an `Option`.
    ///
    /// - `None` → no timeout
    /// - `Some(d)` → timeout applied per attempt
    #[inline]
    pub fn default_timeout(&self) -> Option<Duration> {
        if self.timeout.is_zero() {
            None
        } else {
            Some(self.timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// - `timeout = 6s`
    /// - `bus_capacity = 1024`
    /// - `backoff = BackoffPolicy::none()` (retry immediately)
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            bus_capacity: 1024,
            backoff: BackoffPolicy::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels() {
        let mut cfg = Config::default();
        assert_eq!(cfg.default_timeout(), Some(Duration::from_millis(6000)));

        cfg.timeout = Duration::ZERO;
        cfg.bus_capacity = 0;
        assert_eq!(cfg.default_timeout(), None);
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
