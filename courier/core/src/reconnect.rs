//! Reconnection Policy
//!
//! Capped exponential backoff for re-establishing the duplex connection.
//! The delay before the Nth retry (N counted from 1, post-increment) is
//!
//! ```text
//! delay(N) = min(base * 2^N, max)
//! ```
//!
//! With the defaults (base 1s, max 30s, 5 attempts) the schedule is
//! 2s, 4s, 8s, 16s, 30s, after which retries stop until the next explicit
//! connect.

use std::time::Duration;

/// Default number of consecutive retries before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default backoff base
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);
/// Default backoff ceiling
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Backoff and retry ceiling for reconnection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// A policy that never retries
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Maximum consecutive retries
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff base
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Backoff ceiling
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Whether another retry may be scheduled after `attempts` failed ones
    #[must_use]
    pub fn allows_attempt(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before retry number `attempt`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_default_schedule() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), ms(2000));
        assert_eq!(policy.delay_for_attempt(2), ms(4000));
        assert_eq!(policy.delay_for_attempt(3), ms(8000));
        assert_eq!(policy.delay_for_attempt(4), ms(16000));
        assert_eq!(policy.delay_for_attempt(5), ms(30000));
    }

    #[test]
    fn test_delay_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(6), ms(30000));
        assert_eq!(policy.delay_for_attempt(40), ms(30000));
        assert_eq!(policy.delay_for_attempt(u32::MAX), ms(30000));
    }

    #[test]
    fn test_delay_never_decreases() {
        let policy = ReconnectPolicy::default();
        let mut last = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= last, "attempt {attempt} went backwards");
            last = delay;
        }
    }

    #[test]
    fn test_attempt_ceiling() {
        let policy = ReconnectPolicy::default();
        assert!(policy.allows_attempt(0));
        assert!(policy.allows_attempt(4));
        assert!(!policy.allows_attempt(5));
        assert!(!ReconnectPolicy::disabled().allows_attempt(0));
    }

    #[test]
    fn test_custom_policy() {
        let policy = ReconnectPolicy::new(2, ms(100), ms(250));
        assert_eq!(policy.max_attempts(), 2);
        assert_eq!(policy.delay_for_attempt(1), ms(200));
        assert_eq!(policy.delay_for_attempt(2), ms(250));
    }
}
