//! Retry backoff policy
//!
//! `delay = min(2^retry_count seconds, max_delay)`, one hour ceiling by
//! default. Pure: no clock, no I/O. Once a record's budget is exhausted the
//! policy has nothing more to say; dead-lettered rows only come back through
//! an operator redrive.

use std::time::Duration;

/// Ceiling applied to every computed delay
pub const MAX_BACKOFF_SECS: u64 = 3600;

/// Exponents at or above this already exceed any sane ceiling
const MAX_EXPONENT: u32 = 62;

/// Exponential backoff with a cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum delay between attempts
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(MAX_BACKOFF_SECS),
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_delay: Duration) -> Self {
        Self { max_delay }
    }

    /// Delay before the next attempt after `retry_count` failures
    ///
    /// Negative counts are treated as zero.
    pub fn delay_for(&self, retry_count: i32) -> Duration {
        let exponent = u32::try_from(retry_count).unwrap_or(0).min(MAX_EXPONENT);
        let secs = 1u64 << exponent;
        Duration::from_secs(secs).min(self.max_delay)
    }

    /// Whether a record with this many failures has used up its budget
    pub fn is_exhausted(&self, retry_count: i32, max_retries: i32) -> bool {
        retry_count >= max_retries
    }
}

/// Backoff with the default one-hour ceiling
pub fn backoff(retry_count: i32) -> Duration {
    BackoffPolicy::default().delay_for(retry_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_ceiling() {
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(1), Duration::from_secs(2));
        assert_eq!(backoff(2), Duration::from_secs(4));
        assert_eq!(backoff(5), Duration::from_secs(32));
        assert_eq!(backoff(11), Duration::from_secs(2048));
        assert_eq!(backoff(12), Duration::from_secs(3600));
    }

    #[test]
    fn test_matches_closed_form_and_never_exceeds_cap() {
        for n in 0..200 {
            let expected = if n < 12 { 1u64 << n } else { MAX_BACKOFF_SECS };
            let delay = backoff(n);
            assert_eq!(delay, Duration::from_secs(expected), "retry_count={}", n);
            assert!(delay <= Duration::from_secs(MAX_BACKOFF_SECS));
        }
    }

    #[test]
    fn test_monotonic() {
        let mut previous = Duration::ZERO;
        for n in 0..100 {
            let delay = backoff(n);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn test_extreme_counts_do_not_overflow() {
        assert_eq!(backoff(i32::MAX), Duration::from_secs(MAX_BACKOFF_SECS));
        assert_eq!(backoff(-3), Duration::from_secs(1));
    }

    #[test]
    fn test_custom_ceiling() {
        let policy = BackoffPolicy::new(Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
    }

    #[test]
    fn test_exhaustion() {
        let policy = BackoffPolicy::default();
        assert!(!policy.is_exhausted(2, 3));
        assert!(policy.is_exhausted(3, 3));
        assert!(policy.is_exhausted(4, 3));
    }
}
