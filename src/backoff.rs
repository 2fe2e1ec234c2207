//! Exponential backoff for retry scheduling.
//!
//! Attempt semantics: attempt index `0` represents the initial call (no delay), and retries
//! start at `attempt = 1`. The delay for retry `n` is `min(base * 2^(n-1), max)`.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use ninelives_http::Backoff;
//!
//! let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(2)).unwrap();
//! assert_eq!(backoff.delay(0), Duration::from_millis(0)); // initial call
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(2), Duration::from_millis(200));
//! assert_eq!(backoff.delay(6), Duration::from_secs(2)); // capped
//! ```
//!
//! Overflow behavior: the doubling saturates and is then capped at `max`, so huge attempt
//! numbers always yield exactly `max`.

use std::time::Duration;

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("base delay must be greater than zero")]
    BaseMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

/// Capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Create a backoff doubling from `base` and never exceeding `max`.
    pub fn new(base: Duration, max: Duration) -> Result<Self, BackoffError> {
        if base.is_zero() {
            return Err(BackoffError::BaseMustBePositive);
        }
        if max < base {
            return Err(BackoffError::MaxLessThanBase { base, max });
        }
        Ok(Self { base, max })
    }

    pub(crate) const fn new_unchecked(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Calculate the unjittered delay for a given attempt (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }
        let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
        let multiplier = 2u128.saturating_pow(exponent);
        let nanos = self.base.as_nanos().saturating_mul(multiplier).min(self.max.as_nanos());
        match u64::try_from(nanos) {
            Ok(nanos) => Duration::from_nanos(nanos),
            // Only reachable when `max` itself exceeds u64 nanoseconds.
            Err(_) => self.max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn doubles_until_capped() {
        let backoff = Backoff::new(ms(100), ms(1_000)).unwrap();
        assert_eq!(backoff.delay(1), ms(100));
        assert_eq!(backoff.delay(2), ms(200));
        assert_eq!(backoff.delay(3), ms(400));
        assert_eq!(backoff.delay(4), ms(800));
        assert_eq!(backoff.delay(5), ms(1_000));
        assert_eq!(backoff.delay(50), ms(1_000));
    }

    #[test]
    fn matches_closed_form_for_every_attempt() {
        let base = ms(7);
        let max = Duration::from_secs(90);
        let backoff = Backoff::new(base, max).unwrap();
        for n in 1..64usize {
            let expected = base
                .checked_mul(2u32.saturating_pow((n - 1) as u32))
                .map(|d| d.min(max))
                .unwrap_or(max);
            assert_eq!(backoff.delay(n), expected, "attempt {n}");
        }
    }

    #[test]
    fn initial_call_has_no_delay() {
        let backoff = Backoff::new(ms(100), ms(100)).unwrap();
        assert_eq!(backoff.delay(0), Duration::ZERO);
    }

    #[test]
    fn huge_attempts_saturate_to_max_without_panicking() {
        let week = Duration::from_secs(7 * 24 * 3600);
        let backoff = Backoff::new(Duration::from_secs(1), week).unwrap();
        assert_eq!(backoff.delay(usize::MAX), week);
    }

    #[test]
    fn caps_longer_than_a_day_are_honored() {
        let week = Duration::from_secs(7 * 24 * 3600);
        let backoff = Backoff::new(Duration::from_secs(1), week).unwrap();
        assert_eq!(backoff.delay(20), Duration::from_secs(1 << 19));
        assert_eq!(backoff.delay(21), week);
    }

    #[test]
    fn effectively_unbounded_max_does_not_overflow() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::MAX).unwrap();
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(usize::MAX), Duration::MAX);
    }

    #[test]
    fn rejects_zero_base() {
        assert_eq!(Backoff::new(Duration::ZERO, ms(10)), Err(BackoffError::BaseMustBePositive));
    }

    #[test]
    fn rejects_max_below_base() {
        let err = Backoff::new(ms(10), ms(5)).unwrap_err();
        assert_eq!(err, BackoffError::MaxLessThanBase { base: ms(10), max: ms(5) });
        assert!(err.to_string().contains("must be >="));
    }
}
