//! Symmetric jitter to prevent thundering herds
//!
//! A jitter factor `j` spreads a delay `d` uniformly over `[d - d*j, d + d*j]`, clamped at
//! zero. A factor of `0` disables randomness entirely, which keeps retry schedules
//! reproducible in tests.
//!
//! Notes:
//! - RNG: uses `rand`'s thread-local RNG by default; deterministic RNGs can be injected via
//!   `apply_with_rng`.
//! - Precision: the spread is computed in whole nanoseconds and rounded down, so the result
//!   never leaves the documented interval.
//!
//! Example:
//! ```rust
//! use ninelives_http::Jitter;
//! use std::time::Duration;
//!
//! let jitter = Jitter::new(0.2).unwrap();
//! let delay = jitter.apply(Duration::from_millis(100));
//! assert!(delay >= Duration::from_millis(80) && delay <= Duration::from_millis(120));
//! ```

use rand::{rng, Rng};
use std::time::Duration;

/// Errors returned when the jitter factor is outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("jitter factor must be a finite value in [0, 1] (got {0})")]
pub struct JitterError(pub f64);

/// Symmetric jitter strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Jitter {
    factor: f64,
}

impl Jitter {
    /// Create a jitter with the given factor in `[0, 1]`.
    pub fn new(factor: f64) -> Result<Self, JitterError> {
        if !factor.is_finite() || !(0.0..=1.0).contains(&factor) {
            return Err(JitterError(factor));
        }
        Ok(Self { factor })
    }

    pub(crate) const fn new_unchecked(factor: f64) -> Self {
        Self { factor }
    }

    /// No randomness.
    pub fn none() -> Self {
        Self { factor: 0.0 }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a custom RNG (for testing)
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        if self.factor == 0.0 {
            return delay;
        }
        let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        let spread = ((nanos as f64) * self.factor).floor();
        let spread = if spread >= u64::MAX as f64 { u64::MAX } else { spread as u64 };
        if spread == 0 {
            return delay;
        }
        let offset = rng.random_range(0..=spread.saturating_mul(2));
        let jittered = nanos.saturating_sub(spread).saturating_add(offset);
        Duration::from_nanos(jittered)
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::none()
    }
}
