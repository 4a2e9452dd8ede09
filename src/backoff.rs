//! Backoff strategies: the un-jittered base delay before each retry.
//!
//! Attempt numbering follows the retry loop: attempt `k` is the `k`-th failure (1-based), and the
//! returned delay is the wait before attempt `k + 1`. Attempt `0` never sleeps.
//!
//! The retry scheduler defaults to [`Backoff::linear`], giving `k * wait_base`.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use steadyhand::Backoff;
//!
//! let backoff = Backoff::linear(Duration::from_millis(20));
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_millis(20));
//! assert_eq!(backoff.delay(3), Duration::from_millis(60));
//! ```
//!
//! Overflow saturates at [`MAX_BACKOFF`] (1 day).

use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for linear or exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Constant,
    Linear,
    Exponential,
}

/// Base-delay schedule for the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    shape: Shape,
    base: Duration,
    max: Option<Duration>,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { shape: Shape::Constant, base: delay, max: None }
    }

    /// `attempt * base`.
    pub fn linear(base: Duration) -> Self {
        Self { shape: Shape::Linear, base, max: None }
    }

    /// `base * 2^(attempt - 1)`.
    pub fn exponential(base: Duration) -> Self {
        Self { shape: Shape::Exponential, base, max: None }
    }

    /// Cap a growing backoff. Rejected for constant backoff and for `max < base`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if self.shape == Shape::Constant {
            return Err(BackoffError::ConstantDoesNotSupportMax);
        }
        if max < self.base {
            return Err(BackoffError::MaxLessThanBase { base: self.base, max });
        }
        self.max = Some(max);
        Ok(self)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay before the retry that follows failure number `attempt`.
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let raw = match self.shape {
            Shape::Constant => self.base,
            Shape::Linear => {
                let factor = attempt.min(u32::MAX as usize) as u32;
                self.base.checked_mul(factor).unwrap_or(MAX_BACKOFF)
            }
            Shape::Exponential => {
                let exponent = (attempt - 1).min(u32::MAX as usize) as u32;
                let nanos = self.base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64)
            }
        };
        let capped = self.max.map_or(raw, |m| raw.min(m));
        capped.min(MAX_BACKOFF)
    }
}
