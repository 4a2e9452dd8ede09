//! Jitter: randomized inflation of a backoff delay so concurrent retriers drift apart.
//!
//! - `None`: use the backoff delay as-is (deterministic tests).
//! - `Inflate`: multiply by `1 + r` with `r` uniform in `[0, ratio)`, then round to whole
//!   milliseconds. The default ratio is `0.5`, so a delay `d` lands in `[d, 1.5 * d]`.
//!
//! RNG: `rand`'s thread-local RNG by default; inject a seeded RNG through `apply_with_rng`.

use crate::error::BuildError;
use rand::{rng, Rng};
use std::time::Duration;

/// Default upper bound of the inflation factor.
pub const DEFAULT_JITTER_RATIO: f64 = 0.5;

/// Upper bound of the inflation factor. Built only by [`Jitter::inflate`] and [`Jitter::inflate_by`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InflateRatio(f64);

impl InflateRatio {
    /// The ratio as a plain float.
    pub fn get(&self) -> f64 {
        self.0
    }
}

/// Jitter strategy for randomizing retry delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// No jitter.
    None,
    /// Inflate by up to the given ratio of the delay.
    Inflate(InflateRatio),
}

impl Default for Jitter {
    fn default() -> Self {
        Self::inflate()
    }
}

impl Jitter {
    /// Inflate by up to 50%.
    pub fn inflate() -> Self {
        Jitter::Inflate(InflateRatio(DEFAULT_JITTER_RATIO))
    }

    /// Inflate by up to `ratio` of the delay. `ratio` must be finite and non-negative.
    pub fn inflate_by(ratio: f64) -> Result<Self, BuildError> {
        if !ratio.is_finite() || ratio < 0.0 {
            return Err(BuildError::InvalidJitterRatio(ratio));
        }
        Ok(Jitter::Inflate(InflateRatio(ratio)))
    }

    /// Apply jitter to a delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// Apply jitter with a caller-supplied RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match *self {
            Jitter::None => delay,
            Jitter::Inflate(InflateRatio(ratio)) => {
                let millis = delay.as_secs_f64() * 1000.0;
                // `random_range` panics on an empty or non-finite range
                if millis == 0.0 || !(ratio.is_finite() && ratio > 0.0) {
                    return Duration::from_millis(millis.round() as u64);
                }
                let r: f64 = rng.random_range(0.0..ratio);
                // `as` saturates on overflow
                Duration::from_millis((millis * (1.0 + r)).round() as u64)
            }
        }
    }
}
