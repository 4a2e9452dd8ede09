//! Convenient re-exports for common steadyhand types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    error::{BuildError, Failure, NonRetryableError},
    jitter::Jitter,
    retry::{retry, Retry, RetryConfig, RetryLayer, RetryPolicy},
    throttle::{throttle, Throttle, ThrottleBuilder, ThrottleConfig, ThrottleLayer},
};
