//! Failure classification for wrapped operations.
//!
//! An operation wrapped by [`Retry`](crate::Retry) reports errors as [`Failure<E>`]. The tag is the
//! whole classifier:
//! - `Failure::Transient(E)` is retried until the budget runs out.
//! - `Failure::NonRetryable(_)` stops the retry loop on the spot and is handed back untouched.
//!
//! There is no allow-list and no predicate. Anything not explicitly flagged is transient.
//!
//! Example
//! ```rust
//! use steadyhand::{Failure, NonRetryableError};
//!
//! let fatal: Failure<std::io::Error> = NonRetryableError::with_message("bad credentials").into();
//! assert!(!fatal.is_retryable());
//! assert_eq!(fatal.non_retryable_message(), Some("bad credentials"));
//! ```

use std::fmt;

/// Configuration rejected by a builder.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    /// A throttle must admit at least one call per window.
    #[error("throttle limit must be > 0 (got {0})")]
    InvalidLimit(usize),
    /// Jitter ratio must be finite and non-negative.
    #[error("jitter ratio must be finite and >= 0 (got {0})")]
    InvalidJitterRatio(f64),
}

/// Failure flagged as terminal: raising it from a retried operation aborts all remaining attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonRetryableError {
    message: Option<String>,
}

impl NonRetryableError {
    /// Non-retryable failure without a message.
    pub fn new() -> Self {
        Self { message: None }
    }

    /// Non-retryable failure carrying a human-readable reason.
    pub fn with_message(message: impl Into<String>) -> Self {
        Self { message: Some(message.into()) }
    }

    /// The reason given at construction, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for NonRetryableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "non-retryable failure: {}", msg),
            None => write!(f, "non-retryable failure"),
        }
    }
}

impl std::error::Error for NonRetryableError {}

/// Error type produced by operations wrapped with retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure<E> {
    /// Ordinary failure; eligible for another attempt.
    Transient(E),
    /// Terminal failure; propagated immediately.
    NonRetryable(NonRetryableError),
}

impl<E> Failure<E> {
    /// Wrap an ordinary error as retryable.
    pub fn transient(error: E) -> Self {
        Self::Transient(error)
    }

    /// Terminal failure with a message.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::NonRetryable(NonRetryableError::with_message(message))
    }

    /// Classify this failure. Only the `Transient` tag is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Borrow the transient error if present.
    pub fn as_transient(&self) -> Option<&E> {
        match self {
            Self::Transient(e) => Some(e),
            Self::NonRetryable(_) => None,
        }
    }

    /// Take the transient error, discarding a non-retryable one.
    pub fn into_transient(self) -> Option<E> {
        match self {
            Self::Transient(e) => Some(e),
            Self::NonRetryable(_) => None,
        }
    }

    /// Message carried by a non-retryable failure, if any.
    pub fn non_retryable_message(&self) -> Option<&str> {
        match self {
            Self::NonRetryable(e) => e.message(),
            Self::Transient(_) => None,
        }
    }
}

impl<E> From<NonRetryableError> for Failure<E> {
    fn from(error: NonRetryableError) -> Self {
        Self::NonRetryable(error)
    }
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(e) => write!(f, "{}", e),
            Self::NonRetryable(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for Failure<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transient(e) => Some(e),
            Self::NonRetryable(e) => Some(e),
        }
    }
}
