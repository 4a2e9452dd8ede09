#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # steadyhand
//!
//! Two control-flow wrappers for async, single-argument operations:
//!
//! - **Retry** ([`retry`], [`RetryPolicy`]): re-invoke a failing operation with linearly growing,
//!   jittered delays until it succeeds, raises a [`NonRetryableError`], or spends its budget. Each
//!   call has its own budget.
//! - **Throttle** ([`throttle`], [`ThrottleBuilder`]): let at most `limit` calls start per
//!   `interval`, pushing the overflow to later window boundaries. All calls through one wrapper share
//!   one window.
//!
//! Both forward the operation's own success or failure untouched, and both are also available as
//! tower layers ([`RetryLayer`], [`ThrottleLayer`]).
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use steadyhand::{retry, throttle, Failure};
//!
//! #[tokio::main]
//! async fn main() {
//!     // at most 10 starts per 50ms ...
//!     let limited = throttle(
//!         |n: u64| async move { Ok::<_, Failure<std::io::Error>>(n * 2) },
//!         10,
//!         Duration::from_millis(50),
//!     );
//!     // ... and up to 5 retries on transient failures
//!     let resilient = retry(move |n: u64| limited.call(n), 5, Duration::from_millis(20));
//!
//!     assert_eq!(resilient.call(21).await.unwrap(), 42);
//! }
//! ```

pub mod backoff;
pub mod clock;
pub mod error;
pub mod jitter;
pub mod prelude;
pub mod retry;
pub mod sleeper;
pub mod throttle;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use clock::{Clock, ManualClock, TokioClock};
pub use error::{BuildError, Failure, NonRetryableError};
pub use jitter::{InflateRatio, Jitter};
pub use retry::{retry, Retry, RetryConfig, RetryLayer, RetryPolicy, RetryPolicyBuilder, RetryService};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use throttle::{
    throttle, Throttle, ThrottleBuilder, ThrottleConfig, ThrottleLayer, ThrottleService,
    ThrottledCall, WindowSnapshot,
};
