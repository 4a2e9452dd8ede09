//! Retry scheduler.
//!
//! Semantics:
//! - `retries` counts re-invocations after the first attempt, so an operation runs at most
//!   `retries + 1` times. `retries = 0` means a single attempt.
//! - `Failure::NonRetryable` is returned immediately, without sleeping, whatever budget remains.
//! - Any other failure bumps the attempt counter `k`. Past the budget, that failure is returned
//!   exactly as produced. Otherwise the loop sleeps `jitter(backoff(k))` and tries again.
//! - With the defaults this is `round(k * wait_base * (1 + r))` ms, `r` uniform in `[0, 0.5)`.
//! - Every call owns its own counter; nothing is shared between calls.
//!
//! Example
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use steadyhand::{retry, Failure};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let calls = Arc::new(AtomicUsize::new(0));
//! let counter = calls.clone();
//! let fetch = retry(
//!     move |id: u32| {
//!         let counter = counter.clone();
//!         async move {
//!             if counter.fetch_add(1, Ordering::SeqCst) < 2 {
//!                 Err(Failure::Transient("connection reset"))
//!             } else {
//!                 Ok(id * 2)
//!             }
//!         }
//!     },
//!     3,
//!     Duration::from_millis(1),
//! );
//! assert_eq!(fetch.call(21).await, Ok(42));
//! assert_eq!(calls.load(Ordering::SeqCst), 3);
//! # });
//! ```

use crate::{Backoff, Failure, Jitter, Sleeper, TokioSleeper};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Default retry budget.
pub const DEFAULT_RETRIES: usize = 5;
/// Default base wait between attempts.
pub const DEFAULT_WAIT_BASE: Duration = Duration::from_millis(20);

/// Wrap `operation` so each call retries transient failures.
///
/// Equivalent to `RetryPolicy::builder().retries(retries).wait_base(wait_base).build().wrap(operation)`.
pub fn retry<Op>(operation: Op, retries: usize, wait_base: Duration) -> Retry<Op> {
    RetryPolicy::builder().retries(retries).wait_base(wait_base).build().wrap(operation)
}

/// Numeric knobs of a retry policy in plain-data form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryConfig {
    pub retries: usize,
    pub wait_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { retries: DEFAULT_RETRIES, wait_base_ms: DEFAULT_WAIT_BASE.as_millis() as u64 }
    }
}

/// Retry policy combining budget, backoff, jitter and sleeper.
#[derive(Clone)]
pub struct RetryPolicy {
    retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retries", &self.retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::new().build()
    }
}

impl RetryPolicy {
    /// Start building a policy from the defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Policy with linear backoff and default jitter from a plain config.
    pub fn from_config(config: RetryConfig) -> Self {
        RetryPolicyBuilder::new()
            .retries(config.retries)
            .wait_base(Duration::from_millis(config.wait_base_ms))
            .build()
    }

    /// Re-invocations allowed after the first attempt.
    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn jitter(&self) -> &Jitter {
        &self.jitter
    }

    /// Bind the policy to an operation.
    pub fn wrap<Op>(self, operation: Op) -> Retry<Op> {
        Retry { operation: Arc::new(operation), policy: self }
    }

    /// Turn the policy into a tower layer.
    pub fn into_layer(self) -> RetryLayer {
        RetryLayer { policy: self }
    }

    /// Delay before the attempt following failure number `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.jitter.apply(self.backoff.delay(attempt))
    }

    /// Run `operation` until it succeeds, fails non-retryably, or the budget is spent.
    pub async fn execute<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, Failure<E>>
    where
        Fut: Future<Output = Result<T, Failure<E>>>,
        Op: FnMut() -> Fut,
    {
        let mut attempt = 0usize;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(Failure::NonRetryable(e)) => {
                    tracing::debug!(attempt, error = %e, "non-retryable failure; not retrying");
                    return Err(Failure::NonRetryable(e));
                }
                Err(failure) => {
                    attempt += 1;
                    if attempt > self.retries {
                        tracing::warn!(attempts = attempt, "retry budget exhausted");
                        return Err(failure);
                    }
                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "transient failure; retrying"
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }
}

/// Builder for `RetryPolicy`.
#[derive(Debug)]
pub struct RetryPolicyBuilder {
    retries: usize,
    wait_base: Duration,
    backoff: Option<Backoff>,
    jitter: Jitter,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicyBuilder {
    /// Builder with `DEFAULT_RETRIES`, `DEFAULT_WAIT_BASE`, default jitter and tokio sleeps.
    pub fn new() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            wait_base: DEFAULT_WAIT_BASE,
            backoff: None,
            jitter: Jitter::inflate(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Re-invocations allowed after the first attempt.
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Base of the default linear backoff. Ignored when `backoff` is set.
    pub fn wait_base(mut self, wait_base: Duration) -> Self {
        self.wait_base = wait_base;
        self
    }

    /// Replace the linear backoff derived from `wait_base`.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Finish the policy. Every combination of knobs is valid.
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            backoff: self.backoff.unwrap_or_else(|| Backoff::linear(self.wait_base)),
            jitter: self.jitter,
            sleeper: self.sleeper,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An operation bound to a retry policy. Cheap to clone; clones share the operation.
pub struct Retry<Op> {
    operation: Arc<Op>,
    policy: RetryPolicy,
}

impl<Op> Clone for Retry<Op> {
    fn clone(&self) -> Self {
        Self { operation: self.operation.clone(), policy: self.policy.clone() }
    }
}

impl<Op> std::fmt::Debug for Retry<Op> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry").field("policy", &self.policy).finish_non_exhaustive()
    }
}

impl<Op> Retry<Op> {
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invoke the operation with `input`, retrying per the policy.
    ///
    /// `input` is cloned for every attempt.
    pub fn call<A, T, E, Fut>(&self, input: A) -> BoxFuture<'static, Result<T, Failure<E>>>
    where
        Op: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, Failure<E>>> + Send + 'static,
        A: Clone + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let operation = self.operation.clone();
        let policy = self.policy.clone();
        Box::pin(async move { policy.execute(move || operation(input.clone())).await })
    }
}

/// Tower layer applying a `RetryPolicy` to a service whose error type is `Failure<E>`.
#[derive(Clone, Debug)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

impl RetryLayer {
    /// Layer applying `policy` to every service it wraps.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, service: S) -> Self::Service {
        RetryService { inner: service, policy: self.policy.clone() }
    }
}

/// Retry service produced by `RetryLayer`. Each attempt drives a fresh clone of the inner service.
#[derive(Clone, Debug)]
pub struct RetryService<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S, Req, E> Service<Req> for RetryService<S>
where
    S: Service<Req, Error = Failure<E>> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
    Req: Clone + Send + 'static,
    E: Send + 'static,
{
    type Response = S::Response;
    type Error = Failure<E>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // readiness is awaited per attempt by `oneshot`
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let inner = self.inner.clone();
        let policy = self.policy.clone();
        Box::pin(async move { policy.execute(move || inner.clone().oneshot(req.clone())).await })
    }
}
