//! Fixed-window throttle.
//!
//! One [`Throttle`] owns one admission window, shared by every call (and every clone) of that
//! wrapper. Admission happens synchronously inside [`Throttle::call`]:
//!
//! 1. If no window has started, or `now - window_start > interval`, a fresh window starts at `now`
//!    and the call is its first admission.
//! 2. Else, if the window still has room (`admitted < limit`), the call joins it.
//! 3. Else the window advances by exactly `interval` (it is *not* re-synced to `now`) and the call is
//!    the first admission of that later window.
//!
//! The call then starts after `max(window_start - now, 0)`. Under sustained overload the window
//! start keeps stepping forward, so the backlog (and the delay handed to new callers) grows without
//! bound. Calls are never dropped, only deferred.
//!
//! Scheduled calls are spawned onto the tokio runtime at admission, so dropping the returned
//! [`ThrottledCall`] does not withdraw the execution. The operation's outcome is handed back
//! unchanged; a panic inside the operation is resumed on the awaiting caller.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use steadyhand::throttle;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let lookup = throttle(
//!     |key: &'static str| async move { Ok::<_, std::io::Error>(key.len()) },
//!     2,
//!     Duration::from_millis(100),
//! );
//! let (a, b, c) = tokio::join!(lookup.call("a"), lookup.call("bb"), lookup.call("ccc"));
//! assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (1, 2, 3));
//! # });
//! ```

use crate::{BuildError, Clock, Sleeper, TokioClock, TokioSleeper};
use pin_project::pin_project;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Default number of starts admitted per window.
pub const DEFAULT_LIMIT: usize = 10;
/// Default window length.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

/// Wrap `operation` so at most `limit` calls start per `interval`.
///
/// # Panics
///
/// Panics if `limit` is zero. Use [`ThrottleBuilder`] for a fallible constructor.
pub fn throttle<Op>(operation: Op, limit: usize, interval: Duration) -> Throttle<Op> {
    assert!(limit > 0, "throttle limit must be > 0");
    Throttle { operation: Arc::new(operation), gate: Arc::new(Gate::new(limit, interval)) }
}

/// Numeric knobs of a throttle in plain-data form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ThrottleConfig {
    pub limit: usize,
    pub interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { limit: DEFAULT_LIMIT, interval_ms: DEFAULT_INTERVAL.as_millis() as u64 }
    }
}

/// Point-in-time view of the governing window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Window start on the throttle's clock; `None` before the first call.
    pub start_ms: Option<u64>,
    /// Calls admitted to that window so far.
    pub admitted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Admission {
    ticket: u64,
    delay_ms: u64,
}

/// Mutable admission state. Only touched with the gate's lock held, never across an await.
#[derive(Debug, Default)]
struct Window {
    start: Option<u64>,
    admitted: usize,
    /// ticket -> scheduled start, for calls that have not fired yet
    pending: HashMap<u64, u64>,
    next_ticket: u64,
}

impl Window {
    fn admit(&mut self, now: u64, limit: usize, interval: u64) -> Admission {
        match self.start {
            // `saturating_sub` maps a window that starts in the future to "not elapsed"
            Some(start) if now.saturating_sub(start) <= interval => {
                if self.admitted < limit {
                    self.admitted += 1;
                } else {
                    self.start = Some(start.saturating_add(interval));
                    self.admitted = 1;
                }
            }
            _ => {
                self.start = Some(now);
                self.admitted = 1;
            }
        }

        let start = self.start.unwrap_or(now);
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.pending.insert(ticket, start.max(now));
        Admission { ticket, delay_ms: start.saturating_sub(now) }
    }

    fn fire(&mut self, ticket: u64) -> bool {
        self.pending.remove(&ticket).is_some()
    }

    fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot { start_ms: self.start, admitted: self.admitted }
    }
}

/// Admission machinery shared by [`Throttle`] and [`ThrottleService`].
#[derive(Debug)]
struct Gate {
    limit: usize,
    interval: Duration,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    window: Mutex<Window>,
}

impl Gate {
    fn new(limit: usize, interval: Duration) -> Self {
        Self::with_parts(limit, interval, Arc::new(TokioClock::default()), Arc::new(TokioSleeper))
    }

    fn with_parts(
        limit: usize,
        interval: Duration,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self { limit, interval, clock, sleeper, window: Mutex::new(Window::default()) }
    }

    fn interval_ms(&self) -> u64 {
        u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX)
    }

    // Admission never leaves the window half-updated, so a poisoned lock is safe to reuse.
    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Admission {
        let now = self.clock.now_millis();
        let mut window = self.lock();
        let admission = window.admit(now, self.limit, self.interval_ms());
        if admission.delay_ms > 0 {
            tracing::debug!(
                ticket = admission.ticket,
                delay_ms = admission.delay_ms,
                window_start = ?window.start,
                pending = window.pending.len(),
                "window full; deferring call"
            );
        } else {
            tracing::trace!(
                ticket = admission.ticket,
                admitted = window.admitted,
                limit = self.limit,
                "call admitted"
            );
        }
        admission
    }

    fn fire(&self, ticket: u64) {
        let removed = self.lock().fire(ticket);
        debug_assert!(removed, "pending entry must be removed exactly once");
        tracing::trace!(ticket, "throttled call firing");
    }

    /// Admit now; run `start()` on the runtime once the admission delay has passed.
    fn schedule<F, Fut>(self: &Arc<Self>, start: F) -> ThrottledCall<Fut::Output>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let admission = self.admit();
        let gate = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if admission.delay_ms > 0 {
                gate.sleeper.sleep(Duration::from_millis(admission.delay_ms)).await;
            }
            gate.fire(admission.ticket);
            start().await
        });
        ThrottledCall { handle }
    }

    fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    fn snapshot(&self) -> WindowSnapshot {
        self.lock().snapshot()
    }
}

/// Future for one throttled call; resolves to the operation's own output.
///
/// # Panics
///
/// Polling panics if the spawned call was cancelled by runtime shutdown, and resumes the
/// operation's own panic if it had one.
#[pin_project]
#[derive(Debug)]
pub struct ThrottledCall<T> {
    #[pin]
    handle: JoinHandle<T>,
}

impl<T> Future for ThrottledCall<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(self.project().handle.poll(cx)) {
            Ok(output) => Poll::Ready(output),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            // only reachable when the runtime shuts down under a pending call
            Err(err) => panic!("throttled call cancelled before completion: {}", err),
        }
    }
}

/// Builder for [`Throttle`] and [`ThrottleLayer`].
#[derive(Debug, Clone)]
pub struct ThrottleBuilder {
    limit: usize,
    interval: Duration,
    clock: Option<Arc<dyn Clock>>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for ThrottleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ThrottleBuilder {
    /// Builder with `DEFAULT_LIMIT`, `DEFAULT_INTERVAL` and tokio time.
    pub fn new() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            interval: DEFAULT_INTERVAL,
            clock: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Builder seeded from plain config values.
    pub fn from_config(config: ThrottleConfig) -> Self {
        Self::new().limit(config.limit).interval(Duration::from_millis(config.interval_ms))
    }

    /// Starts admitted per window. Must be > 0.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Length of one admission window.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Clock the window is measured on. Defaults to a [`TokioClock`] created at build time.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Sleeper used for deferred starts. Must agree with the clock.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    fn gate(&self) -> Result<Gate, BuildError> {
        if self.limit == 0 {
            return Err(BuildError::InvalidLimit(self.limit));
        }
        let clock = self.clock.clone().unwrap_or_else(|| Arc::new(TokioClock::default()));
        Ok(Gate::with_parts(self.limit, self.interval, clock, self.sleeper.clone()))
    }

    /// Wrap `operation`. Fails with [`BuildError::InvalidLimit`] when `limit` is zero.
    pub fn build<Op>(self, operation: Op) -> Result<Throttle<Op>, BuildError> {
        let gate = self.gate()?;
        Ok(Throttle { operation: Arc::new(operation), gate: Arc::new(gate) })
    }

    /// Validate the settings and produce a tower layer.
    pub fn into_layer(self) -> Result<ThrottleLayer, BuildError> {
        self.gate()?;
        Ok(ThrottleLayer { builder: self })
    }
}

/// An operation behind a fixed-window throttle. Clones share the window.
pub struct Throttle<Op> {
    operation: Arc<Op>,
    gate: Arc<Gate>,
}

impl<Op> Clone for Throttle<Op> {
    fn clone(&self) -> Self {
        Self { operation: self.operation.clone(), gate: self.gate.clone() }
    }
}

impl<Op> std::fmt::Debug for Throttle<Op> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("limit", &self.gate.limit)
            .field("interval", &self.gate.interval)
            .field("window", &self.gate.snapshot())
            .finish_non_exhaustive()
    }
}

impl<Op> Throttle<Op> {
    /// Admit `input` against the window and schedule the operation.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime. The returned future panics if the runtime shuts
    /// down before the call completes, and re-raises any panic from the operation.
    pub fn call<A, Fut>(&self, input: A) -> ThrottledCall<Fut::Output>
    where
        Op: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
        A: Send + 'static,
    {
        let operation = self.operation.clone();
        self.gate.schedule(move || operation(input))
    }

    /// Starts admitted per window.
    pub fn limit(&self) -> usize {
        self.gate.limit
    }

    /// Length of one admission window.
    pub fn interval(&self) -> Duration {
        self.gate.interval
    }

    /// Calls admitted but not yet started.
    pub fn pending(&self) -> usize {
        self.gate.pending()
    }

    /// Current state of the governing window.
    pub fn window(&self) -> WindowSnapshot {
        self.gate.snapshot()
    }
}

/// Tower layer putting a fixed-window throttle in front of a service.
///
/// Each service produced by `layer` gets its own window; clones of that service share it.
#[derive(Debug, Clone)]
pub struct ThrottleLayer {
    builder: ThrottleBuilder,
}

impl ThrottleLayer {
    /// Layer admitting `limit` starts per `interval`. Rejects a zero limit.
    pub fn new(limit: usize, interval: Duration) -> Result<Self, BuildError> {
        ThrottleBuilder::new().limit(limit).interval(interval).into_layer()
    }
}

impl<S> Layer<S> for ThrottleLayer {
    type Service = ThrottleService<S>;

    fn layer(&self, service: S) -> Self::Service {
        let b = &self.builder;
        let clock = b.clock.clone().unwrap_or_else(|| Arc::new(TokioClock::default()));
        let gate = Gate::with_parts(b.limit, b.interval, clock, b.sleeper.clone());
        ThrottleService { inner: service, gate: Arc::new(gate) }
    }
}

/// Throttled service produced by `ThrottleLayer`.
#[derive(Debug, Clone)]
pub struct ThrottleService<S> {
    inner: S,
    gate: Arc<Gate>,
}

impl<S> ThrottleService<S> {
    /// Requests admitted but not yet handed to the inner service.
    pub fn pending(&self) -> usize {
        self.gate.pending()
    }

    pub fn window(&self) -> WindowSnapshot {
        self.gate.snapshot()
    }
}

impl<S, Req> Service<Req> for ThrottleService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ThrottledCall<Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // admission never refuses; the inner service is driven to readiness when the call fires
        Poll::Ready(Ok(()))
    }

    /// Panics under the same conditions as [`Throttle::call`].
    fn call(&mut self, req: Req) -> Self::Future {
        let inner = self.inner.clone();
        self.gate.schedule(move || inner.oneshot(req))
    }
}
