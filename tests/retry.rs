mod common;

use common::{init_tracing, TestError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use steadyhand::{retry, Failure, NonRetryableError, RetryPolicy, TrackingSleeper};
use tokio::time::Instant;

fn flaky(
    failures_before_success: usize,
    calls: Arc<AtomicUsize>,
) -> impl Fn(u32) -> futures::future::BoxFuture<'static, Result<u32, Failure<TestError>>>
       + Send
       + Sync
       + 'static {
    move |input| {
        let calls = calls.clone();
        Box::pin(async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < failures_before_success {
                Err(Failure::Transient(TestError(format!("attempt {}", n))))
            } else {
                Ok(input + 1)
            }
        })
    }
}

#[tokio::test(start_paused = true)]
async fn fails_twice_then_succeeds_on_third_attempt() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let wrapped = retry(flaky(2, calls.clone()), 3, Duration::from_millis(10));

    assert_eq!(wrapped.call(1).await, Ok(2));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn always_transient_runs_retries_plus_one_times() {
    init_tracing();
    for retries in [0usize, 1, 4] {
        let calls = Arc::new(AtomicUsize::new(0));
        let wrapped = retry(flaky(usize::MAX, calls.clone()), retries, Duration::from_millis(5));

        let err = wrapped.call(0).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), retries + 1);
        assert_eq!(err, Failure::Transient(TestError(format!("attempt {}", retries))));
    }
}

#[tokio::test(start_paused = true)]
async fn non_retryable_rejects_immediately() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let wrapped = retry(
        move |_: ()| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), Failure<TestError>>(NonRetryableError::with_message("forbidden").into())
            }
        },
        5,
        Duration::from_millis(20),
    );

    let started = Instant::now();
    let err = wrapped.call(()).await.unwrap_err();

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err, Failure::NonRetryable(NonRetryableError::with_message("forbidden")));
}

#[tokio::test]
async fn delays_grow_linearly_with_bounded_jitter() {
    init_tracing();
    let sleeper = TrackingSleeper::new();
    let wait_base = Duration::from_millis(20);
    let wrapped = RetryPolicy::builder()
        .retries(6)
        .wait_base(wait_base)
        .with_sleeper(sleeper.clone())
        .build()
        .wrap(flaky(usize::MAX, Arc::new(AtomicUsize::new(0))));

    let _ = wrapped.call(0).await;

    let delays = sleeper.calls();
    assert_eq!(delays.len(), 6);
    for (idx, delay) in delays.into_iter().enumerate() {
        let k = (idx + 1) as u32;
        assert!(delay >= wait_base * k, "attempt {} waited {:?}", k, delay);
        assert!(delay <= wait_base * k * 3 / 2, "attempt {} waited {:?}", k, delay);
    }
}

#[tokio::test(start_paused = true)]
async fn sleeps_on_the_tokio_timer_by_default() {
    let calls = Arc::new(AtomicUsize::new(0));
    let wrapped = retry(flaky(1, calls.clone()), 1, Duration::from_millis(100));

    let started = Instant::now();
    assert!(wrapped.call(0).await.is_ok());
    let waited = started.elapsed();

    assert!(waited >= Duration::from_millis(100), "waited {:?}", waited);
    assert!(waited <= Duration::from_millis(150), "waited {:?}", waited);
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_keep_separate_counters() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let wrapped = retry(
        move |label: usize| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Failure::Transient(TestError(label.to_string())))
            }
        },
        2,
        Duration::from_millis(1),
    );

    let (a, b) = tokio::join!(wrapped.call(1), wrapped.call(2));
    assert_eq!(a.unwrap_err(), Failure::Transient(TestError("1".into())));
    assert_eq!(b.unwrap_err(), Failure::Transient(TestError("2".into())));
    assert_eq!(calls.load(Ordering::SeqCst), 6, "each call gets its own 3 attempts");
}
