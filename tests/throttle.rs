mod common;

use common::{init_tracing, StartLog, TestError};
use std::time::Duration;
use steadyhand::{throttle, ThrottleBuilder, WindowSnapshot};

fn recording(log: StartLog) -> impl Fn(usize) -> futures::future::Ready<Result<usize, TestError>> {
    move |label| {
        log.record(label);
        futures::future::ready(Ok(label))
    }
}

#[tokio::test(start_paused = true)]
async fn third_call_waits_for_next_window() {
    init_tracing();
    let log = StartLog::new();
    let limited = throttle(recording(log.clone()), 2, Duration::from_millis(100));

    let calls = vec![limited.call(1), limited.call(2), limited.call(3)];
    let results = futures::future::join_all(calls).await;

    assert_eq!(results, vec![Ok(1), Ok(2), Ok(3)]);
    assert_eq!(log.millis_by_label(), vec![0, 0, 100]);
}

#[tokio::test(start_paused = true)]
async fn late_call_starts_fresh_window_despite_backlog() {
    init_tracing();
    let log = StartLog::new();
    let limited = throttle(recording(log.clone()), 2, Duration::from_millis(100));

    let early: Vec<_> = (1..=4).map(|label| limited.call(label)).collect();
    assert_eq!(limited.window(), WindowSnapshot { start_ms: Some(100), admitted: 2 });

    tokio::time::sleep(Duration::from_millis(250)).await;
    let late = limited.call(5).await;

    assert_eq!(late, Ok(5));
    assert_eq!(limited.window(), WindowSnapshot { start_ms: Some(250), admitted: 1 });
    futures::future::join_all(early).await;
    assert_eq!(log.millis_by_label(), vec![0, 0, 100, 100, 250]);
}

#[tokio::test(start_paused = true)]
async fn sustained_overload_drifts_window_forward() {
    init_tracing();
    let log = StartLog::new();
    let limited = throttle(recording(log.clone()), 1, Duration::from_millis(10));

    let calls: Vec<_> = (0..5).map(|label| limited.call(label)).collect();
    futures::future::join_all(calls).await;

    assert_eq!(log.millis_by_label(), vec![0, 10, 20, 30, 40]);
}

#[tokio::test(start_paused = true)]
async fn same_window_calls_start_in_call_order() {
    let log = StartLog::new();
    let limited = throttle(recording(log.clone()), 10, Duration::from_millis(50));

    let calls: Vec<_> = (0..10).map(|label| limited.call(label)).collect();
    futures::future::join_all(calls).await;

    assert_eq!(log.order(), (0..10).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn failures_pass_through_unchanged() {
    let limited = throttle(
        |label: usize| async move { Err::<(), _>(TestError(format!("call {}", label))) },
        1,
        Duration::from_millis(10),
    );

    let (a, b) = tokio::join!(limited.call(1), limited.call(2));
    assert_eq!(a, Err(TestError("call 1".into())));
    assert_eq!(b, Err(TestError("call 2".into())));
}

#[tokio::test(start_paused = true)]
async fn pending_registry_drains_as_calls_fire() {
    let limited = throttle(|x: u8| async move { x }, 2, Duration::from_millis(100));

    let calls: Vec<_> = (0..5).map(|x| limited.call(x)).collect();
    assert_eq!(limited.pending(), 5);

    let outputs = futures::future::join_all(calls).await;
    assert_eq!(outputs, vec![0, 1, 2, 3, 4]);
    assert_eq!(limited.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropped_call_still_executes() {
    let log = StartLog::new();
    let limited = throttle(recording(log.clone()), 1, Duration::from_millis(20));

    drop(limited.call(1));
    drop(limited.call(2));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(log.millis_by_label(), vec![0, 20]);
    assert_eq!(limited.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn clones_share_one_window() {
    let log = StartLog::new();
    let limited = throttle(recording(log.clone()), 1, Duration::from_millis(30));
    let twin = limited.clone();

    let (a, b) = tokio::join!(limited.call(1), twin.call(2));
    assert_eq!((a, b), (Ok(1), Ok(2)));
    assert_eq!(log.millis_by_label(), vec![0, 30]);
}

#[tokio::test(start_paused = true)]
#[should_panic(expected = "operation blew up")]
async fn panics_resume_on_the_caller() {
    let limited = throttle(
        |_: ()| async move {
            panic!("operation blew up");
        },
        1,
        Duration::from_millis(10),
    );
    limited.call(()).await;
}

#[tokio::test(start_paused = true)]
async fn builder_defaults() {
    let limited = ThrottleBuilder::new().build(|x: u8| async move { x }).unwrap();
    assert_eq!(limited.limit(), 10);
    assert_eq!(limited.interval(), Duration::from_millis(50));
    assert_eq!(limited.window(), WindowSnapshot { start_ms: None, admitted: 0 });
}
