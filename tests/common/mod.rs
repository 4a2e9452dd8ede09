#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Route `tracing` output through the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("test error: {0}")]
pub struct TestError(pub String);

/// Records when each labelled operation started, relative to a fixed origin.
#[derive(Debug, Clone)]
pub struct StartLog {
    origin: Instant,
    starts: Arc<Mutex<Vec<(usize, Duration)>>>,
}

impl StartLog {
    pub fn new() -> Self {
        Self { origin: Instant::now(), starts: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn record(&self, label: usize) {
        self.starts.lock().unwrap().push((label, self.origin.elapsed()));
    }

    /// Start offsets in milliseconds, ordered by label.
    pub fn millis_by_label(&self) -> Vec<u128> {
        let mut starts = self.starts.lock().unwrap().clone();
        starts.sort_by_key(|(label, _)| *label);
        starts.into_iter().map(|(_, at)| at.as_millis()).collect()
    }

    /// Labels in the order they started.
    pub fn order(&self) -> Vec<usize> {
        self.starts.lock().unwrap().iter().map(|(label, _)| *label).collect()
    }
}
