use crate::thread::{Builder, TaskThread};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// Exports
mod tracker;
pub(crate) use tracker::Tracker;

/// Routes `tracing` events to the test harness output, filtered by `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A started TaskThread running the default dispatch loop.
#[track_caller]
pub(crate) fn start_thread(name: &str) -> TaskThread {
    let thread = Builder::new().name(name).build();
    if let Err(e) = thread.start() {
        panic!("Failed to start {name}: {e}");
    }
    thread
}

/// Polls `cond` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
