//! Millisecond clocks used to schedule delayed tasks and time dispatches.
//!
//! Every `TaskThread` reads time through its own [`Clock`], so tests can pin
//! delayed-task readiness with a [`FakeClock`] instead of racing the wall clock.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Source of monotonic milliseconds.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_millis(&self) -> i64;
}

/// Monotonic milliseconds elapsed since the first time any `SystemClock` was
/// read in this process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        let elapsed = EPOCH.get_or_init(Instant::now).elapsed();
        i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
    }
}

/// A clock that only moves when told to.
///
/// Waiting threads are not woken when the clock advances; pair it with
/// `process_messages(0)` on a wrapped thread, or post a task to wake the target.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: AtomicI64,
}

impl FakeClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, delta: Duration) {
        self.now.fetch_add(round_up_millis(delta), Ordering::AcqRel);
    }

    pub fn set_millis(&self, now: i64) {
        self.now.store(now, Ordering::Release);
    }
}

impl Clock for FakeClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }
}

/// Rounds `d` up to the next whole millisecond, saturating at `i64::MAX`.
pub(crate) fn round_up_millis(d: Duration) -> i64 {
    let millis = d.as_nanos().div_ceil(1_000_000);
    i64::try_from(millis).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(Duration::ZERO, 0)]
    #[case::sub_milli(Duration::from_micros(1), 1)]
    #[case::exact(Duration::from_millis(7), 7)]
    #[case::just_over(Duration::from_micros(7_001), 8)]
    #[case::saturates(Duration::MAX, i64::MAX)]
    fn test_round_up_millis(#[case] input: Duration, #[case] expected: i64) {
        assert_eq!(round_up_millis(input), expected);
    }

    #[test]
    fn test_fake_clock_only_moves_when_advanced() {
        let clock = FakeClock::new(100);
        assert_eq!(clock.now_millis(), 100);
        assert_eq!(clock.now_millis(), 100);

        clock.advance(Duration::from_millis(5));
        assert_eq!(clock.now_millis(), 105);

        clock.set_millis(3);
        assert_eq!(clock.now_millis(), 3);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now_millis();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now_millis();
        assert!(b >= a + 1, "expected {b} to be after {a}");
    }
}
