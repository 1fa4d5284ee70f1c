use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// How long a forever-wait may block before we log that the thread is probably
/// deadlocked.
pub const DEFAULT_WARN_AFTER: Duration = Duration::from_secs(3);

/// A signalable event, either auto-reset (the default: exactly one waiter
/// consumes each `set`) or manual-reset (stays signaled until `reset`).
///
/// Durations are `Option<Duration>` where `None` means "forever".
#[derive(Debug)]
pub struct Event {
    manual_reset: bool,
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    /// Auto-reset event, initially not signaled.
    pub fn new() -> Self {
        Self::with_mode(false, false)
    }

    pub fn with_mode(manual_reset: bool, initially_signaled: bool) -> Self {
        Self {
            manual_reset,
            signaled: Mutex::new(initially_signaled),
            cond: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    /// Waits until signaled or until `give_up_after` elapses. Forever-waits log a
    /// warning after [`DEFAULT_WARN_AFTER`].
    ///
    /// Returns `true` if the event was signaled.
    pub fn wait(&self, give_up_after: Option<Duration>) -> bool {
        let warn_after = match give_up_after {
            None => Some(DEFAULT_WARN_AFTER),
            Some(_) => None,
        };
        self.wait_with_warning(give_up_after, warn_after)
    }

    /// Waits until signaled, logging a warning once `warn_after` has passed and
    /// giving up after `give_up_after`. No warning is logged when
    /// `warn_after >= give_up_after`.
    pub fn wait_with_warning(
        &self,
        give_up_after: Option<Duration>,
        warn_after: Option<Duration>,
    ) -> bool {
        let start = Instant::now();

        let warn_after = match (warn_after, give_up_after) {
            (Some(warn), Some(give_up)) if warn >= give_up => None,
            (warn, _) => warn,
        };

        // Overflowing `Instant` arithmetic degrades to "forever".
        let give_up_at = give_up_after.and_then(|d| start.checked_add(d));
        let mut warn_at = warn_after.and_then(|d| start.checked_add(d));

        let mut signaled = self.signaled.lock();

        while !*signaled {
            let deadline = match (warn_at, give_up_at) {
                (Some(w), Some(g)) => Some(w.min(g)),
                (w, g) => w.or(g),
            };

            let Some(deadline) = deadline else {
                self.cond.wait(&mut signaled);
                continue;
            };

            if !self.cond.wait_until(&mut signaled, deadline).timed_out() || *signaled {
                continue;
            }

            let now = Instant::now();
            if give_up_at.is_some_and(|g| now >= g) {
                return false;
            }

            if warn_at.is_some_and(|w| now >= w) {
                warn_at = None;
                tracing::warn!(
                    waited_ms = now.duration_since(start).as_millis() as u64,
                    "Event wait is taking long, the current thread is probably deadlocked"
                );
            }
        }

        if !self.manual_reset {
            *signaled = false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::sync::Arc;
    use std::thread;

    assert_impl_all!(Event: Send, Sync);

    #[test]
    fn test_auto_reset_event_is_consumed_by_wait() {
        let event = Event::new();
        event.set();

        assert!(event.wait(Some(Duration::ZERO)));
        assert!(!event.is_set());
        assert!(!event.wait(Some(Duration::from_millis(5))));
    }

    #[test]
    fn test_manual_reset_event_stays_signaled() {
        let event = Event::with_mode(true, true);

        assert!(event.wait(Some(Duration::ZERO)));
        assert!(event.wait(Some(Duration::ZERO)));

        event.reset();
        assert!(!event.wait(Some(Duration::from_millis(1))));
    }

    #[test]
    fn test_wait_gives_up_after_timeout() {
        let event = Event::new();
        let start = Instant::now();

        assert!(!event.wait(Some(Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_set_from_other_thread_wakes_forever_wait() {
        let event = Arc::new(Event::new());
        let setter = {
            let event = Arc::clone(&event);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                event.set();
            })
        };

        assert!(event.wait(None));
        assert!(setter.join().is_ok());
    }

    #[test]
    fn test_wait_survives_warning_deadline() {
        let event = Arc::new(Event::new());
        let setter = {
            let event = Arc::clone(&event);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                event.set();
            })
        };

        assert!(event.wait_with_warning(None, Some(Duration::from_millis(1))));
        assert!(setter.join().is_ok());
    }
}
