use super::{TaskThread, ThreadHandle};

#[track_caller]
fn expect_current_thread(guard: &str) -> ThreadHandle {
    match TaskThread::current() {
        Some(thread) => thread,
        None => panic!("FATAL: {guard} requires a current TaskThread"),
    }
}

/// Forbids blocking calls from the current TaskThread until dropped, then
/// restores the previous setting.
#[must_use]
#[derive(Debug)]
pub struct ScopedDisallowBlockingCalls {
    thread: ThreadHandle,
    previous_state: bool,
}

impl ScopedDisallowBlockingCalls {
    #[track_caller]
    pub fn new() -> Self {
        let thread = expect_current_thread("ScopedDisallowBlockingCalls");
        let previous_state = thread.set_allow_blocking_calls(false);

        Self {
            thread,
            previous_state,
        }
    }
}

impl Drop for ScopedDisallowBlockingCalls {
    fn drop(&mut self) {
        debug_assert!(self.thread.is_current());
        self.thread.set_allow_blocking_calls(self.previous_state);
    }
}

/// Counts the blocking calls the current TaskThread issues while in scope and
/// reports them to a callback on drop, if there were at least
/// `set_minimum_call_count_for_callback` of them.
#[cfg(debug_assertions)]
#[must_use]
pub struct ScopedCountBlockingCalls {
    thread: ThreadHandle,
    base_blocking_call_count: u32,
    base_could_be_blocking_call_count: u32,
    min_blocking_calls_for_callback: u32,

    /// Called with `(blocking, could_be_blocking)` counts.
    result_callback: Option<Box<dyn FnOnce(u32, u32)>>,
}

#[cfg(debug_assertions)]
impl ScopedCountBlockingCalls {
    #[track_caller]
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(u32, u32) + 'static,
    {
        let thread = expect_current_thread("ScopedCountBlockingCalls");

        Self {
            base_blocking_call_count: thread.blocking_call_count(),
            base_could_be_blocking_call_count: thread.could_be_blocking_call_count(),
            thread,
            min_blocking_calls_for_callback: 0,
            result_callback: Some(Box::new(callback)),
        }
    }

    pub fn blocking_call_count(&self) -> u32 {
        self.thread
            .blocking_call_count()
            .wrapping_sub(self.base_blocking_call_count)
    }

    pub fn could_be_blocking_call_count(&self) -> u32 {
        self.thread
            .could_be_blocking_call_count()
            .wrapping_sub(self.base_could_be_blocking_call_count)
    }

    pub fn total_blocked_call_count(&self) -> u32 {
        self.blocking_call_count() + self.could_be_blocking_call_count()
    }

    pub fn set_minimum_call_count_for_callback(&mut self, minimum: u32) {
        self.min_blocking_calls_for_callback = minimum;
    }
}

#[cfg(debug_assertions)]
impl std::fmt::Debug for ScopedCountBlockingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCountBlockingCalls")
            .field("thread", &self.thread)
            .field("blocking_call_count", &self.blocking_call_count())
            .field(
                "could_be_blocking_call_count",
                &self.could_be_blocking_call_count(),
            )
            .field(
                "min_blocking_calls_for_callback",
                &self.min_blocking_calls_for_callback,
            )
            .finish_non_exhaustive()
    }
}

#[cfg(debug_assertions)]
impl Drop for ScopedCountBlockingCalls {
    fn drop(&mut self) {
        if self.total_blocked_call_count() < self.min_blocking_calls_for_callback {
            return;
        }

        if let Some(callback) = self.result_callback.take() {
            callback(
                self.blocking_call_count(),
                self.could_be_blocking_call_count(),
            );
        }
    }
}
