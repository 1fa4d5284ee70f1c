//! The "current task queue" of an OS thread.
//!
//! A `TaskThread` installs itself here while it is the current thread of an OS
//! thread, so code that only knows about [`TaskQueue`] can post back to
//! whatever queue is running it.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

/// A unit of work: an owned, move-only nullary closure, consumed exactly once.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Anything that accepts posted tasks and runs them later, serially.
pub trait TaskQueue: Send + Sync {
    /// Best-effort: the task may be dropped without running if the queue is
    /// shutting down.
    fn post_task(&self, task: Task);

    /// Runs `task` no earlier than `delay` from now.
    fn post_delayed_task(&self, task: Task, delay: Duration);
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<dyn TaskQueue>>> = const { RefCell::new(None) };
}

/// Returns the task queue currently running on this OS thread, if any.
pub fn current() -> Option<Arc<dyn TaskQueue>> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Whether `queue` is the current task queue of the calling OS thread.
pub fn is_current(queue: &dyn TaskQueue) -> bool {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|cur| std::ptr::addr_eq(Arc::as_ptr(cur), queue as *const dyn TaskQueue))
    })
}

/// Installs a task queue as current for the lifetime of the guard, restoring
/// the previous one on drop.
#[must_use]
pub struct CurrentTaskQueueSetter {
    previous: Option<Arc<dyn TaskQueue>>,
}

impl CurrentTaskQueueSetter {
    pub fn new(queue: Arc<dyn TaskQueue>) -> Self {
        // Threads wrapped by the manager are torn down from TLS destructors,
        // where the slot may already be gone.
        let previous = CURRENT
            .try_with(|current| current.replace(Some(queue)))
            .ok()
            .flatten();
        Self { previous }
    }
}

impl Drop for CurrentTaskQueueSetter {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = CURRENT.try_with(|current| current.replace(previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct VecQueue {
        tasks: Mutex<Vec<Task>>,
    }

    impl TaskQueue for VecQueue {
        fn post_task(&self, task: Task) {
            self.tasks.lock().push(task);
        }

        fn post_delayed_task(&self, task: Task, _delay: Duration) {
            self.post_task(task);
        }
    }

    #[test]
    fn test_setter_installs_and_restores() {
        let outer: Arc<dyn TaskQueue> = Arc::new(VecQueue::default());
        let inner: Arc<dyn TaskQueue> = Arc::new(VecQueue::default());

        assert!(current().is_none());
        {
            let _outer = CurrentTaskQueueSetter::new(Arc::clone(&outer));
            assert!(is_current(outer.as_ref()));

            {
                let _inner = CurrentTaskQueueSetter::new(Arc::clone(&inner));
                assert!(is_current(inner.as_ref()));
                assert!(!is_current(outer.as_ref()));
            }

            assert!(is_current(outer.as_ref()));
        }
        assert!(current().is_none());
    }

    #[test]
    fn test_current_is_thread_local() {
        let queue: Arc<dyn TaskQueue> = Arc::new(VecQueue::default());
        let _guard = CurrentTaskQueueSetter::new(Arc::clone(&queue));

        let seen_elsewhere = std::thread::spawn(|| current().is_some()).join();
        assert!(matches!(seen_elsewhere, Ok(false)));
        assert!(current().is_some());
    }
}
