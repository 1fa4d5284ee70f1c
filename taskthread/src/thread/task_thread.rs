use super::handle::{Flags, ThreadHandle};
use super::{Builder, Timeout, assert_blocking_is_allowed_on_current_thread};
use crate::errors::{Result, ThreadError};
use crate::manager::ThreadManager;
use crate::socket::SocketServer;
use crate::task_queue::CurrentTaskQueueSetter;
use crate::utils::ScopeGuard;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::ops::Deref;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

type RunFn = Box<dyn FnOnce(&ThreadHandle) + Send + 'static>;

/// A serial task queue bound to at most one OS thread.
///
/// `TaskThread` owns the lifecycle: it spawns or adopts the OS thread, joins
/// it, and deregisters from the [`ThreadManager`] on drop. Everything that
/// other threads need is on the [`ThreadHandle`] it derefs to.
///
/// Dropping a `TaskThread` stops it (quit + join) and then drains both of its
/// queues, running no further tasks.
pub struct TaskThread {
    handle: ThreadHandle,
}

impl fmt::Debug for TaskThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.handle.0.lifecycle.lock();
        f.debug_struct("TaskThread")
            .field("id", &self.handle.id())
            .field("name", &*self.handle.0.name.lock())
            .field("flags", &lifecycle.flags)
            .field("os_thread", &lifecycle.os_thread)
            .finish()
    }
}

impl Deref for TaskThread {
    type Target = ThreadHandle;

    fn deref(&self) -> &ThreadHandle {
        &self.handle
    }
}

impl Default for TaskThread {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskThread {
    /// A registered, not yet started thread with a [`NullSocketServer`](crate::NullSocketServer).
    pub fn new() -> Self {
        Builder::new().build()
    }

    pub fn with_socket_server(ss: Arc<dyn SocketServer>) -> Self {
        Builder::new().socket_server(ss).build()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn from_handle(handle: ThreadHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &ThreadHandle {
        &self.handle
    }

    /// The current TaskThread of the calling OS thread.
    pub fn current() -> Option<ThreadHandle> {
        ThreadManager::instance().current_thread()
    }

    /// Registers with the manager and hands the socket server its queue.
    pub(crate) fn do_init(&self) {
        {
            let mut lifecycle = self.handle.0.lifecycle.lock();
            if lifecycle.flags.contains(Flags::INITIALIZED) {
                return;
            }
            lifecycle.flags.insert(Flags::INITIALIZED);
        }

        self.handle
            .socket_server()
            .set_message_queue(Some(&self.handle));
        ThreadManager::instance().add(&self.handle);
    }

    /// Deregisters from the manager and drops every queued task without
    /// running it. Idempotent.
    pub(crate) fn destroy(&self) {
        {
            let mut lifecycle = self.handle.0.lifecycle.lock();
            if lifecycle.flags.contains(Flags::DESTROYED) {
                return;
            }
            lifecycle.flags.insert(Flags::DESTROYED);
        }

        self.handle.socket_server().set_message_queue(None);
        ThreadManager::instance().remove(&self.handle);

        // Task destructors may look up the current task queue.
        let _current = CurrentTaskQueueSetter::new(self.handle.as_task_queue());
        let queues = self.handle.0.take_queues();
        drop(queues);

        tracing::trace!(thread = %self.handle.name(), "TaskThread destroyed");
    }

    /// Renames the thread. Fails once an OS thread is attached.
    pub fn set_name(&self, name: impl Into<String>) -> bool {
        if self.is_running() {
            return false;
        }

        *self.handle.0.name.lock() = name.into();
        true
    }

    /// Spawns an OS thread running `process_messages(Timeout::Forever)`.
    pub fn start(&self) -> Result<()> {
        self.start_with(|thread| {
            thread.process_messages(Timeout::Forever);
        })
    }

    /// Spawns an OS thread running `run` with this thread installed as
    /// current. `run` must keep calling `process_messages` for posted tasks
    /// to execute.
    pub fn start_with<F>(&self, run: F) -> Result<()>
    where
        F: FnOnce(&ThreadHandle) + Send + 'static,
    {
        let mut lifecycle = self.handle.0.lifecycle.lock();
        if lifecycle.flags.contains(Flags::RUNNING) {
            return Err(ThreadError::AlreadyRunning);
        }

        self.restart();

        // The body is shared so a failed spawn can be retried with it.
        let body: Arc<Mutex<Option<RunFn>>> = Arc::new(Mutex::new(Some(Box::new(run))));
        let name = self.handle.name();

        let spawn = |stack_size: Option<usize>| -> io::Result<thread::JoinHandle<()>> {
            let mut builder = thread::Builder::new().name(name.clone());
            if let Some(stack_size) = stack_size {
                builder = builder.stack_size(stack_size);
            }

            let handle = self.handle.clone();
            let body = Arc::clone(&body);
            builder.spawn(move || run_thread(handle, body))
        };

        lifecycle.flags.insert(Flags::OWNED);

        let spawned = match spawn(self.handle.0.stack_size) {
            Err(err) if self.handle.0.stack_size.is_some() => {
                tracing::warn!(
                    thread = %name,
                    error = %err,
                    "Unable to spawn with the configured stack size, retrying with the default"
                );
                spawn(None)
            }
            other => other,
        };

        match spawned {
            Ok(join) => {
                lifecycle.os_thread = Some(join.thread().id());
                lifecycle.join = Some(join);
                lifecycle.flags.insert(Flags::RUNNING);
                tracing::debug!(thread = %name, "TaskThread started");
                Ok(())
            }
            Err(err) => {
                lifecycle.flags.remove(Flags::OWNED);
                tracing::error!(thread = %name, error = %err, "Unable to spawn TaskThread");
                Err(ThreadError::Spawn(err))
            }
        }
    }

    /// `quit()` followed by `join()`.
    pub fn stop(&self) {
        self.quit();
        self.join();
    }

    /// Waits for a spawned OS thread to exit. Wrapped threads are never joined.
    ///
    /// Must not be called from the thread itself.
    pub fn join(&self) {
        let join = {
            let mut lifecycle = self.handle.0.lifecycle.lock();
            if !lifecycle.flags.contains(Flags::RUNNING | Flags::OWNED) {
                return;
            }
            lifecycle.join.take()
        };

        debug_assert!(
            !self.is_current(),
            "FATAL: TaskThread {} cannot join itself",
            self.name()
        );

        if let Some(current) = TaskThread::current() {
            if !current.blocking_calls_allowed() {
                tracing::warn!(
                    thread = %self.name(),
                    current = %current.name(),
                    "Waiting for the thread to join, but blocking calls have been disallowed"
                );
            }
        }

        if let Some(join) = join {
            if join.join().is_err() {
                tracing::error!(thread = %self.name(), "TaskThread panicked");
            }
        }

        let mut lifecycle = self.handle.0.lifecycle.lock();
        lifecycle.flags.remove(Flags::RUNNING);
        lifecycle.os_thread = None;
    }

    /// Adopts the calling OS thread: it becomes this thread's current
    /// TaskThread, and posted tasks run whenever it calls `process_messages`.
    ///
    /// A TaskThread that was already current is set aside and reinstated by
    /// [`unwrap_current`](Self::unwrap_current). Nested wraps must be undone
    /// in reverse order.
    pub fn wrap_current(&self) -> Result<()> {
        let manager = ThreadManager::instance();
        let previous = manager.current_thread();

        {
            let mut lifecycle = self.handle.0.lifecycle.lock();
            if lifecycle.flags.contains(Flags::RUNNING) {
                return Err(ThreadError::AlreadyRunning);
            }
            lifecycle.flags.remove(Flags::OWNED);
            lifecycle.flags.insert(Flags::RUNNING);
            lifecycle.os_thread = Some(thread::current().id());
            lifecycle.wrapped_over = previous.clone();
        }

        if previous.is_some() {
            manager.set_current_thread(None);
        }
        manager.set_current_thread(Some(self.handle.clone()));
        Ok(())
    }

    /// [`wrap_current`](Self::wrap_current) reporting failure as `false`.
    pub fn safe_wrap_current(&self) -> bool {
        self.wrap_current().is_ok()
    }

    /// Detaches a wrapped thread from the calling OS thread, reinstating the
    /// TaskThread it was wrapped over, if any.
    pub fn unwrap_current(&self) {
        self.handle.detach();
    }

    pub fn running_for_test(&self) -> bool {
        self.is_running()
    }

    /// Sleeps the calling OS thread. Blocking must be allowed on the current
    /// TaskThread.
    #[track_caller]
    pub fn sleep_ms(ms: u64) -> bool {
        assert_blocking_is_allowed_on_current_thread();
        thread::sleep(Duration::from_millis(ms));
        true
    }

    /// Forbids blocking calls from this thread for the rest of its life.
    pub fn disallow_blocking_calls(&self) {
        self.set_allow_blocking_calls(false);
    }
}

impl Drop for TaskThread {
    fn drop(&mut self) {
        if self.is_current() && !self.is_owned() && self.is_running() {
            self.unwrap_current();
        }

        self.stop();
        self.destroy();
    }
}

fn run_thread(handle: ThreadHandle, body: Arc<Mutex<Option<RunFn>>>) {
    let manager = ThreadManager::instance();
    manager.set_current_thread(Some(handle.clone()));

    // Also runs when the body panics, so the TLS never outlives the loop.
    let _clear = ScopeGuard::new(|| manager.set_current_thread(None));

    let run = body.lock().take();
    if let Some(run) = run {
        run(&handle);
    }

    tracing::debug!(thread = %handle.name(), "TaskThread exiting");
}
