use super::handle::{Inner, ThreadHandle};
use super::{DEFAULT_DISPATCH_WARNING_MS, TaskThread};
use crate::clock::{Clock, SystemClock};
use crate::socket::{NullSocketServer, SocketServer};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn() -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    static THREAD_COUNT: AtomicUsize = AtomicUsize::new(0);

    ThreadNameFn(Arc::new(|| {
        let id = THREAD_COUNT.fetch_add(1, Ordering::Relaxed);
        format!("taskthread-{id}")
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Configures and builds a [`TaskThread`].
///
/// Building registers the thread with the [`ThreadManager`](crate::ThreadManager)
/// but attaches no OS thread: call `start()` to spawn one or
/// `wrap_current()` to adopt the calling thread.
pub struct Builder {
    thread_name: ThreadNameFn,

    socket_server: Option<Arc<dyn SocketServer>>,

    clock: Option<Arc<dyn Clock>>,

    /// Stack size of the spawned OS thread, platform default if unset.
    stack_size: Option<usize>,

    /// Dispatches taking at least this long are logged.
    dispatch_warning_ms: i64,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("thread_name", &self.thread_name)
            .field("socket_server", &self.socket_server.is_some())
            .field("clock", &self.clock)
            .field("stack_size", &self.stack_size)
            .field("dispatch_warning_ms", &self.dispatch_warning_ms)
            .finish()
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Self {
            thread_name: default_thread_name_fn(),
            socket_server: None,
            clock: None,
            stack_size: None,
            dispatch_warning_ms: DEFAULT_DISPATCH_WARNING_MS,
        }
    }

    /// Sets the thread name, also used for the spawned OS thread.
    ///
    /// The default name is "taskthread-{id}", where id is monotonically
    /// increasing.
    pub fn name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move || val.clone()));
        self
    }

    /// Sets a function used to generate the thread name.
    pub fn name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// The wait/wake primitive of the thread. Defaults to a
    /// [`NullSocketServer`].
    pub fn socket_server(mut self, ss: Arc<dyn SocketServer>) -> Self {
        self.socket_server = Some(ss);
        self
    }

    /// The clock delayed tasks and dispatch timings are measured on. Defaults
    /// to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the stack size (in bytes) of the spawned OS thread.
    ///
    /// If the platform refuses it, the thread is spawned with the default
    /// stack size instead.
    #[track_caller]
    pub fn stack_size(mut self, val: usize) -> Self {
        assert!(val.is_power_of_two(), "stack_size must be a power of two");
        self.stack_size = Some(val);
        self
    }

    #[track_caller]
    pub fn dispatch_warning_ms(mut self, val: i64) -> Self {
        assert!(val > 0, "dispatch_warning_ms must be greater than 0");
        self.dispatch_warning_ms = val;
        self
    }

    /// Creates the configured `TaskThread` and registers it with the
    /// `ThreadManager`.
    pub fn build(self) -> TaskThread {
        let thread = self.build_detached();
        thread.do_init();
        thread
    }

    // Not registered with the manager yet, see `TaskThread::do_init`.
    pub(crate) fn build_detached(self) -> TaskThread {
        let socket_server = self
            .socket_server
            .unwrap_or_else(|| Arc::new(NullSocketServer::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let inner = Inner::new(
            (self.thread_name.0)(),
            socket_server,
            clock,
            self.stack_size,
            self.dispatch_warning_ms,
        );

        TaskThread::from_handle(ThreadHandle(Arc::new(inner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[test]
    fn test_default_names_are_unique() {
        let a = Builder::new().build();
        let b = Builder::new().build();

        assert!(a.name().starts_with("taskthread-"));
        assert!(b.name().starts_with("taskthread-"));
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn test_builder_overrides() {
        let clock = Arc::new(FakeClock::new(42));
        let thread = Builder::new()
            .name("worker")
            .clock(clock)
            .dispatch_warning_ms(7)
            .build();

        assert_eq!(thread.name(), "worker");
        assert_eq!(thread.clock().now_millis(), 42);
        assert_eq!(thread.dispatch_warning_ms(), 7);
    }

    #[test]
    fn test_name_fn_is_called_per_build() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&builds);
        let thread = Builder::new()
            .name_fn(move || format!("io-{}", counter.fetch_add(1, Ordering::Relaxed)))
            .build();

        assert_eq!(thread.name(), "io-0");
        assert_eq!(builds.load(Ordering::Relaxed), 1);
    }

    #[test]
    #[should_panic(expected = "stack_size must be a power of two")]
    fn test_stack_size_must_be_power_of_two() {
        let _ = Builder::new().stack_size(3000);
    }

    #[test]
    #[should_panic(expected = "dispatch_warning_ms must be greater than 0")]
    fn test_dispatch_warning_must_be_positive() {
        let _ = Builder::new().dispatch_warning_ms(0);
    }
}
