use super::queue::{DelayedTask, TaskQueues};
use super::{ThreadId, Timeout, millis_to_duration};
use crate::clock::{Clock, round_up_millis};
use crate::errors::ThreadError;
use crate::event::Event;
use crate::manager::ThreadManager;
use crate::socket::SocketServer;
use crate::task_queue::{Task, TaskQueue};
use crate::utils::ScopeGuard;
use bitflags::bitflags;
use parking_lot::Mutex;
#[cfg(debug_assertions)]
use smallvec::SmallVec;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

bitflags! {
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub(crate) struct Flags: u8 {
        /// Registered with the `ThreadManager`.
        const INITIALIZED = 1;

        /// Deregistered and drained, terminal.
        const DESTROYED = 1 << 1;

        /// An OS thread is attached, either spawned or wrapped.
        const RUNNING = 1 << 2;

        /// The OS thread was spawned by `start()` and must be joined.
        const OWNED = 1 << 3;
    }
}

#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    pub(crate) flags: Flags,
    pub(crate) join: Option<JoinHandle<()>>,
    pub(crate) os_thread: Option<std::thread::ThreadId>,

    /// Current thread displaced by `wrap_current`, reinstated on detach.
    pub(crate) wrapped_over: Option<ThreadHandle>,
}

// Only the owning thread mutates this, directly or through posted tasks. The
// mutex keeps the handle `Sync`.
#[derive(Debug)]
pub(crate) struct LocalState {
    blocking_calls_allowed: bool,

    #[cfg(debug_assertions)]
    blocking_call_count: u32,

    #[cfg(debug_assertions)]
    could_be_blocking_call_count: u32,

    #[cfg(debug_assertions)]
    invoke_policy_enabled: bool,

    #[cfg(debug_assertions)]
    allowed_threads: SmallVec<[ThreadId; 4]>,
}

impl LocalState {
    fn new() -> Self {
        Self {
            blocking_calls_allowed: true,
            #[cfg(debug_assertions)]
            blocking_call_count: 0,
            #[cfg(debug_assertions)]
            could_be_blocking_call_count: 0,
            #[cfg(debug_assertions)]
            invoke_policy_enabled: false,
            #[cfg(debug_assertions)]
            allowed_threads: SmallVec::new(),
        }
    }
}

pub(crate) struct Inner {
    pub(crate) id: ThreadId,

    pub(crate) name: Mutex<String>,

    /// The only state shared with posting threads.
    queues: Mutex<TaskQueues>,

    quitting: AtomicBool,

    socket_server: Arc<dyn SocketServer>,

    clock: Arc<dyn Clock>,

    dispatch_warning_ms: AtomicI64,

    pub(crate) lifecycle: Mutex<Lifecycle>,

    local: Mutex<LocalState>,

    pub(crate) stack_size: Option<usize>,
}

impl Inner {
    pub(crate) fn new(
        name: String,
        socket_server: Arc<dyn SocketServer>,
        clock: Arc<dyn Clock>,
        stack_size: Option<usize>,
        dispatch_warning_ms: i64,
    ) -> Self {
        Self {
            id: ThreadId::next(),
            name: Mutex::new(name),
            queues: Mutex::new(TaskQueues::new()),
            quitting: AtomicBool::new(false),
            socket_server,
            clock,
            dispatch_warning_ms: AtomicI64::new(dispatch_warning_ms),
            lifecycle: Mutex::new(Lifecycle::default()),
            local: Mutex::new(LocalState::new()),
            stack_size,
        }
    }

    fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::Acquire)
    }

    fn post(&self, task: Task) {
        // Dropping the task here is the contract while quitting.
        if self.is_quitting() {
            return;
        }

        self.queues.lock().push(task);
        self.socket_server.wake_up();
    }

    fn post_delayed(&self, task: Task, delay: Duration) {
        if self.is_quitting() {
            return;
        }

        let delay_ms = round_up_millis(delay);
        let now_ms = self.clock.now_millis();
        self.queues.lock().push_delayed(task, delay_ms, now_ms);
        self.socket_server.wake_up();
    }

    /// Empties both queues. The tasks are returned so they are dropped
    /// without holding the queue lock.
    pub(crate) fn take_queues(&self) -> (VecDeque<Task>, BinaryHeap<DelayedTask>) {
        self.queues.lock().take_all()
    }
}

impl TaskQueue for Inner {
    fn post_task(&self, task: Task) {
        self.post(task);
    }

    fn post_delayed_task(&self, task: Task, delay: Duration) {
        self.post_delayed(task, delay);
    }
}

/// A cheap, cloneable reference to a TaskThread.
///
/// Everything that may be called from any thread lives here: posting,
/// blocking calls, quitting and introspection. The dispatch loop (`get`,
/// `dispatch`, `process_messages`) must only be driven by the OS thread the
/// TaskThread runs on.
#[derive(Clone)]
pub struct ThreadHandle(pub(crate) Arc<Inner>);

impl fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("id", &self.0.id)
            .field("name", &*self.0.name.lock())
            .finish_non_exhaustive()
    }
}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for ThreadHandle {}

impl ThreadHandle {
    pub fn id(&self) -> ThreadId {
        self.0.id
    }

    pub fn name(&self) -> String {
        self.0.name.lock().clone()
    }

    pub fn socket_server(&self) -> &Arc<dyn SocketServer> {
        &self.0.socket_server
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.0.clock
    }

    /// This thread as a type-erased [`TaskQueue`].
    pub fn as_task_queue(&self) -> Arc<dyn TaskQueue> {
        self.0.clone()
    }

    /// Queues `f` to run on this thread after every task posted before it.
    ///
    /// Silently dropped if the thread is quitting.
    pub fn post_task<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.0.post(Box::new(f));
    }

    /// Queues `f` to run no earlier than `delay` from now, rounded up to the
    /// next millisecond. Tasks with identical run times keep their posting
    /// order.
    pub fn post_delayed_task<F>(&self, f: F, delay: Duration)
    where
        F: FnOnce() + Send + 'static,
    {
        self.0.post_delayed(Box::new(f), delay);
    }

    /// Asks the dispatch loop to return. Ready tasks are still handed out,
    /// new posts are dropped.
    pub fn quit(&self) {
        self.0.quitting.store(true, Ordering::Release);
        self.0.socket_server.wake_up();
    }

    pub fn is_quitting(&self) -> bool {
        self.0.is_quitting()
    }

    /// Clears the quitting flag so the loop can be entered again.
    pub fn restart(&self) {
        self.0.quitting.store(false, Ordering::Release);
    }

    pub fn wake_up(&self) {
        self.0.socket_server.wake_up();
    }

    /// Whether this is the current TaskThread of the calling OS thread.
    pub fn is_current(&self) -> bool {
        ThreadManager::instance().is_current_thread(self.0.id)
    }

    /// Number of queued tasks, immediate and delayed.
    pub fn size(&self) -> usize {
        self.0.queues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Time until the next task can be retrieved. Zero when immediate work is
    /// pending, `None` when nothing is queued.
    pub fn delay(&self) -> Option<Duration> {
        let now_ms = self.0.clock.now_millis();
        self.0.queues.lock().delay(now_ms).map(millis_to_duration)
    }

    pub fn is_owned(&self) -> bool {
        self.0.lifecycle.lock().flags.contains(Flags::OWNED)
    }

    /// Whether an OS thread is attached, spawned or wrapped.
    pub fn is_running(&self) -> bool {
        self.0.lifecycle.lock().flags.contains(Flags::RUNNING)
    }

    /// Marks this thread as no longer attached. If it is the calling OS
    /// thread's current TaskThread, whatever it was wrapped over becomes
    /// current again.
    pub(crate) fn detach(&self) {
        let previous = {
            let mut lifecycle = self.0.lifecycle.lock();
            lifecycle.flags.remove(Flags::RUNNING);
            lifecycle.os_thread = None;
            lifecycle.wrapped_over.take()
        };

        if self.is_current() {
            let manager = ThreadManager::instance();
            manager.set_current_thread(None);
            manager.set_current_thread(previous);
        }
    }

    /// Whether a task posted now would eventually be run by someone.
    pub fn is_processing_messages_for_testing(&self) -> bool {
        (self.is_owned() || self.is_current()) && !self.is_quitting()
    }

    /// Retrieves the next ready task, waiting on the socket server for at most
    /// `timeout`.
    ///
    /// Ready delayed tasks are appended to the FIFO before its front is
    /// popped. Returns `None` when the timeout elapses, when the thread is
    /// quitting and no ready task is left, or when the socket server fails.
    pub fn get(&self, timeout: Timeout) -> Option<Task> {
        let clock = &self.0.clock;
        let start_ms = clock.now_millis();
        let mut remaining = timeout;

        loop {
            let next_delay = {
                let mut queues = self.0.queues.lock();
                let next_delay = queues.promote_ready(clock.now_millis());

                if let Some(task) = queues.pop_front() {
                    return Some(task);
                }

                next_delay
            };

            if self.is_quitting() {
                return None;
            }

            let wait_ms = match (remaining, next_delay) {
                (Timeout::Forever, next) => next,
                (Timeout::Millis(left), None) => Some(left),
                (Timeout::Millis(left), Some(next)) => Some(left.min(next)),
            };

            if !self
                .0
                .socket_server
                .wait(wait_ms.map(millis_to_duration), true)
            {
                return None;
            }

            if let Timeout::Millis(total) = timeout {
                let elapsed = clock.now_millis() - start_ms;
                if elapsed >= total {
                    return None;
                }
                remaining = Timeout::Millis(total - elapsed);
            }
        }
    }

    /// Runs `task` inline, logging it when it takes at least the dispatch
    /// warning threshold. The threshold then ratchets past the observed
    /// duration so a steady stream of slow tasks is reported once.
    pub fn dispatch(&self, task: Task) {
        let clock = &self.0.clock;
        let start_ms = clock.now_millis();

        task();

        let took_ms = clock.now_millis() - start_ms;
        let threshold = self.0.dispatch_warning_ms.load(Ordering::Relaxed);
        if took_ms >= threshold {
            tracing::info!(
                thread = %self.name(),
                took_ms,
                threshold_ms = threshold,
                "Slow task dispatch"
            );
            self.0.dispatch_warning_ms.store(took_ms + 1, Ordering::Relaxed);
        }
    }

    /// Runs the dispatch loop for `timeout`.
    ///
    /// Returns `true` once the timeout elapsed, otherwise `!is_quitting()` as
    /// soon as `get` comes back empty. With `Timeout::ZERO` this drains every
    /// ready task and returns.
    ///
    /// With a [`FakeClock`](crate::FakeClock), only `Timeout::ZERO` and
    /// `Timeout::Forever` are meaningful, the fake time never runs out on its
    /// own.
    pub fn process_messages(&self, timeout: Timeout) -> bool {
        let clock = &self.0.clock;
        let end_ms = match timeout {
            Timeout::Forever => None,
            Timeout::Millis(ms) => Some(clock.now_millis().saturating_add(ms)),
        };
        let mut next = timeout;

        loop {
            let Some(task) = self.get(next) else {
                return !self.is_quitting();
            };

            self.dispatch(task);

            if let Some(end_ms) = end_ms {
                let left = end_ms - clock.now_millis();
                if left < 0 {
                    return true;
                }
                next = Timeout::Millis(left);
            }
        }
    }

    pub fn dispatch_warning_ms(&self) -> i64 {
        self.0.dispatch_warning_ms.load(Ordering::Relaxed)
    }

    /// Sets the slow-dispatch threshold. Off-thread callers post the change so
    /// it applies after the tasks already queued.
    #[track_caller]
    pub fn set_dispatch_warning_ms(&self, deadline_ms: i64) {
        assert!(deadline_ms > 0, "dispatch_warning_ms must be greater than 0");

        if !self.is_current() {
            let this = self.clone();
            self.post_task(move || this.set_dispatch_warning_ms(deadline_ms));
            return;
        }

        self.0
            .dispatch_warning_ms
            .store(deadline_ms, Ordering::Relaxed);
    }

    /// Runs `f` on this thread and returns its result, blocking the caller
    /// until it has run.
    ///
    /// Runs inline when called from this thread. A panic inside `f` is
    /// resumed on the caller.
    ///
    /// # Panics
    ///
    /// If the thread is quitting, or quits before running `f`. Use
    /// [`try_blocking_call`](Self::try_blocking_call) to observe that instead.
    /// Debug builds also panic when the call would deadlock against another
    /// blocking call in flight, when blocking calls are disallowed on the
    /// calling thread, or when its invoke policy forbids this target.
    #[track_caller]
    pub fn blocking_call<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        match self.try_blocking_call(f) {
            Some(result) => result,
            None => panic!("{}", ThreadError::Quitting(self.0.id)),
        }
    }

    /// Like [`blocking_call`](Self::blocking_call), but returns `None` without
    /// running `f` when this thread is quitting.
    #[track_caller]
    pub fn try_blocking_call<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_quitting() {
            return None;
        }

        if self.is_current() {
            debug_assert!(
                self.is_invoke_to_thread_allowed(self),
                "FATAL: TaskThread {} is not allowed to invoke itself",
                self.name()
            );

            #[cfg(debug_assertions)]
            {
                let mut local = self.0.local.lock();
                local.could_be_blocking_call_count =
                    local.could_be_blocking_call_count.wrapping_add(1);
            }

            return Some(f());
        }

        #[cfg(debug_assertions)]
        self.check_blocking_call_from_current();

        let done = Arc::new(Event::new());
        let slot = Arc::new(Mutex::new(None));

        let signal = {
            let done = Arc::clone(&done);
            ScopeGuard::new(move || done.set())
        };
        let result = Arc::clone(&slot);

        // The guard fires whether the wrapper runs or is dropped unrun.
        self.post_task(move || {
            let _signal = signal;
            *result.lock() = Some(panic::catch_unwind(AssertUnwindSafe(f)));
        });

        done.wait(None);

        let outcome = slot.lock().take();
        match outcome {
            Some(Ok(value)) => Some(value),
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => None,
        }
    }

    #[cfg(debug_assertions)]
    #[track_caller]
    fn check_blocking_call_from_current(&self) {
        let manager = ThreadManager::instance();
        let Some(current) = manager.current_thread() else {
            return;
        };

        assert!(
            current.blocking_calls_allowed(),
            "FATAL: blocking call from TaskThread {} while blocking calls are disallowed",
            current.name()
        );

        {
            let mut local = current.0.local.lock();
            local.blocking_call_count = local.blocking_call_count.wrapping_add(1);
        }

        assert!(
            current.is_invoke_to_thread_allowed(self),
            "FATAL: TaskThread {} is not allowed to invoke TaskThread {}",
            current.name(),
            self.name()
        );

        if let Err(err) = manager.register_send_and_check_for_cycles(&current, self) {
            panic!("{err}");
        }
    }

    /// Adds `thread` to the invoke allow list and turns the policy on. Posted
    /// to this thread when called from elsewhere.
    #[cfg(debug_assertions)]
    pub fn allow_invokes_to_thread(&self, thread: &ThreadHandle) {
        let target = thread.id();
        if !self.is_current() {
            let this = self.clone();
            self.post_task(move || this.allow_invokes_to(target));
            return;
        }
        self.allow_invokes_to(target);
    }

    #[cfg(not(debug_assertions))]
    pub fn allow_invokes_to_thread(&self, _thread: &ThreadHandle) {}

    #[cfg(debug_assertions)]
    fn allow_invokes_to(&self, target: ThreadId) {
        let mut local = self.0.local.lock();
        local.allowed_threads.push(target);
        local.invoke_policy_enabled = true;
    }

    /// Turns the invoke policy on with an empty allow list. Posted to this
    /// thread when called from elsewhere.
    #[cfg(debug_assertions)]
    pub fn disallow_all_invokes(&self) {
        if !self.is_current() {
            let this = self.clone();
            self.post_task(move || this.disallow_all_invokes());
            return;
        }
        self.0.local.lock().invoke_policy_enabled = true;
    }

    #[cfg(not(debug_assertions))]
    pub fn disallow_all_invokes(&self) {}

    /// `true` until the first policy call, then only for allow-listed
    /// targets.
    #[cfg(debug_assertions)]
    pub fn is_invoke_to_thread_allowed(&self, target: &ThreadHandle) -> bool {
        let local = self.0.local.lock();
        !local.invoke_policy_enabled || local.allowed_threads.contains(&target.id())
    }

    /// Invoke policies are only enforced in debug builds.
    #[cfg(not(debug_assertions))]
    pub fn is_invoke_to_thread_allowed(&self, _target: &ThreadHandle) -> bool {
        true
    }

    pub fn blocking_calls_allowed(&self) -> bool {
        self.0.local.lock().blocking_calls_allowed
    }

    /// Returns the previous value.
    pub(crate) fn set_allow_blocking_calls(&self, allow: bool) -> bool {
        debug_assert!(self.is_current());
        std::mem::replace(&mut self.0.local.lock().blocking_calls_allowed, allow)
    }

    /// Cross-thread blocking calls issued from this thread.
    #[cfg(debug_assertions)]
    pub fn blocking_call_count(&self) -> u32 {
        self.0.local.lock().blocking_call_count
    }

    /// Blocking calls issued from this thread to itself, which ran inline but
    /// would have blocked from anywhere else.
    #[cfg(debug_assertions)]
    pub fn could_be_blocking_call_count(&self) -> u32 {
        self.0.local.lock().could_be_blocking_call_count
    }
}

/// Panics when the current TaskThread disallows blocking.
#[cfg(debug_assertions)]
#[track_caller]
pub(crate) fn assert_blocking_is_allowed_on_current_thread() {
    let Some(current) = ThreadManager::instance().current_thread() else {
        return;
    };

    assert!(
        current.blocking_calls_allowed(),
        "FATAL: blocking on TaskThread {} while blocking calls are disallowed",
        current.name()
    );
}

#[cfg(not(debug_assertions))]
pub(crate) fn assert_blocking_is_allowed_on_current_thread() {}
