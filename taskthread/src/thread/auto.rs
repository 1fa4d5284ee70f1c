use super::{Builder, TaskThread, ThreadHandle};
use crate::manager::ThreadManager;
use crate::socket::SocketServer;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Makes the calling OS thread a TaskThread for the lifetime of the guard,
/// unless it already has one.
///
/// The thread is only registered with the manager when it becomes current,
/// so nobody waits on a queue that no OS thread is serving. Tasks posted to it
/// run whenever the owner calls `process_messages`.
pub struct AutoThread {
    thread: TaskThread,
}

impl AutoThread {
    pub fn new() -> Self {
        Self::from_builder(Builder::new())
    }

    pub fn from_builder(builder: Builder) -> Self {
        let thread = builder.build_detached();
        let manager = ThreadManager::instance();

        if manager.current_thread().is_none() {
            thread.do_init();
            manager.set_current_thread(Some(thread.handle().clone()));
        }

        Self { thread }
    }
}

impl Default for AutoThread {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AutoThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AutoThread").field(&self.thread).finish()
    }
}

impl Deref for AutoThread {
    type Target = TaskThread;

    fn deref(&self) -> &TaskThread {
        &self.thread
    }
}

impl Drop for AutoThread {
    fn drop(&mut self) {
        self.thread.stop();
        self.thread.destroy();

        let manager = ThreadManager::instance();
        if self.thread.is_current() {
            manager.set_current_thread(None);
        }
    }
}

/// Installs a TaskThread driven by the given socket server as current,
/// replacing (and hiding from the manager) whatever was current before. The
/// previous thread is restored on drop.
pub struct AutoSocketServerThread {
    thread: TaskThread,
    old_thread: Option<ThreadHandle>,
}

impl AutoSocketServerThread {
    pub fn new(ss: Arc<dyn SocketServer>) -> Self {
        Self::from_builder(Builder::new().socket_server(ss))
    }

    /// The builder must carry the socket server to use.
    pub fn from_builder(builder: Builder) -> Self {
        let thread = builder.build_detached();
        thread.do_init();

        let manager = ThreadManager::instance();
        let old_thread = manager.current_thread();

        // Clear first so the overwrite check keeps catching accidental swaps.
        manager.set_current_thread(None);
        manager.set_current_thread(Some(thread.handle().clone()));

        if let Some(old_thread) = &old_thread {
            manager.remove(old_thread);
        }

        Self { thread, old_thread }
    }
}

impl fmt::Debug for AutoSocketServerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoSocketServerThread")
            .field("thread", &self.thread)
            .field("old_thread", &self.old_thread)
            .finish()
    }
}

impl Deref for AutoSocketServerThread {
    type Target = TaskThread;

    fn deref(&self) -> &TaskThread {
        &self.thread
    }
}

impl Drop for AutoSocketServerThread {
    fn drop(&mut self) {
        debug_assert!(self.thread.is_current());

        // Leftover tasks are dropped while this is still the current thread,
        // their destructors may rely on it.
        self.thread.stop();
        self.thread.destroy();

        let manager = ThreadManager::instance();
        manager.set_current_thread(None);
        manager.set_current_thread(self.old_thread.clone());

        if let Some(old_thread) = &self.old_thread {
            manager.add(old_thread);
        }
    }
}
