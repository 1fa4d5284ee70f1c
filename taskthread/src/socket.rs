use crate::event::Event;
use crate::thread::ThreadHandle;
use std::time::Duration;

/// The wait/wake primitive a `TaskThread` blocks on between tasks.
///
/// Implementations may multiplex real I/O while waiting. The thread calls
/// `wake_up` every time a task is posted or the thread is asked to quit, so an
/// in-progress `wait` must return promptly after it.
pub trait SocketServer: Send + Sync {
    /// Called with the owning thread once it is built, and with `None` right
    /// before the thread is destroyed.
    fn set_message_queue(&self, _thread: Option<&ThreadHandle>) {}

    /// Sleeps until `max_wait` elapses (`None` is forever) or `wake_up` is
    /// called. I/O is serviced while sleeping if `process_io` is set.
    ///
    /// Returns `false` on error, which makes the waiting `get` return nothing.
    fn wait(&self, max_wait: Option<Duration>, process_io: bool) -> bool;

    /// Interrupts the current `wait`, or makes the next one return immediately.
    fn wake_up(&self);
}

/// A socket server without sockets, for threads that only run tasks.
#[derive(Debug, Default)]
pub struct NullSocketServer {
    event: Event,
}

impl NullSocketServer {
    pub fn new() -> Self {
        Self {
            event: Event::new(),
        }
    }
}

impl SocketServer for NullSocketServer {
    fn wait(&self, max_wait: Option<Duration>, _process_io: bool) -> bool {
        // Sleeping forever is the normal idle state here, don't warn about it.
        self.event.wait_with_warning(max_wait, None);
        true
    }

    fn wake_up(&self) {
        self.event.set();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::time::Instant;

    assert_impl_all!(NullSocketServer: Send, Sync, SocketServer);

    #[test]
    fn test_null_socket_server_wait_times_out() {
        let ss = NullSocketServer::new();
        let start = Instant::now();

        assert!(ss.wait(Some(Duration::from_millis(10)), true));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_null_socket_server_wake_up_before_wait() {
        let ss = NullSocketServer::new();
        ss.wake_up();

        let start = Instant::now();
        assert!(ss.wait(None, true));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
