use std::time::Duration;

// Exports
mod id;
pub use id::ThreadId;

pub(crate) mod queue;

mod builder;
pub use builder::Builder;

mod handle;
pub use handle::ThreadHandle;
pub(crate) use handle::assert_blocking_is_allowed_on_current_thread;

mod task_thread;
pub use task_thread::TaskThread;

mod auto;
pub use auto::{AutoSocketServerThread, AutoThread};

mod scoped;
#[cfg(debug_assertions)]
pub use scoped::ScopedCountBlockingCalls;
pub use scoped::ScopedDisallowBlockingCalls;


/// Default threshold above which a single dispatch is logged as slow.
pub const DEFAULT_DISPATCH_WARNING_MS: i64 = 50;

/// How long `get` and `process_messages` may wait for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Never elapses.
    Forever,

    /// Milliseconds on the thread's clock.
    Millis(i64),
}

impl Timeout {
    /// Returns immediately once no ready task is left.
    pub const ZERO: Timeout = Timeout::Millis(0);

    pub fn from_millis(ms: u64) -> Self {
        Timeout::Millis(i64::try_from(ms).unwrap_or(i64::MAX))
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::Millis(crate::clock::round_up_millis(d))
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(d: Option<Duration>) -> Self {
        d.map_or(Timeout::Forever, Timeout::from)
    }
}

/// Converts a non-negative millisecond count into a `Duration`, clamping
/// negative values to zero.
pub(crate) fn millis_to_duration(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}
