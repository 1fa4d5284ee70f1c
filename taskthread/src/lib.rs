//! Serial task queues bound to OS threads.
//!
//! A [`TaskThread`] runs posted closures one at a time, in order, on a single
//! OS thread: either one it spawns with [`TaskThread::start`] or the calling
//! thread, adopted with [`TaskThread::wrap_current`]. Other threads talk to it
//! through a cloneable [`ThreadHandle`], either fire-and-forget with
//! `post_task` / `post_delayed_task` or synchronously with `blocking_call`.
//!
//! ```no_run
//! use taskthread::TaskThread;
//!
//! let worker = TaskThread::builder().name("worker").build();
//! worker.start().expect("spawn failed");
//!
//! worker.post_task(|| println!("hello from the worker"));
//! let answer = worker.blocking_call(|| 6 * 7);
//! assert_eq!(answer, 42);
//!
//! worker.stop();
//! ```

#[doc(inline)]
pub use taskthread_macros::main;

#[doc(inline)]
pub use taskthread_macros::test;

pub mod clock;
pub use clock::{Clock, FakeClock, SystemClock};

mod errors;
pub use errors::{Result, ThreadError};

pub mod event;
pub use event::Event;

mod manager;
pub use manager::ThreadManager;

pub mod socket;
pub use socket::{NullSocketServer, SocketServer};

pub mod task_queue;
pub use task_queue::{Task, TaskQueue};

pub mod thread;
#[cfg(debug_assertions)]
pub use thread::ScopedCountBlockingCalls;
pub use thread::{
    AutoSocketServerThread, AutoThread, Builder, DEFAULT_DISPATCH_WARNING_MS,
    ScopedDisallowBlockingCalls, TaskThread, ThreadHandle, ThreadId, Timeout,
};

mod utils;

#[cfg(test)]
mod test_utils;
