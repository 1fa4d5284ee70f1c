use crate::thread::ThreadId;
use std::io;

/// Errors reported by `TaskThread` lifecycle and blocking-call operations.
///
/// Posting to a quitting thread is *not* an error: it is a silent drop by
/// contract, so there is no variant for it on the posting path.
#[derive(thiserror::Error, Debug)]
pub enum ThreadError {
    /// `start()` or `wrap_current()` was called on a thread that already has an
    /// OS thread attached.
    #[error("TaskThread is already running")]
    AlreadyRunning,

    /// The OS refused to spawn the worker thread.
    #[error("Unable to spawn OS thread: {0}")]
    Spawn(#[from] io::Error),

    /// Registering `caller -> callee` would close a cycle in the send graph,
    /// meaning the two threads can deadlock each other with blocking calls.
    #[error("FATAL: send loop between {caller} and {callee}")]
    SendCycle { caller: ThreadId, callee: ThreadId },

    /// The target thread is quitting, the functor was not run.
    #[error("TaskThread {0} is quitting")]
    Quitting(ThreadId),
}

impl ThreadError {
    /// Contract violations that must never be recovered from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ThreadError::SendCycle { .. })
    }
}

impl PartialEq for ThreadError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::AlreadyRunning, Self::AlreadyRunning) => true,
            (Self::Spawn(a), Self::Spawn(b)) => a.kind() == b.kind(),
            (
                Self::SendCycle { caller, callee },
                Self::SendCycle {
                    caller: c2,
                    callee: d2,
                },
            ) => caller == c2 && callee == d2,
            (Self::Quitting(a), Self::Quitting(b)) => a == b,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ThreadError>;
