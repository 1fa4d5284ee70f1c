//! Process-wide registry of live TaskThreads.
//!
//! The manager is created on first use and never dropped. It maps every OS
//! thread to its current TaskThread through thread-local storage, and in
//! debug builds keeps the graph of in-flight blocking calls used to detect
//! deadlocks before they happen.

use crate::errors::Result;
#[cfg(debug_assertions)]
use crate::errors::ThreadError;
use crate::task_queue::CurrentTaskQueueSetter;
use crate::thread::{TaskThread, ThreadHandle, ThreadId, Timeout};
use crate::utils::ScopeGuard;
use parking_lot::Mutex;
use std::cell::RefCell;
#[cfg(debug_assertions)]
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct CurrentSlot {
    thread: Option<ThreadHandle>,

    // Keeps the thread installed as the current task queue for as long as it
    // is the current thread.
    registration: Option<CurrentTaskQueueSetter>,
}

thread_local! {
    static CURRENT: RefCell<CurrentSlot> = RefCell::new(CurrentSlot::default());

    // Threads created by `wrap_current_thread`, owned by the OS thread they
    // wrap.
    static WRAPPED: RefCell<Option<TaskThread>> = const { RefCell::new(None) };
}

#[derive(Default)]
struct State {
    threads: Vec<ThreadHandle>,

    /// `source -> targets` edges of every blocking call ever issued between
    /// live threads. Acyclic by construction.
    #[cfg(debug_assertions)]
    send_graph: HashMap<ThreadId, HashSet<ThreadId>>,
}

pub struct ThreadManager {
    state: Mutex<State>,
}

impl ThreadManager {
    pub fn instance() -> &'static ThreadManager {
        static MANAGER: OnceLock<ThreadManager> = OnceLock::new();

        MANAGER.get_or_init(|| ThreadManager {
            state: Mutex::new(State::default()),
        })
    }

    pub fn add(&self, thread: &ThreadHandle) {
        self.state.lock().threads.push(thread.clone());
    }

    /// Forgets `thread`, including every send-graph edge touching it.
    pub fn remove(&self, thread: &ThreadHandle) {
        let id = thread.id();

        let removed = {
            let mut state = self.state.lock();
            let removed = state
                .threads
                .iter()
                .position(|t| t.id() == id)
                .map(|pos| state.threads.remove(pos));

            #[cfg(debug_assertions)]
            {
                state.send_graph.remove(&id);
                for targets in state.send_graph.values_mut() {
                    targets.remove(&id);
                }
            }

            removed
        };

        // The last strong reference may go here, never under the lock.
        drop(removed);
    }

    pub fn len(&self) -> usize {
        self.state.lock().threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, thread: &ThreadHandle) -> bool {
        self.state
            .lock()
            .threads
            .iter()
            .any(|t| t.id() == thread.id())
    }

    pub fn current_thread(&self) -> Option<ThreadHandle> {
        CURRENT
            .try_with(|slot| slot.borrow().thread.clone())
            .ok()
            .flatten()
    }

    pub(crate) fn is_current_thread(&self, id: ThreadId) -> bool {
        CURRENT
            .try_with(|slot| slot.borrow().thread.as_ref().is_some_and(|t| t.id() == id))
            .unwrap_or(false)
    }

    /// Installs `thread` as the current TaskThread of the calling OS thread,
    /// and as its current task queue. `None` detaches whatever is current.
    pub fn set_current_thread(&self, thread: Option<ThreadHandle>) {
        let Ok(overwriting) = CURRENT.try_with(|slot| slot.borrow().thread.is_some()) else {
            return;
        };

        if overwriting && thread.is_some() {
            tracing::error!("set_current_thread: overwriting an existing value?");
        }

        // The previous registration must be gone before the next one records
        // what it restores.
        let previous_registration = CURRENT.with(|slot| slot.borrow_mut().registration.take());
        drop(previous_registration);

        let registration = thread
            .as_ref()
            .map(|t| CurrentTaskQueueSetter::new(t.as_task_queue()));

        let previous = CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            slot.registration = registration;
            std::mem::replace(&mut slot.thread, thread)
        });
        drop(previous);
    }

    /// Swaps the current TaskThread without touching the task queue
    /// registration.
    pub fn change_current_thread_for_test(&self, thread: Option<ThreadHandle>) {
        let previous = CURRENT
            .try_with(|slot| std::mem::replace(&mut slot.borrow_mut().thread, thread))
            .ok()
            .flatten();
        drop(previous);
    }

    /// Records that `source` is about to block on `target`.
    ///
    /// Fails if `source` is reachable from `target`, since the pair could then
    /// deadlock each other. Nothing is recorded in that case.
    #[cfg(debug_assertions)]
    pub fn register_send_and_check_for_cycles(
        &self,
        source: &ThreadHandle,
        target: &ThreadHandle,
    ) -> Result<()> {
        let (source_id, target_id) = (source.id(), target.id());
        let mut state = self.state.lock();

        let mut visited = HashSet::from([target_id]);
        let mut pending = VecDeque::from([target_id]);

        while let Some(node) = pending.pop_front() {
            if node == source_id {
                tracing::error!(
                    source = %source.name(),
                    target = %target.name(),
                    "Send loop detected"
                );
                return Err(ThreadError::SendCycle {
                    caller: source_id,
                    callee: target_id,
                });
            }

            let Some(targets) = state.send_graph.get(&node) else {
                continue;
            };

            for next in targets {
                if visited.insert(*next) {
                    pending.push_back(*next);
                }
            }
        }

        state
            .send_graph
            .entry(source_id)
            .or_default()
            .insert(target_id);

        Ok(())
    }

    /// Send graph checks are compiled out of release builds.
    #[cfg(not(debug_assertions))]
    pub fn register_send_and_check_for_cycles(
        &self,
        _source: &ThreadHandle,
        _target: &ThreadHandle,
    ) -> Result<()> {
        Ok(())
    }

    /// Blocks until every thread that is processing messages has run all the
    /// tasks that were ready when this was called.
    ///
    /// A zero-delay sentinel is posted to each of them. The current thread
    /// keeps pumping its own queue while waiting, since it may be one of them.
    pub fn process_all_message_queues_for_testing(&self) {
        let queues_not_done = Arc::new(AtomicUsize::new(0));

        {
            let state = self.state.lock();
            for thread in &state.threads {
                // A sentinel posted there would never run.
                if !thread.is_processing_messages_for_testing() {
                    continue;
                }

                queues_not_done.fetch_add(1, Ordering::AcqRel);

                // Counts down whether the sentinel runs or is dropped.
                let done = {
                    let queues_not_done = Arc::clone(&queues_not_done);
                    ScopeGuard::new(move || {
                        queues_not_done.fetch_sub(1, Ordering::AcqRel);
                    })
                };

                thread.post_delayed_task(move || drop(done), Duration::ZERO);
            }
        }

        let current = self.current_thread();
        while queues_not_done.load(Ordering::Acquire) > 0 {
            match &current {
                Some(current) => {
                    current.process_messages(Timeout::ZERO);
                }
                None => std::thread::yield_now(),
            }
        }
    }

    /// Returns the current TaskThread, wrapping the calling OS thread in a new
    /// one if it has none. The new thread lives until
    /// [`unwrap_current_thread`](Self::unwrap_current_thread) or until the OS
    /// thread exits.
    pub fn wrap_current_thread(&self) -> Result<ThreadHandle> {
        if let Some(current) = self.current_thread() {
            return Ok(current);
        }

        let thread = TaskThread::new();
        thread.wrap_current()?;
        let handle = thread.handle().clone();

        let previous = WRAPPED.with(|wrapped| wrapped.borrow_mut().replace(thread));
        drop(previous);

        Ok(handle)
    }

    /// Undoes [`wrap_current_thread`](Self::wrap_current_thread). Threads
    /// spawned by `start()` are left alone.
    pub fn unwrap_current_thread(&self) {
        let Some(current) = self.current_thread() else {
            return;
        };

        if current.is_owned() {
            return;
        }

        let wrapped = WRAPPED.with(|wrapped| {
            let mut wrapped = wrapped.borrow_mut();
            match wrapped.as_ref() {
                Some(thread) if thread.id() == current.id() => wrapped.take(),
                _ => None,
            }
        });

        match wrapped {
            Some(thread) => {
                thread.unwrap_current();
                drop(thread);
            }
            None => current.detach(),
        }
    }
}
