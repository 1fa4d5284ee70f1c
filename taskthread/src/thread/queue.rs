use crate::task_queue::Task;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::fmt;

/// A task waiting in the delayed heap. Only `(run_time_ms, sequence)` take part
/// in the ordering, the closure is opaque payload.
pub(crate) struct DelayedTask {
    /// Requested delay, kept for debugging.
    pub(crate) delay_ms: i64,

    pub(crate) run_time_ms: i64,

    /// Monotonically increasing number ordering tasks that share a
    /// `run_time_ms`.
    pub(crate) sequence: u32,

    pub(crate) task: Task,
}

impl fmt::Debug for DelayedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedTask")
            .field("delay_ms", &self.delay_ms)
            .field("run_time_ms", &self.run_time_ms)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.run_time_ms == other.run_time_ms && self.sequence == other.sequence
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    // `BinaryHeap` is a max-heap, reverse so that the earliest task is on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .run_time_ms
            .cmp(&self.run_time_ms)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Immediate FIFO plus delayed min-heap. Callers guard the whole struct with a
/// single mutex.
#[derive(Default)]
pub(crate) struct TaskQueues {
    tasks: VecDeque<Task>,

    delayed: BinaryHeap<DelayedTask>,

    // Processing one delayed task per millisecond wraps this after ~50 days.
    // Only tasks with identical run times can then be misordered, and only
    // briefly, which is acceptable.
    next_sequence: u32,
}

impl fmt::Debug for TaskQueues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueues")
            .field("tasks", &self.tasks.len())
            .field("delayed", &self.delayed.len())
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

impl TaskQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, task: Task) {
        self.tasks.push_back(task);
    }

    pub(crate) fn push_delayed(&mut self, task: Task, delay_ms: i64, now_ms: i64) {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        self.delayed.push(DelayedTask {
            delay_ms,
            run_time_ms: now_ms.saturating_add(delay_ms),
            sequence,
            task,
        });
    }

    /// Moves every delayed task whose run time has come into the FIFO, in
    /// `(run_time_ms, sequence)` order.
    ///
    /// Returns the time until the next delayed task becomes ready, or `None`
    /// if no delayed task is left.
    pub(crate) fn promote_ready(&mut self, now_ms: i64) -> Option<i64> {
        while let Some(next) = self.delayed.peek() {
            if now_ms < next.run_time_ms {
                return Some(next.run_time_ms - now_ms);
            }

            if let Some(ready) = self.delayed.pop() {
                self.tasks.push_back(ready.task);
            }
        }

        None
    }

    pub(crate) fn pop_front(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len() + self.delayed.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time until the next task can be retrieved: zero with immediate work
    /// pending, `None` with nothing queued at all.
    pub(crate) fn delay(&self, now_ms: i64) -> Option<i64> {
        if !self.tasks.is_empty() {
            return Some(0);
        }

        self.delayed
            .peek()
            .map(|next| (next.run_time_ms - now_ms).max(0))
    }

    /// Empties both queues, handing the contents to the caller so they can be
    /// dropped outside the lock.
    pub(crate) fn take_all(&mut self) -> (VecDeque<Task>, BinaryHeap<DelayedTask>) {
        (
            std::mem::take(&mut self.tasks),
            std::mem::take(&mut self.delayed),
        )
    }

    #[cfg(test)]
    pub(crate) fn set_next_sequence(&mut self, sequence: u32) {
        self.next_sequence = sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rstest::rstest;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<usize>>>, impl Fn(usize) -> Task) {
        let order = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let order = Arc::clone(&order);
            move |n: usize| -> Task {
                let order = Arc::clone(&order);
                Box::new(move || order.lock().push(n))
            }
        };
        (order, make)
    }

    fn drain(queues: &mut TaskQueues) {
        while let Some(task) = queues.pop_front() {
            task();
        }
    }

    #[test]
    fn test_immediate_tasks_are_fifo() {
        let (order, task) = recorder();
        let mut queues = TaskQueues::new();

        for n in 0..5 {
            queues.push(task(n));
        }
        assert_eq!(queues.len(), 5);

        drain(&mut queues);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert!(queues.is_empty());
    }

    #[test]
    fn test_delayed_identical_times_are_fifo() {
        let (order, task) = recorder();
        let mut queues = TaskQueues::new();

        queues.push_delayed(task(3), 3, 0);
        queues.push_delayed(task(0), 1, 0);
        queues.push_delayed(task(1), 2, 0);
        queues.push_delayed(task(4), 3, 0);
        queues.push_delayed(task(2), 2, 0);

        assert_eq!(queues.promote_ready(4), None);
        drain(&mut queues);

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[rstest]
    #[case::nothing_ready(0, Some(10), 0)]
    #[case::first_ready(10, Some(10), 1)]
    #[case::all_ready(20, None, 2)]
    fn test_promote_ready_reports_next_delay(
        #[case] now: i64,
        #[case] expected_next: Option<i64>,
        #[case] expected_ready: usize,
    ) {
        let (_order, task) = recorder();
        let mut queues = TaskQueues::new();

        queues.push_delayed(task(0), 10, 0);
        queues.push_delayed(task(1), 20, 0);

        assert_eq!(queues.promote_ready(now), expected_next);

        let mut ready = 0;
        while queues.pop_front().is_some() {
            ready += 1;
        }
        assert_eq!(ready, expected_ready);
    }

    #[test]
    fn test_ready_delayed_tasks_go_behind_existing_fifo() {
        let (order, task) = recorder();
        let mut queues = TaskQueues::new();

        queues.push_delayed(task(1), 0, 0);
        queues.push(task(0));
        queues.push_delayed(task(2), 0, 0);

        queues.promote_ready(0);
        drain(&mut queues);

        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_delay() {
        let (_order, task) = recorder();
        let mut queues = TaskQueues::new();
        assert_eq!(queues.delay(0), None);

        queues.push_delayed(task(0), 30, 0);
        assert_eq!(queues.delay(10), Some(20));
        assert_eq!(queues.delay(50), Some(0));

        queues.push(task(1));
        assert_eq!(queues.delay(10), Some(0));
    }

    #[test]
    fn test_sequence_wraps_without_panicking() {
        let (order, task) = recorder();
        let mut queues = TaskQueues::new();
        queues.set_next_sequence(u32::MAX);

        queues.push_delayed(task(0), 5, 0);
        queues.push_delayed(task(1), 6, 0);

        queues.promote_ready(10);
        drain(&mut queues);
        assert_eq!(*order.lock(), vec![0, 1]);
    }

    #[test]
    fn test_take_all_empties_both_queues() {
        let (order, task) = recorder();
        let mut queues = TaskQueues::new();
        queues.push(task(0));
        queues.push_delayed(task(1), 100, 0);

        let (tasks, delayed) = queues.take_all();
        assert_eq!(tasks.len(), 1);
        assert_eq!(delayed.len(), 1);
        assert!(queues.is_empty());

        drop((tasks, delayed));
        assert!(order.lock().is_empty());
    }
}
