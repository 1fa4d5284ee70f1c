use crate::thread::{TaskThread, ThreadId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Records which TaskThread ran each labelled task, in what order, and how
/// many ran at the same time.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tracker {
    runs: Arc<DashMap<&'static str, Vec<Option<ThreadId>>>>,
    order: Arc<Mutex<Vec<&'static str>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, label: &'static str) {
        self.record_holding(label, Duration::ZERO);
    }

    /// Records `label`, staying "active" for `hold` so that overlapping runs
    /// show up in `max_active`.
    pub(crate) fn record_holding(&self, label: &'static str, hold: Duration) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !hold.is_zero() {
            std::thread::sleep(hold);
        }

        let thread = TaskThread::current().map(|t| t.id());
        self.runs.entry(label).or_default().push(thread);
        self.order.lock().push(label);

        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// A task that records `label` when run.
    pub(crate) fn task(&self, label: &'static str) -> impl FnOnce() + Send + 'static {
        let tracker = self.clone();
        move || tracker.record(label)
    }

    pub(crate) fn slow_task(
        &self,
        label: &'static str,
        hold: Duration,
    ) -> impl FnOnce() + Send + 'static {
        let tracker = self.clone();
        move || tracker.record_holding(label, hold)
    }

    pub(crate) fn order(&self) -> Vec<&'static str> {
        self.order.lock().clone()
    }

    pub(crate) fn runs(&self, label: &'static str) -> Vec<Option<ThreadId>> {
        self.runs
            .get(label)
            .map(|runs| runs.value().clone())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.lock().len()
    }

    pub(crate) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}
