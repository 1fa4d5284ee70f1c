use std::marker::PhantomData;

/// Runs a closure when it goes out of scope, on normal exit and on unwind.
///
/// Task threads use it to clear thread-local state when a run body panics,
/// and to signal waiters when a posted task is either run or dropped unrun.
pub(crate) struct ScopeGuard<'a, F: FnOnce()> {
    // `Option` so the closure is taken exactly once, even if it panics.
    closure: Option<F>,

    _p: PhantomData<&'a ()>,
}

impl<'a, F: FnOnce()> ScopeGuard<'a, F> {
    pub(crate) fn new(closure: F) -> Self {
        ScopeGuard {
            closure: Some(closure),
            _p: PhantomData,
        }
    }
}

impl<'a, F: FnOnce()> Drop for ScopeGuard<'a, F> {
    fn drop(&mut self) {
        if let Some(closure) = self.closure.take() {
            closure();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::panic;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_runs_on_scope_exit() {
        let ran = Cell::new(false);
        {
            let _guard = ScopeGuard::new(|| ran.set(true));
            assert!(!ran.get());
        }
        assert!(ran.get());
    }

    #[test]
    fn test_runs_on_unwind() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let result = panic::catch_unwind(move || {
            let _guard = ScopeGuard::new(move || flag.store(true, Ordering::SeqCst));
            panic!("boom");
        });

        assert!(result.is_err());
        assert!(ran.load(Ordering::SeqCst));
    }
}
