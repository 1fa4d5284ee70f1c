use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque ID that uniquely identifies a `TaskThread` for the lifetime of the
/// process.
///
/// IDs are never re-used, so they are safe to keep in the send graph or in an
/// invoke allow list after the thread they name has been destroyed.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct ThreadId(NonZeroU64);

impl ThreadId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        let Some(id) = NonZeroU64::new(id) else {
            Self::exhausted();
        };

        Self(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique TaskThread ID: bitspace exhausted")
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_thread_ids_are_unique_across_os_threads() {
        let handles = (0..4)
            .map(|_| thread::spawn(|| (0..64).map(|_| ThreadId::next()).collect::<Vec<_>>()))
            .collect::<Vec<_>>();

        let mut all = HashSet::new();
        for handle in handles {
            let ids = handle.join().expect("id generator thread panicked");
            for id in ids {
                assert!(all.insert(id), "duplicate id {id}");
            }
        }

        assert_eq!(all.len(), 4 * 64);
    }
}
