//! Cycle Guard - admission gate for trading cycles

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Ensures at most one trading cycle body runs at a time.
///
/// Owned by the scheduler. Entry is a compare-exchange on a single flag, so
/// the guarantee holds on a multi-threaded runtime as well.
#[derive(Debug, Default)]
pub struct CycleGuard {
    in_progress: AtomicBool,
}

impl CycleGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Occupy the guard if no cycle is running.
    ///
    /// Returns `None` without side effects when a cycle is already in progress.
    pub fn try_enter(self: &Arc<Self>) -> Option<CyclePermit> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CyclePermit {
                guard: Arc::clone(self),
            })
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    fn leave(&self) {
        self.in_progress.store(false, Ordering::Release);
        debug!("Cycle guard released");
    }
}

/// Proof of admission. Dropping it releases the guard, so every exit path
/// of a cycle (including panics) leaves exactly once.
#[derive(Debug)]
pub struct CyclePermit {
    guard: Arc<CycleGuard>,
}

impl CyclePermit {
    /// Release the guard explicitly
    pub fn leave(self) {
        drop(self);
    }
}

impl Drop for CyclePermit {
    fn drop(&mut self) {
        self.guard.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_second_entry_denied() {
        let guard = CycleGuard::new();

        let permit = guard.try_enter().expect("first entry admitted");
        assert!(guard.is_in_progress());
        assert!(guard.try_enter().is_none());
        assert!(guard.is_in_progress(), "denied entry must not clear the flag");

        permit.leave();
        assert!(!guard.is_in_progress());
        assert!(guard.try_enter().is_some());
    }

    #[test]
    fn test_drop_releases() {
        let guard = CycleGuard::new();
        {
            let _permit = guard.try_enter().unwrap();
            assert!(guard.is_in_progress());
        }
        assert!(!guard.is_in_progress());
    }

    #[test]
    fn test_panic_releases() {
        let guard = CycleGuard::new();
        let inner = Arc::clone(&guard);

        let result = thread::spawn(move || {
            let _permit = inner.try_enter().unwrap();
            panic!("cycle body blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(!guard.is_in_progress());
    }

    #[test]
    fn test_exclusive_across_threads() {
        let guard = CycleGuard::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let admitted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    for _ in 0..200 {
                        if let Some(permit) = guard.try_enter() {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            max_active.fetch_max(now, Ordering::SeqCst);
                            admitted.fetch_add(1, Ordering::SeqCst);
                            thread::yield_now();
                            active.fetch_sub(1, Ordering::SeqCst);
                            permit.leave();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(admitted.load(Ordering::SeqCst) > 0);
        assert!(!guard.is_in_progress());
    }
}
