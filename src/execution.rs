//! The process-wide execution lock held by every native entry point.
//!
//! The lock is reentrant: an adapter that delegates to another adapter
//! re-acquires it on the same thread without blocking. Per-thread counters
//! record every acquisition and release so the balance can be checked.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::{Error, Result};

static EXECUTION_LOCK: ReentrantMutex<()> = parking_lot::const_reentrant_mutex(());

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static ACQUIRED: Cell<u64> = const { Cell::new(0) };
    static RELEASED: Cell<u64> = const { Cell::new(0) };
}

/// Holds the execution lock until dropped.
#[must_use = "the execution lock is released when the guard is dropped"]
pub struct ExecutionGuard {
    _guard: ReentrantMutexGuard<'static, ()>,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        DEPTH.set(DEPTH.get().saturating_sub(1));
        RELEASED.set(RELEASED.get() + 1);
    }
}

/// Acquires the execution lock for the current thread.
pub fn enter() -> ExecutionGuard {
    let guard = EXECUTION_LOCK.lock();
    DEPTH.set(DEPTH.get() + 1);
    ACQUIRED.set(ACQUIRED.get() + 1);
    ExecutionGuard { _guard: guard }
}

/// Runs a handler call under the lock, turning a panic into [`Error::Panic`].
pub(crate) fn run<T>(operation: &'static str, call: impl FnOnce() -> Result<T>) -> Result<T> {
    let _guard = enter();
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_default();
            Err(Error::Panic { operation, message })
        }
    }
}

/// How many times the current thread holds the lock right now.
pub fn depth() -> usize {
    DEPTH.get()
}

/// Total acquisitions on the current thread.
pub fn acquisitions() -> u64 {
    ACQUIRED.get()
}

/// Total releases on the current thread.
pub fn releases() -> u64 {
    RELEASED.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_entry_does_not_deadlock() {
        let before = (acquisitions(), releases());
        {
            let _outer = enter();
            let _inner = enter();
            assert_eq!(depth(), 2);
        }
        assert_eq!(depth(), 0);
        assert_eq!(acquisitions() - before.0, 2);
        assert_eq!(releases() - before.1, 2);
    }

    #[test]
    fn released_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _guard = enter();
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(depth(), 0);
        assert_eq!(acquisitions() - releases(), 0);
    }

    #[test]
    fn run_catches_panics() {
        let err = run::<()>("xSync", || panic!("disk on fire")).unwrap_err();
        match err {
            Error::Panic { operation, message } => {
                assert_eq!(operation, "xSync");
                assert_eq!(message, "disk on fire");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(depth(), 0);
    }

    #[test]
    fn other_threads_wait() {
        let guard = enter();
        let handle = std::thread::spawn(|| {
            let _guard = enter();
            depth()
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!handle.is_finished());
        drop(guard);
        assert_eq!(handle.join().unwrap(), 1);
    }
}
