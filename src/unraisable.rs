//! Reporting channel for errors that have no return path.
//!
//! Some native entry points (`xSleep`, `xDlClose`, `xRandomness`, ...) cannot
//! signal failure, and destructors cannot return errors. Such errors are
//! logged at `error` level and passed to the process-wide hook, if one is
//! installed.
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use vfs_bridge::unraisable;
//!
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&seen);
//! unraisable::set_hook(move |_report| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//! unraisable::clear_hook();
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::Error;

type Hook = Arc<dyn Fn(&UnraisableError) + Send + Sync>;

static HOOK: RwLock<Option<Hook>> = parking_lot::const_rwlock(None);

/// An error that could not be returned to a caller.
#[derive(Debug)]
pub struct UnraisableError {
    /// The operation during which the error happened.
    pub operation: &'static str,
    /// The error itself.
    pub error: Error,
}

impl fmt::Display for UnraisableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unraisable error in {}: {}", self.operation, self.error)
    }
}

/// Installs `hook`, replacing any previous one.
pub fn set_hook<F>(hook: F)
where
    F: Fn(&UnraisableError) + Send + Sync + 'static,
{
    *HOOK.write() = Some(Arc::new(hook));
}

/// Removes the installed hook.
pub fn clear_hook() {
    *HOOK.write() = None;
}

/// Logs `error` and hands it to the hook.
pub(crate) fn report(operation: &'static str, error: Error) {
    tracing::error!(operation, error = %error, code = error.code(), "unraisable error");
    // Cloned out so the hook may call set_hook/clear_hook itself.
    let hook = HOOK.read().clone();
    if let Some(hook) = hook {
        hook(&UnraisableError { operation, error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes;
    use parking_lot::Mutex;
    use serial_test::serial;

    #[test]
    #[serial]
    fn hook_receives_reports() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        set_hook(move |report| {
            sink.lock().push((report.operation, report.error.code()));
        });
        report("xSleep", Error::new(codes::IOERR));
        clear_hook();
        report("xSleep", Error::new(codes::IOERR));

        let seen = seen.lock();
        assert_eq!(seen.as_slice(), &[("xSleep", codes::IOERR)]);
    }

    #[test]
    #[serial]
    fn hook_may_clear_itself() {
        set_hook(|_| clear_hook());
        report("xDlClose", Error::new(codes::ERROR));
        assert!(HOOK.read().is_none());
    }

    #[test]
    fn display_names_operation() {
        let report = UnraisableError {
            operation: "xSectorSize",
            error: Error::new(codes::IOERR),
        };
        assert!(report.to_string().starts_with("unraisable error in xSectorSize:"));
    }
}
