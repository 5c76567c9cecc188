//! Error type and the two-way bridge between handler errors and native status codes.
//!
//! Handler methods fail by returning [`Error`]. When such an error reaches a
//! native entry point it is *translated*: the entry point returns
//! [`Error::code`] to the engine and the full error, annotated with the
//! operation and its arguments, is kept in a per-thread pending slot. A
//! second translation while one is still pending chains the two, most recent
//! first.
//!
//! In the other direction, a caller that invokes a native function and gets
//! a non-zero status back uses [`raise_from_code`], which adopts the pending
//! error when one was recorded further down a delegation chain. This is how
//! a handler error raised three adapters deep survives the trip through the
//! engine's integer-only calling convention.
//!
//! Every pending entry is stamped with a per-thread generation. Calls made
//! from Rust through a [`NativeVfs`](crate::NativeVfs) or
//! [`NativeFile`](crate::NativeFile) note the generation before calling and
//! adopt only entries recorded after it; older entries were left by calls
//! the engine already reported and are discarded.

use std::cell::{Cell, RefCell};
use std::ffi::{CStr, NulError, c_int};
use std::fmt;

use libsqlite3_sys as ffi;

use crate::codes;

/// Pending errors older than this are dropped from a chain.
const MAX_CHAIN: usize = 16;

/// A specialised result type for adapter operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Adapter error type with contextual variants.
///
/// Every variant maps to a native status code through [`Error::code`].
/// Uses `#[non_exhaustive]` for forward compatibility.
///
/// # Examples
///
/// ```rust
/// use vfs_bridge::{Error, codes};
///
/// let err = Error::new(codes::BUSY);
/// assert!(err.is_busy());
///
/// let err = err.with_context("xLock", "level=2");
/// assert_eq!(err.code(), codes::BUSY);
/// assert!(err.to_string().starts_with("xLock(level=2)"));
/// ```
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A native status code, raised by the engine or by a handler.
    #[error("{message} (code {code})")]
    Sqlite {
        /// The (possibly extended) status code.
        code: c_int,
        /// Human readable description.
        message: String,
    },

    /// The operation has no handler override and no base to delegate to.
    #[error("{operation}: not implemented")]
    NotImplemented {
        /// The native operation name.
        operation: &'static str,
    },

    /// The file was already closed.
    #[error("{operation}: file is closed")]
    FileClosed {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// A scoped view was used after the call that supplied it returned.
    #[error("{what} used outside the call that supplied it")]
    OutOfScope {
        /// The kind of view.
        what: &'static str,
    },

    /// A file was re-entered through the native table while busy.
    #[error("{operation}: re-entrant call on an open file")]
    Reentrant {
        /// The operation that was attempted.
        operation: &'static str,
    },

    /// An argument was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A named item does not exist.
    #[error("{what} not found: {name}")]
    NotFound {
        /// The kind of item (`"vfs"`, `"system call"`).
        what: &'static str,
        /// The name that was looked up.
        name: String,
    },

    /// A result does not fit the space the engine provided.
    #[error("{operation}: result too big ({size} > {limit})")]
    TooBig {
        /// The operation that produced the result.
        operation: &'static str,
        /// The size of the result including its terminator.
        size: usize,
        /// The space available.
        limit: usize,
    },

    /// A handler returned a value the adapter cannot use.
    #[error("{operation}: {message}")]
    Handler {
        /// The operation whose handler misbehaved.
        operation: &'static str,
        /// What was wrong.
        message: String,
    },

    /// A handler panicked.
    #[error("{operation}: handler panicked: {message}")]
    Panic {
        /// The operation whose handler panicked.
        operation: &'static str,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// I/O error with context.
    #[error("{operation} failed: {source}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An error annotated with the call it happened in.
    #[error("{context}: {source}")]
    Context {
        /// Operation name and arguments.
        context: ErrorContext,
        /// The annotated error.
        #[source]
        source: Box<Error>,
    },

    /// An error raised while an earlier one was still pending.
    #[error("{error}")]
    Chained {
        /// The most recent error.
        error: Box<Error>,
        /// The error that was pending when `error` was raised.
        #[source]
        previous: Box<Error>,
    },
}

/// The operation and arguments attached to an error at a translation point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// The native operation name, e.g. `"xRead"`.
    pub operation: &'static str,
    /// The relevant arguments, already formatted.
    pub detail: String,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.operation, self.detail)
    }
}

impl Error {
    /// Creates an error for a native status code, described by the engine's
    /// own message for that code.
    pub fn new(code: c_int) -> Self {
        // SAFETY: sqlite3_errstr returns a pointer to a static string for any input.
        let message = unsafe {
            let text = ffi::sqlite3_errstr(code);
            if text.is_null() {
                String::from("unknown error")
            } else {
                CStr::from_ptr(text).to_string_lossy().into_owned()
            }
        };
        Error::Sqlite { code, message }
    }

    /// Creates an error for a native status code with a custom message.
    pub fn with_message(code: c_int, message: impl Into<String>) -> Self {
        Error::Sqlite {
            code,
            message: message.into(),
        }
    }

    /// The lock could not be obtained because of contention.
    pub fn busy() -> Self {
        Error::new(codes::BUSY)
    }

    /// The native status code for this error.
    ///
    /// Never returns [`codes::OK`]: an error always signals failure.
    pub fn code(&self) -> c_int {
        let code = match self {
            Error::Sqlite { code, .. } => *code,
            Error::NotImplemented { .. } => codes::ERROR,
            Error::FileClosed { .. } => codes::MISUSE,
            Error::OutOfScope { .. } => codes::MISUSE,
            Error::Reentrant { .. } => codes::MISUSE,
            Error::InvalidArgument(_) => codes::MISUSE,
            Error::NotFound { .. } => codes::NOTFOUND,
            Error::TooBig { .. } => codes::TOOBIG,
            Error::Handler { .. } => codes::ERROR,
            Error::Panic { .. } => codes::ERROR,
            Error::Io { source, .. } => match source.kind() {
                std::io::ErrorKind::OutOfMemory => codes::NOMEM,
                _ => codes::IOERR,
            },
            Error::Context { source, .. } => source.code(),
            Error::Chained { error, .. } => error.code(),
        };
        if code == codes::OK { codes::ERROR } else { code }
    }

    /// The primary part of [`Error::code`].
    pub fn primary_code(&self) -> c_int {
        codes::primary(self.code())
    }

    /// Returns `true` for lock contention, which callers retry.
    pub fn is_busy(&self) -> bool {
        self.primary_code() == codes::BUSY
    }

    /// Returns `true` when the error is a lookup miss.
    pub fn is_not_found(&self) -> bool {
        self.code() == codes::NOTFOUND
    }

    /// Annotates the error with an operation name and its arguments.
    ///
    /// The status code is unchanged.
    pub fn with_context(self, operation: &'static str, detail: impl Into<String>) -> Self {
        Error::Context {
            context: ErrorContext {
                operation,
                detail: detail.into(),
            },
            source: Box::new(self),
        }
    }

    /// The error with any context annotations removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            Error::Chained { error, .. } => error.root(),
            other => other,
        }
    }

    /// The error that was pending when this one was raised, if any.
    pub fn previous(&self) -> Option<&Error> {
        match self {
            Error::Chained { previous, .. } => Some(previous),
            Error::Context { source, .. } => source.previous(),
            _ => None,
        }
    }

    /// Number of errors in this chain, counting this one.
    pub fn chain_len(&self) -> usize {
        1 + self.previous().map_or(0, Error::chain_len)
    }

    fn chained(self, previous: Error) -> Self {
        let mut previous = previous;
        previous.truncate_chain(MAX_CHAIN - 1);
        Error::Chained {
            error: Box::new(self),
            previous: Box::new(previous),
        }
    }

    fn truncate_chain(&mut self, keep: usize) {
        match self {
            Error::Chained { error, previous } => {
                if keep <= 1 {
                    let error = std::mem::replace(error.as_mut(), Error::InvalidArgument(String::new()));
                    *self = error;
                } else {
                    previous.truncate_chain(keep - 1);
                }
            }
            Error::Context { source, .. } => source.truncate_chain(keep),
            _ => {}
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io {
            operation: "io",
            source,
        }
    }
}

impl From<NulError> for Error {
    fn from(error: NulError) -> Self {
        Error::InvalidArgument(format!(
            "embedded NUL byte at position {}",
            error.nul_position()
        ))
    }
}

thread_local! {
    /// Pending errors with the generation they were recorded in, oldest first.
    static PENDING: RefCell<Vec<(u64, Error)>> = const { RefCell::new(Vec::new()) };
    static GENERATION: Cell<u64> = const { Cell::new(0) };
}

/// Records `error` as pending on this thread and returns its native code.
///
/// If an error is already pending, the new one is chained in front of it.
pub(crate) fn translate(error: Error) -> c_int {
    let code = error.code();
    let generation = GENERATION.get() + 1;
    GENERATION.set(generation);
    PENDING.with_borrow_mut(|pending| {
        if pending.len() >= MAX_CHAIN {
            pending.remove(0);
        }
        pending.push((generation, error));
    });
    code
}

/// Folds pending entries, oldest first, into one chain.
fn fold(entries: impl IntoIterator<Item = Error>) -> Option<Error> {
    entries
        .into_iter()
        .fold(None, |chain, error| Some(match chain {
            Some(previous) => error.chained(previous),
            None => error,
        }))
}

/// Converts a native status code into an [`Error`].
///
/// When an error is pending on this thread (recorded by an adapter further
/// down the call chain), it is adopted: returned as-is if it carries the
/// same code, otherwise chained behind a fresh error for `code`.
pub fn raise_from_code(code: c_int) -> Error {
    adopt(code, take_pending())
}

fn adopt(code: c_int, pending: Option<Error>) -> Error {
    match pending {
        Some(pending) if pending.code() == code => pending,
        Some(pending) => Error::new(code).chained(pending),
        None => Error::new(code),
    }
}

/// Removes and returns the error pending on this thread.
///
/// Engine-side callers use this after a native call failed to recover the
/// full error a handler raised.
pub fn take_pending() -> Option<Error> {
    fold(PENDING.take().into_iter().map(|(_, error)| error))
}

/// Returns `true` if an error is pending on this thread.
pub fn has_pending() -> bool {
    PENDING.with_borrow(|pending| !pending.is_empty())
}

/// One call from Rust into a native function pointer.
///
/// Only errors translated after the call began belong to it. Anything older
/// was left behind by an earlier call the engine already reported, and is
/// discarded instead of being attached to this call's failure.
pub(crate) struct NativeCall {
    mark: u64,
}

impl NativeCall {
    pub(crate) fn begin() -> Self {
        NativeCall {
            mark: GENERATION.get(),
        }
    }

    /// Converts the call's status into a `Result`.
    ///
    /// Extended success codes such as `SQLITE_OK_SYMLINK` count as success.
    /// On success, errors recorded during the call were recovered from by the
    /// callee and are dropped.
    pub(crate) fn check(self, rc: c_int) -> Result<()> {
        if codes::primary(rc) == codes::OK {
            if let Some(error) = self.take_recent() {
                tracing::trace!(%error, "dropping error recovered by the callee");
            }
            Ok(())
        } else {
            Err(self.raise(rc))
        }
    }

    /// Converts a failure status into an [`Error`], adopting only errors
    /// recorded during this call.
    pub(crate) fn raise(self, code: c_int) -> Error {
        let stale = PENDING.with_borrow_mut(|pending| {
            let split = pending.partition_point(|(generation, _)| *generation <= self.mark);
            pending.drain(..split).map(|(_, error)| error).collect::<Vec<_>>()
        });
        if let Some(stale) = fold(stale) {
            tracing::debug!(error = %stale, "discarding pending error from an earlier call");
        }
        adopt(code, self.take_recent())
    }

    /// Ends a call whose return value is not a status, failing with any
    /// error recorded during it.
    pub(crate) fn finish(self) -> Result<()> {
        match self.take_recent() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Ends the call, dropping errors recorded during it.
    ///
    /// Used when a failure status is an answer rather than an error, such as
    /// `SQLITE_NOTFOUND` from a file control.
    pub(crate) fn forget(self) {
        drop(self.take_recent());
    }

    fn take_recent(&self) -> Option<Error> {
        let recent = PENDING.with_borrow_mut(|pending| {
            let split = pending.partition_point(|(generation, _)| *generation <= self.mark);
            pending.split_off(split)
        });
        fold(recent.into_iter().map(|(_, error)| error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear() {
        let _ = take_pending();
    }

    #[test]
    fn error_codes_are_never_ok() {
        let err = Error::with_message(codes::OK, "odd");
        assert_eq!(err.code(), codes::ERROR);
    }

    #[test]
    fn variant_codes() {
        assert_eq!(Error::NotImplemented { operation: "xRead" }.code(), codes::ERROR);
        assert_eq!(Error::FileClosed { operation: "xRead" }.code(), codes::MISUSE);
        assert_eq!(
            Error::NotFound {
                what: "vfs",
                name: "nope".into()
            }
            .code(),
            codes::NOTFOUND
        );
        assert_eq!(
            Error::TooBig {
                operation: "xFullPathname",
                size: 10,
                limit: 5
            }
            .code(),
            codes::TOOBIG
        );
    }

    #[test]
    fn context_keeps_code() {
        let err = Error::new(codes::IOERR_SHORT_READ).with_context("xRead", "amount=10 offset=0");
        assert_eq!(err.code(), codes::IOERR_SHORT_READ);
        assert!(err.to_string().starts_with("xRead(amount=10 offset=0): "));
        assert!(matches!(err.root(), Error::Sqlite { .. }));
    }

    #[test]
    fn busy_is_recognised_through_extended_codes() {
        let extended = codes::BUSY | (2 << 8);
        assert!(Error::new(extended).is_busy());
        assert!(!Error::new(codes::IOERR).is_busy());
    }

    #[test]
    fn translate_records_pending() {
        clear();
        let code = translate(Error::new(codes::CANTOPEN));
        assert_eq!(code, codes::CANTOPEN);
        assert!(has_pending());
        let err = take_pending().unwrap();
        assert_eq!(err.code(), codes::CANTOPEN);
        assert!(!has_pending());
    }

    #[test]
    fn second_translation_chains_most_recent_first() {
        clear();
        translate(Error::new(codes::IOERR));
        translate(Error::new(codes::CANTOPEN));
        let err = take_pending().unwrap();
        assert_eq!(err.code(), codes::CANTOPEN);
        assert_eq!(err.previous().unwrap().code(), codes::IOERR);
        assert_eq!(err.chain_len(), 2);
    }

    #[test]
    fn chains_are_bounded() {
        clear();
        for _ in 0..(MAX_CHAIN * 2) {
            translate(Error::new(codes::IOERR));
        }
        let err = take_pending().unwrap();
        assert!(err.chain_len() <= MAX_CHAIN);
    }

    #[test]
    fn raise_adopts_matching_pending_error() {
        clear();
        translate(Error::TooBig {
            operation: "xFullPathname",
            size: 100,
            limit: 65,
        });
        let err = raise_from_code(codes::TOOBIG);
        assert!(matches!(err, Error::TooBig { .. }));
        assert!(!has_pending());
    }

    #[test]
    fn raise_chains_mismatched_pending_error() {
        clear();
        translate(Error::new(codes::IOERR));
        let err = raise_from_code(codes::CANTOPEN);
        assert_eq!(err.code(), codes::CANTOPEN);
        assert_eq!(err.previous().unwrap().code(), codes::IOERR);
    }

    #[test]
    fn raise_without_pending_creates_fresh_error() {
        clear();
        let err = raise_from_code(codes::BUSY);
        assert!(matches!(err, Error::Sqlite { code, .. } if code == codes::BUSY));
    }

    #[test]
    fn native_call_maps_ok() {
        clear();
        assert!(NativeCall::begin().check(codes::OK).is_ok());
        assert!(NativeCall::begin().check(codes::OK | (2 << 8)).is_ok());
        assert!(NativeCall::begin().check(codes::IOERR).is_err());
    }

    #[test]
    fn native_call_adopts_errors_recorded_during_it() {
        clear();
        let call = NativeCall::begin();
        translate(Error::new(codes::IOERR));
        translate(Error::new(codes::CANTOPEN));
        let err = call.check(codes::CANTOPEN).unwrap_err();
        assert_eq!(err.chain_len(), 2);
        assert!(!has_pending());
    }

    #[test]
    fn native_call_discards_errors_from_earlier_calls() {
        clear();
        translate(Error::new(codes::CANTOPEN));
        translate(Error::new(codes::IOERR));
        assert!(has_pending());

        let call = NativeCall::begin();
        let err = call.raise(codes::CANTOPEN);
        assert_eq!(err.chain_len(), 1);
        assert!(matches!(err, Error::Sqlite { code, .. } if code == codes::CANTOPEN));
        assert!(!has_pending());
    }

    #[test]
    fn stale_errors_do_not_ride_along_with_fresh_ones() {
        clear();
        translate(Error::new(codes::IOERR));
        let call = NativeCall::begin();
        translate(Error::TooBig {
            operation: "xFullPathname",
            size: 100,
            limit: 65,
        });
        let err = call.raise(codes::TOOBIG);
        assert!(matches!(err, Error::TooBig { .. }));
        assert_eq!(err.chain_len(), 1);
    }

    #[test]
    fn successful_call_drops_only_its_own_errors() {
        clear();
        translate(Error::new(codes::IOERR));
        let call = NativeCall::begin();
        translate(Error::new(codes::NOTFOUND));
        call.check(codes::OK).unwrap();
        let left = take_pending().unwrap();
        assert_eq!(left.code(), codes::IOERR);
        assert_eq!(left.chain_len(), 1);
    }

    #[test]
    fn forgotten_call_leaves_nothing_behind() {
        clear();
        let call = NativeCall::begin();
        translate(Error::new(codes::NOTFOUND));
        call.forget();
        assert!(!has_pending());
    }

    #[test]
    fn from_nul_error() {
        let err: Error = std::ffi::CString::new("a\0b").unwrap_err().into();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn from_io_error() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(err.code(), codes::IOERR);
    }
}
