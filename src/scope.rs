//! Views over engine-owned memory that are only valid during one native call.
//!
//! The engine hands the adapter pointers (a packed URI filename, the three
//! string slots of a `PRAGMA` file control) that stay valid only until the
//! call that supplied them returns. Views wrap those pointers together with a
//! [`ScopeToken`]; when the supplying call ends its [`CallScope`] invalidates
//! the token and every later access fails with [`Error::OutOfScope`].
//!
//! Views are neither `Send` nor `Sync`: they belong to the thread of the
//! call that created them.

use std::cell::Cell;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::fmt;
use std::rc::Rc;

use libsqlite3_sys as ffi;

use crate::{Error, Result};

/// Shared validity flag of one native call.
#[derive(Clone)]
pub(crate) struct ScopeToken {
    alive: Rc<Cell<bool>>,
}

impl ScopeToken {
    fn check(&self, what: &'static str) -> Result<()> {
        if self.alive.get() {
            Ok(())
        } else {
            Err(Error::OutOfScope { what })
        }
    }
}

/// Invalidates its token when dropped.
pub(crate) struct CallScope {
    token: ScopeToken,
}

impl CallScope {
    pub(crate) fn new() -> Self {
        CallScope {
            token: ScopeToken {
                alive: Rc::new(Cell::new(true)),
            },
        }
    }

    pub(crate) fn token(&self) -> ScopeToken {
        self.token.clone()
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        self.token.alive.set(false);
    }
}

unsafe fn text(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: caller guarantees a NUL terminated string.
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

/// The name passed to a VFS `open`.
#[derive(Debug)]
pub enum FileName {
    /// A plain path, copied out of the engine's buffer.
    Path(String),
    /// A database filename with URI parameters attached.
    Uri(ScopedFilenameView),
}

impl FileName {
    /// The file path, if it can still be read.
    pub fn path(&self) -> Result<String> {
        match self {
            FileName::Path(path) => Ok(path.clone()),
            FileName::Uri(view) => view.filename(),
        }
    }
}

/// A borrowed, packed filename carrying URI query parameters.
///
/// Only valid for the duration of the `open` call that received it. Clones
/// share the same scope.
#[derive(Clone)]
pub struct ScopedFilenameView {
    ptr: ffi::sqlite3_filename,
    token: ScopeToken,
}

const FILENAME: &str = "filename view";

impl ScopedFilenameView {
    /// # Safety
    ///
    /// `ptr` must be a filename the engine passed to `xOpen` and stay valid
    /// while `token` is alive.
    pub(crate) unsafe fn new(ptr: ffi::sqlite3_filename, token: ScopeToken) -> Self {
        ScopedFilenameView { ptr, token }
    }

    pub(crate) fn as_ptr(&self) -> Result<ffi::sqlite3_filename> {
        self.token.check(FILENAME)?;
        Ok(self.ptr)
    }

    /// The filename itself, without parameters.
    pub fn filename(&self) -> Result<String> {
        let ptr = self.as_ptr()?;
        // SAFETY: in scope, so the engine buffer is alive.
        Ok(unsafe { text(ptr) }.unwrap_or_default())
    }

    /// The value of URI parameter `name`, or `None` when absent.
    pub fn parameter(&self, name: &str) -> Result<Option<String>> {
        let ptr = self.as_ptr()?;
        let name = CString::new(name)?;
        // SAFETY: in scope; the engine returns a pointer into the same buffer.
        Ok(unsafe { text(ffi::sqlite3_uri_parameter(ptr, name.as_ptr())) })
    }

    /// URI parameter `name` as an integer, `default` when absent or malformed.
    pub fn uri_int(&self, name: &str, default: i64) -> Result<i64> {
        let ptr = self.as_ptr()?;
        let name = CString::new(name)?;
        // SAFETY: in scope.
        Ok(unsafe { ffi::sqlite3_uri_int64(ptr, name.as_ptr(), default) })
    }

    /// URI parameter `name` as a boolean, `default` when absent.
    pub fn uri_boolean(&self, name: &str, default: bool) -> Result<bool> {
        let ptr = self.as_ptr()?;
        let name = CString::new(name)?;
        // SAFETY: in scope.
        Ok(unsafe { ffi::sqlite3_uri_boolean(ptr, name.as_ptr(), c_int::from(default)) } != 0)
    }

    /// All URI parameters in order.
    pub fn parameters(&self) -> Result<Vec<(String, String)>> {
        let ptr = self.as_ptr()?;
        let mut params = Vec::new();
        for index in 0.. {
            // SAFETY: in scope; the engine returns NULL past the last key.
            let key = unsafe { ffi::sqlite3_uri_key(ptr, index) };
            let Some(name) = (unsafe { text(key) }) else {
                break;
            };
            // SAFETY: as above.
            let value = unsafe { text(ffi::sqlite3_uri_parameter(ptr, key)) }.unwrap_or_default();
            params.push((name, value));
        }
        Ok(params)
    }

    /// The main database filename this name belongs to.
    pub fn database_filename(&self) -> Result<String> {
        let ptr = self.as_ptr()?;
        // SAFETY: in scope.
        Ok(unsafe { text(ffi::sqlite3_filename_database(ptr)) }.unwrap_or_default())
    }

    /// The rollback journal filename for this database.
    pub fn journal_filename(&self) -> Result<String> {
        let ptr = self.as_ptr()?;
        // SAFETY: in scope.
        Ok(unsafe { text(ffi::sqlite3_filename_journal(ptr)) }.unwrap_or_default())
    }

    /// The write-ahead log filename for this database.
    pub fn wal_filename(&self) -> Result<String> {
        let ptr = self.as_ptr()?;
        // SAFETY: in scope.
        Ok(unsafe { text(ffi::sqlite3_filename_wal(ptr)) }.unwrap_or_default())
    }

    /// Returns `true` while the supplying call is still running.
    pub fn is_in_scope(&self) -> bool {
        self.token.alive.get()
    }
}

impl fmt::Debug for ScopedFilenameView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.filename() {
            Ok(name) => f.debug_tuple("ScopedFilenameView").field(&name).finish(),
            Err(_) => f.write_str("ScopedFilenameView(<out of scope>)"),
        }
    }
}

const PRAGMA: &str = "pragma view";

/// The argument of a `SQLITE_FCNTL_PRAGMA` file control.
///
/// The engine passes three string slots: the result (written by the
/// handler), the pragma name, and its optional value.
pub struct PragmaView {
    args: *mut *mut c_char,
    token: ScopeToken,
}

impl PragmaView {
    /// # Safety
    ///
    /// `args` must point to the engine's three-element pragma array and stay
    /// valid while `token` is alive.
    pub(crate) unsafe fn new(args: *mut *mut c_char, token: ScopeToken) -> Self {
        PragmaView { args, token }
    }

    fn slot(&self, index: usize) -> Result<*mut *mut c_char> {
        self.token.check(PRAGMA)?;
        // SAFETY: in scope, and the array has three elements.
        Ok(unsafe { self.args.add(index) })
    }

    /// The pragma name, e.g. `"journal_mode"`.
    pub fn name(&self) -> Result<String> {
        let slot = self.slot(1)?;
        // SAFETY: slot is valid; the name is never NULL.
        Ok(unsafe { text(*slot) }.unwrap_or_default())
    }

    /// The value after `=`, if any.
    pub fn value(&self) -> Result<Option<String>> {
        let slot = self.slot(2)?;
        // SAFETY: slot is valid.
        Ok(unsafe { text(*slot) })
    }

    /// The result currently stored for the engine.
    pub fn result(&self) -> Result<Option<String>> {
        let slot = self.slot(0)?;
        // SAFETY: slot is valid.
        Ok(unsafe { text(*slot) })
    }

    /// Replaces the result, freeing the previous one.
    pub fn set_result(&self, result: Option<&str>) -> Result<()> {
        let slot = self.slot(0)?;
        let copy = match result {
            Some(result) => {
                let len = c_int::try_from(result.len()).map_err(|_| Error::TooBig {
                    operation: "xFileControl",
                    size: result.len(),
                    limit: c_int::MAX as usize,
                })?;
                // SAFETY: "%.*s" reads exactly `len` bytes.
                let copy = unsafe {
                    ffi::sqlite3_mprintf(c"%.*s".as_ptr(), len, result.as_ptr().cast::<c_char>())
                };
                if copy.is_null() {
                    return Err(Error::new(crate::codes::NOMEM));
                }
                copy
            }
            None => std::ptr::null_mut(),
        };
        // SAFETY: the previous result, if any, was allocated by the engine allocator.
        unsafe {
            let previous = *slot;
            if !previous.is_null() {
                ffi::sqlite3_free(previous.cast::<c_void>());
            }
            *slot = copy;
        }
        Ok(())
    }

    /// Removes the result.
    pub fn clear_result(&self) -> Result<()> {
        self.set_result(None)
    }
}

impl fmt::Debug for PragmaView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PragmaView")
            .field("name", &self.name().ok())
            .field("value", &self.value().ok().flatten())
            .finish()
    }
}

/// The argument of a file control call.
#[derive(Debug)]
pub struct FileControlArg {
    op: c_int,
    ptr: *mut c_void,
    pragma: Option<PragmaView>,
}

impl FileControlArg {
    pub(crate) fn new(op: c_int, ptr: *mut c_void, token: &ScopeToken) -> Self {
        let pragma = if op == ffi::SQLITE_FCNTL_PRAGMA && !ptr.is_null() {
            // SAFETY: the engine passes the three-element array for this opcode.
            Some(unsafe { PragmaView::new(ptr.cast::<*mut c_char>(), token.clone()) })
        } else {
            None
        };
        FileControlArg { op, ptr, pragma }
    }

    /// The file control opcode.
    pub fn op(&self) -> c_int {
        self.op
    }

    /// The raw argument pointer, whose meaning depends on the opcode.
    pub fn pointer(&self) -> *mut c_void {
        self.ptr
    }

    /// The pragma view for `SQLITE_FCNTL_PRAGMA`.
    pub fn pragma(&self) -> Option<&PragmaView> {
        self.pragma.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn pragma_view_reads_and_writes() {
        let name = CString::new("cache_note").unwrap();
        let value = CString::new("on").unwrap();
        let mut args: [*mut c_char; 3] = [
            ptr::null_mut(),
            name.as_ptr().cast_mut(),
            value.as_ptr().cast_mut(),
        ];
        let scope = CallScope::new();
        let view = unsafe { PragmaView::new(args.as_mut_ptr(), scope.token()) };

        assert_eq!(view.name().unwrap(), "cache_note");
        assert_eq!(view.value().unwrap().as_deref(), Some("on"));
        assert_eq!(view.result().unwrap(), None);

        view.set_result(Some("first")).unwrap();
        view.set_result(Some("second")).unwrap();
        assert_eq!(view.result().unwrap().as_deref(), Some("second"));
        view.clear_result().unwrap();
        assert!(args[0].is_null());
    }

    #[test]
    fn pragma_view_out_of_scope() {
        let name = CString::new("x").unwrap();
        let mut args: [*mut c_char; 3] = [ptr::null_mut(), name.as_ptr().cast_mut(), ptr::null_mut()];
        let scope = CallScope::new();
        let view = unsafe { PragmaView::new(args.as_mut_ptr(), scope.token()) };
        drop(scope);

        assert!(matches!(view.name(), Err(Error::OutOfScope { .. })));
        assert!(matches!(view.set_result(Some("x")), Err(Error::OutOfScope { .. })));
    }

    #[test]
    fn file_control_arg_only_wraps_pragma() {
        let scope = CallScope::new();
        let token = scope.token();
        let mut value: c_int = 0;
        let arg = FileControlArg::new(
            ffi::SQLITE_FCNTL_CHUNK_SIZE,
            (&mut value as *mut c_int).cast(),
            &token,
        );
        assert!(arg.pragma().is_none());
        assert_eq!(arg.op(), ffi::SQLITE_FCNTL_CHUNK_SIZE);
    }

    #[test]
    fn plain_file_name() {
        let name = FileName::Path("db.sqlite".into());
        assert_eq!(name.path().unwrap(), "db.sqlite");
    }
}
