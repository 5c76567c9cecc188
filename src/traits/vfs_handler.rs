//! VFS-level operations.

use std::ffi::{c_int, c_void};

use crate::scope::FileName;
use crate::types::{AccessFlags, DlSymbol, OpenFlags, SystemCall, VfsMethods};
use crate::{FileHandler, Result, Vfs};

/// The operations of a VFS.
///
/// Methods receive the [`Vfs`] registration they were called through; the
/// default implementations forward to its base with
/// [`Vfs::require_base`], failing with
/// [`Error::NotImplemented`](crate::Error::NotImplemented) when there is
/// none.
///
/// # Thread Safety
///
/// The engine calls a VFS from any thread, so implementations must be
/// `Send + Sync`. Calls are serialised by the
/// [execution lock](crate::execution), but a handler that calls back into the
/// engine may be re-entered on the same thread.
///
/// # Object Safety
///
/// This trait is object-safe; registrations store it as `Arc<dyn VfsHandler>`.
pub trait VfsHandler: Send + Sync + 'static {
    /// The native slots this handler wants installed.
    ///
    /// Slots outside this set are left NULL, and the engine applies its own
    /// fallback for them. The default installs everything.
    fn methods(&self) -> VfsMethods {
        VfsMethods::all()
    }

    /// Opens a file. `name` is `None` for temporary files.
    ///
    /// `flags.output` is reported back to the engine and may be changed.
    fn open(
        &self,
        vfs: &Vfs,
        name: Option<&FileName>,
        flags: &mut OpenFlags,
    ) -> Result<Box<dyn FileHandler>> {
        let file = vfs.require_base("xOpen")?.open(name, flags)?;
        Ok(Box::new(file))
    }

    /// Deletes a file.
    ///
    /// # Errors
    ///
    /// Returning a `SQLITE_IOERR_DELETE_NOENT` error tells the engine the
    /// file did not exist; it is not treated as a failure.
    fn delete(&self, vfs: &Vfs, name: &str, sync_dir: bool) -> Result<()> {
        vfs.require_base("xDelete")?.delete(name, sync_dir)
    }

    /// Checks whether a file exists or is accessible.
    fn access(&self, vfs: &Vfs, name: &str, flags: AccessFlags) -> Result<bool> {
        vfs.require_base("xAccess")?.access(name, flags)
    }

    /// Resolves a name to an absolute pathname.
    ///
    /// # Errors
    ///
    /// The adapter rejects results longer than [`Vfs::max_pathname`] with
    /// [`Error::TooBig`](crate::Error::TooBig).
    fn full_pathname(&self, vfs: &Vfs, name: &str) -> Result<String> {
        vfs.require_base("xFullPathname")?.full_pathname(name)
    }

    /// Loads a shared library, returning NULL on failure.
    fn dl_open(&self, vfs: &Vfs, filename: &str) -> Result<*mut c_void> {
        vfs.require_base("xDlOpen")?.dl_open(filename)
    }

    /// The most recent library loading error.
    fn dl_error(&self, vfs: &Vfs) -> Result<Option<String>> {
        vfs.require_base("xDlError")?.dl_error()
    }

    /// Looks up a symbol in a loaded library.
    ///
    /// # Safety
    ///
    /// `handle` must come from [`VfsHandler::dl_open`] on the same VFS.
    unsafe fn dl_sym(&self, vfs: &Vfs, handle: *mut c_void, symbol: &str) -> Result<Option<DlSymbol>> {
        // SAFETY: forwarded from the caller.
        unsafe { vfs.require_base("xDlSym")?.dl_sym(handle, symbol) }
    }

    /// Closes a loaded library.
    ///
    /// # Safety
    ///
    /// `handle` must come from [`VfsHandler::dl_open`] on the same VFS.
    unsafe fn dl_close(&self, vfs: &Vfs, handle: *mut c_void) -> Result<()> {
        // SAFETY: forwarded from the caller.
        unsafe { vfs.require_base("xDlClose")?.dl_close(handle) }
    }

    /// Up to `amount` random bytes. Extra bytes are ignored.
    fn randomness(&self, vfs: &Vfs, amount: usize) -> Result<Vec<u8>> {
        vfs.require_base("xRandomness")?.randomness(amount)
    }

    /// Sleeps; returns the microseconds actually slept.
    fn sleep(&self, vfs: &Vfs, microseconds: c_int) -> Result<c_int> {
        vfs.require_base("xSleep")?.sleep(microseconds)
    }

    /// The current time as a Julian day number.
    fn current_time(&self, vfs: &Vfs) -> Result<f64> {
        vfs.require_base("xCurrentTime")?.current_time()
    }

    /// The current time in milliseconds since the Julian epoch.
    fn current_time_int64(&self, vfs: &Vfs) -> Result<i64> {
        vfs.require_base("xCurrentTimeInt64")?.current_time_int64()
    }

    /// The last OS error code and an optional description.
    fn get_last_error(&self, vfs: &Vfs) -> Result<(c_int, Option<String>)> {
        vfs.require_base("xGetLastError")?.get_last_error()
    }

    /// Replaces a system call. `None` for `name` restores all of them.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](crate::Error::NotFound) for unknown names; the
    /// engine receives `SQLITE_NOTFOUND` without an error being recorded.
    ///
    /// # Safety
    ///
    /// `call` must have the signature of the system call it replaces.
    unsafe fn set_system_call(&self, vfs: &Vfs, name: Option<&str>, call: Option<SystemCall>) -> Result<()> {
        // SAFETY: forwarded from the caller.
        unsafe { vfs.require_base("xSetSystemCall")?.set_system_call(name, call) }
    }

    /// The current implementation of a system call.
    fn get_system_call(&self, vfs: &Vfs, name: &str) -> Result<Option<SystemCall>> {
        vfs.require_base("xGetSystemCall")?.get_system_call(name)
    }

    /// The name of the system call after `name`, or the first for `None`.
    fn next_system_call(&self, vfs: &Vfs, name: Option<&str>) -> Result<Option<String>> {
        vfs.require_base("xNextSystemCall")?.next_system_call(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;
    impl VfsHandler for Passthrough {}

    #[test]
    fn object_safe() {
        let handler: Box<dyn VfsHandler> = Box::new(Passthrough);
        assert_eq!(handler.methods(), VfsMethods::all());
    }
}
