use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use libsqlite3_sys as ffi;

use super::NativeFile;
use crate::error::NativeCall;
use crate::scope::FileName;
use crate::types::{AccessFlags, DlSymbol, OpenFlags, SystemCall};
use crate::vfs::Vfs;
use crate::{Error, Result, chain, codes};

/// A VFS registered with the engine.
///
/// Cloning is cheap. When the VFS is an adapter registered by this crate,
/// every clone keeps that registration alive.
#[derive(Clone)]
pub struct NativeVfs {
    ptr: NonNull<ffi::sqlite3_vfs>,
    owner: Option<Arc<Vfs>>,
}

// SAFETY: the engine's VFS structures are immutable while registered and
// their methods are thread safe.
unsafe impl Send for NativeVfs {}
// SAFETY: as above.
unsafe impl Sync for NativeVfs {}

impl NativeVfs {
    /// Finds a registered VFS by name.
    ///
    /// The empty name finds the default VFS.
    pub fn find(name: &str) -> Result<Self> {
        let found = if name.is_empty() {
            // SAFETY: NULL asks for the default VFS.
            unsafe { ffi::sqlite3_vfs_find(ptr::null()) }
        } else {
            let cname = CString::new(name)?;
            // SAFETY: cname is NUL terminated.
            unsafe { ffi::sqlite3_vfs_find(cname.as_ptr()) }
        };
        let ptr = NonNull::new(found).ok_or_else(|| Error::NotFound {
            what: "vfs",
            name: name.to_owned(),
        })?;
        Ok(Self::from_ptr(ptr))
    }

    /// The engine's default VFS.
    pub fn default_vfs() -> Result<Self> {
        Self::find("")
    }

    pub(crate) fn from_ptr(ptr: NonNull<ffi::sqlite3_vfs>) -> Self {
        NativeVfs {
            ptr,
            owner: chain::lookup(ptr.as_ptr()),
        }
    }

    fn raw(&self) -> &ffi::sqlite3_vfs {
        // SAFETY: registered structures outlive every NativeVfs: the engine's
        // are static and adapters are kept alive by `owner`.
        unsafe { self.ptr.as_ref() }
    }

    /// The raw structure, for passing to engine functions.
    pub fn as_ptr(&self) -> *mut ffi::sqlite3_vfs {
        self.ptr.as_ptr()
    }

    /// The registered name.
    pub fn name(&self) -> String {
        let name = self.raw().zName;
        if name.is_null() {
            String::new()
        } else {
            // SAFETY: zName is NUL terminated.
            unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
        }
    }

    /// The native table version.
    pub fn version(&self) -> c_int {
        self.raw().iVersion
    }

    /// Maximum pathname length.
    pub fn max_pathname(&self) -> c_int {
        self.raw().mxPathname
    }

    /// Size of the per-file structure.
    pub fn os_file_size(&self) -> c_int {
        self.raw().szOsFile
    }

    /// Returns `true` if this VFS is an adapter registered by this crate.
    pub fn is_adapter(&self) -> bool {
        self.owner.is_some()
    }

    /// The adapter registration, if this VFS is one.
    pub fn registration(&self) -> Option<&Arc<Vfs>> {
        self.owner.as_ref()
    }

    fn has_version(&self, version: c_int, operation: &'static str) -> Result<()> {
        if self.version() >= version {
            Ok(())
        } else {
            Err(Error::NotImplemented { operation })
        }
    }

    /// Opens a file. `None` asks for a temporary file.
    pub fn open(&self, name: Option<&FileName>, flags: &mut OpenFlags) -> Result<NativeFile> {
        NativeFile::open(self.clone(), name, flags)
    }

    /// Deletes a file.
    pub fn delete(&self, name: &str, sync_dir: bool) -> Result<()> {
        let x_delete = slot!(self.raw(), xDelete, "xDelete")?;
        let name = CString::new(name)?;
        let call = NativeCall::begin();
        // SAFETY: valid structure and NUL terminated name.
        let rc = unsafe { x_delete(self.as_ptr(), name.as_ptr(), c_int::from(sync_dir)) };
        call.check(rc)
    }

    /// Checks a file's accessibility.
    pub fn access(&self, name: &str, flags: AccessFlags) -> Result<bool> {
        let x_access = slot!(self.raw(), xAccess, "xAccess")?;
        let name = CString::new(name)?;
        let mut result: c_int = 0;
        let call = NativeCall::begin();
        // SAFETY: valid structure, name and output pointer.
        let rc = unsafe { x_access(self.as_ptr(), name.as_ptr(), flags.to_raw(), &mut result) };
        call.check(rc)?;
        Ok(result != 0)
    }

    /// Resolves `name` to an absolute pathname.
    pub fn full_pathname(&self, name: &str) -> Result<String> {
        let x_full_pathname = slot!(self.raw(), xFullPathname, "xFullPathname")?;
        let name = CString::new(name)?;
        let size = usize::try_from(self.max_pathname()).unwrap_or(0) + 1;
        let mut buf = vec![0u8; size];
        let n_out = c_int::try_from(size).map_err(|_| Error::InvalidArgument("max_pathname too large".into()))?;
        let call = NativeCall::begin();
        // SAFETY: buf holds n_out bytes.
        let rc = unsafe {
            x_full_pathname(self.as_ptr(), name.as_ptr(), n_out, buf.as_mut_ptr().cast::<c_char>())
        };
        call.check(rc)?;
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        buf.truncate(len);
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Loads a shared library. Returns NULL on failure.
    pub fn dl_open(&self, filename: &str) -> Result<*mut c_void> {
        let x_dl_open = slot!(self.raw(), xDlOpen, "xDlOpen")?;
        let filename = CString::new(filename)?;
        // SAFETY: valid structure and name.
        Ok(unsafe { x_dl_open(self.as_ptr(), filename.as_ptr()) })
    }

    /// The most recent library loading error.
    pub fn dl_error(&self) -> Result<Option<String>> {
        let x_dl_error = slot!(self.raw(), xDlError, "xDlError")?;
        let mut buf = vec![0u8; 512];
        let n = buf.len() as c_int - 1;
        // SAFETY: buf is writable for n + 1 bytes.
        unsafe { x_dl_error(self.as_ptr(), n, buf.as_mut_ptr().cast::<c_char>()) };
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Ok((len > 0).then(|| String::from_utf8_lossy(&buf[..len]).into_owned()))
    }

    /// Looks up `symbol` in a library returned by [`NativeVfs::dl_open`].
    ///
    /// # Safety
    ///
    /// `handle` must have come from `dl_open` on this VFS and not been closed.
    pub unsafe fn dl_sym(&self, handle: *mut c_void, symbol: &str) -> Result<Option<DlSymbol>> {
        let x_dl_sym = slot!(self.raw(), xDlSym, "xDlSym")?;
        let symbol = CString::new(symbol)?;
        // SAFETY: caller guarantees the handle.
        Ok(unsafe { x_dl_sym(self.as_ptr(), handle, symbol.as_ptr()) })
    }

    /// Closes a library returned by [`NativeVfs::dl_open`].
    ///
    /// # Safety
    ///
    /// `handle` must have come from `dl_open` on this VFS and not been closed.
    pub unsafe fn dl_close(&self, handle: *mut c_void) -> Result<()> {
        let x_dl_close = slot!(self.raw(), xDlClose, "xDlClose")?;
        // SAFETY: caller guarantees the handle.
        unsafe { x_dl_close(self.as_ptr(), handle) };
        Ok(())
    }

    /// Up to `amount` bytes of randomness.
    pub fn randomness(&self, amount: usize) -> Result<Vec<u8>> {
        let x_randomness = slot!(self.raw(), xRandomness, "xRandomness")?;
        let amount = c_int::try_from(amount).map_err(|_| Error::InvalidArgument("randomness request too large".into()))?;
        let mut buf = vec![0u8; amount as usize];
        // SAFETY: buf holds amount bytes.
        let produced = unsafe { x_randomness(self.as_ptr(), amount, buf.as_mut_ptr().cast::<c_char>()) };
        buf.truncate(produced.clamp(0, amount) as usize);
        Ok(buf)
    }

    /// Sleeps for about `microseconds`; returns the time actually slept.
    pub fn sleep(&self, microseconds: c_int) -> Result<c_int> {
        let x_sleep = slot!(self.raw(), xSleep, "xSleep")?;
        // SAFETY: valid structure.
        Ok(unsafe { x_sleep(self.as_ptr(), microseconds) })
    }

    /// The current time as a Julian day number.
    pub fn current_time(&self) -> Result<f64> {
        let x_current_time = slot!(self.raw(), xCurrentTime, "xCurrentTime")?;
        let mut now = 0.0;
        let call = NativeCall::begin();
        // SAFETY: valid structure and output pointer.
        call.check(unsafe { x_current_time(self.as_ptr(), &mut now) })?;
        Ok(now)
    }

    /// The current time as milliseconds since the Julian epoch. Version 2.
    pub fn current_time_int64(&self) -> Result<i64> {
        self.has_version(2, "xCurrentTimeInt64")?;
        let x_current_time_int64 = slot!(self.raw(), xCurrentTimeInt64, "xCurrentTimeInt64")?;
        let mut now: ffi::sqlite3_int64 = 0;
        let call = NativeCall::begin();
        // SAFETY: valid structure and output pointer.
        call.check(unsafe { x_current_time_int64(self.as_ptr(), &mut now) })?;
        Ok(now)
    }

    /// The last OS error code and message.
    ///
    /// Fails only when an adapter's handler could not answer.
    pub fn get_last_error(&self) -> Result<(c_int, Option<String>)> {
        let x_get_last_error = slot!(self.raw(), xGetLastError, "xGetLastError")?;
        let mut buf = vec![0u8; 1024];
        let call = NativeCall::begin();
        // SAFETY: buf holds the advertised number of bytes.
        let code = unsafe {
            x_get_last_error(self.as_ptr(), buf.len() as c_int, buf.as_mut_ptr().cast::<c_char>())
        };
        call.finish()?;
        let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        let message = (len > 0).then(|| String::from_utf8_lossy(&buf[..len]).into_owned());
        Ok((code, message))
    }

    /// Replaces a system call; `None` restores the default. Version 3.
    ///
    /// # Safety
    ///
    /// `call` must have the signature of the system call it replaces.
    pub unsafe fn set_system_call(&self, name: Option<&str>, call: Option<SystemCall>) -> Result<()> {
        self.has_version(3, "xSetSystemCall")?;
        let x_set_system_call = slot!(self.raw(), xSetSystemCall, "xSetSystemCall")?;
        let name = name.map(CString::new).transpose()?;
        let name_ptr = name.as_ref().map_or(ptr::null(), |n| n.as_ptr());
        let native = NativeCall::begin();
        // SAFETY: caller guarantees the replacement's signature.
        let rc = unsafe { x_set_system_call(self.as_ptr(), name_ptr, call) };
        if rc == codes::NOTFOUND {
            native.forget();
            return Err(not_found_syscall(name.as_deref()));
        }
        native.check(rc)
    }

    /// The current implementation of a system call. Version 3.
    pub fn get_system_call(&self, name: &str) -> Result<Option<SystemCall>> {
        self.has_version(3, "xGetSystemCall")?;
        let x_get_system_call = slot!(self.raw(), xGetSystemCall, "xGetSystemCall")?;
        let cname = CString::new(name)?;
        // SAFETY: valid structure and name.
        Ok(unsafe { x_get_system_call(self.as_ptr(), cname.as_ptr()) })
    }

    /// The system call after `name`, or the first one for `None`. Version 3.
    pub fn next_system_call(&self, name: Option<&str>) -> Result<Option<String>> {
        self.has_version(3, "xNextSystemCall")?;
        let x_next_system_call = slot!(self.raw(), xNextSystemCall, "xNextSystemCall")?;
        let name = name.map(CString::new).transpose()?;
        let name_ptr = name.as_ref().map_or(ptr::null(), |n| n.as_ptr());
        // SAFETY: valid structure; the result points at a static name.
        let next = unsafe { x_next_system_call(self.as_ptr(), name_ptr) };
        if next.is_null() {
            Ok(None)
        } else {
            // SAFETY: NUL terminated.
            Ok(Some(unsafe { CStr::from_ptr(next) }.to_string_lossy().into_owned()))
        }
    }
}

fn not_found_syscall(name: Option<&CStr>) -> Error {
    Error::NotFound {
        what: "system call",
        name: name.map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
    }
}

impl PartialEq for NativeVfs {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for NativeVfs {}

impl fmt::Debug for NativeVfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeVfs")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("adapter", &self.is_adapter())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_default() {
        let vfs = NativeVfs::default_vfs().unwrap();
        assert!(!vfs.name().is_empty());
        assert!(!vfs.is_adapter());
        assert!((1..=3).contains(&vfs.version()));
    }

    #[test]
    fn missing_vfs_is_not_found() {
        let err = NativeVfs::find("no-such-vfs").unwrap_err();
        assert!(matches!(err, Error::NotFound { what: "vfs", .. }));
    }

    #[cfg(unix)]
    #[test]
    fn unix_vfs_basics() {
        let vfs = NativeVfs::find("unix").unwrap();
        assert_eq!(vfs.name(), "unix");
        assert_eq!(vfs.version(), 3);
        assert!(vfs.current_time().unwrap() > 2_400_000.0);
        assert!(vfs.current_time_int64().unwrap() > 0);
        assert_eq!(vfs.randomness(16).unwrap().len(), 16);
        let path = vfs.full_pathname("relative.db").unwrap();
        assert!(path.starts_with('/'));
        assert!(path.ends_with("relative.db"));
    }

    #[cfg(unix)]
    #[test]
    fn unix_system_calls() {
        let vfs = NativeVfs::find("unix").unwrap();
        let first = vfs.next_system_call(None).unwrap().unwrap();
        assert!(vfs.get_system_call(&first).unwrap().is_some());
        let err = unsafe { vfs.set_system_call(Some("no_such_call"), None) }.unwrap_err();
        assert!(err.is_not_found());
    }
}
