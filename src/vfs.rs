//! Adapter VFS registration and the VFS-level native table.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::fmt;
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use libsqlite3_sys as ffi;
use parking_lot::Mutex;

use crate::error::{NativeCall, translate};
use crate::file::AdapterFile;
use crate::scope::{CallScope, FileName, ScopedFilenameView};
use crate::types::{AccessFlags, DEFAULT_MAX_PATHNAME, DlSymbol, OpenFlags, VfsMethod, VfsMethods};
use crate::{Error, NativeVfs, Result, VfsHandler, VfsOptions, chain, codes, execution, unraisable};

/// A VFS registered with the engine whose operations are implemented by a
/// [`VfsHandler`].
///
/// Registration returns an `Arc<Vfs>`. The VFS stays registered until
/// [`Vfs::unregister`] is called or the last reference is dropped. Files
/// opened through it and adapters that delegate to it hold references too.
///
/// # Examples
///
/// ```rust
/// use vfs_bridge::{Vfs, VfsHandler, VfsOptions, NativeVfs};
///
/// struct Passthrough;
/// impl VfsHandler for Passthrough {}
///
/// let vfs = Vfs::register(Passthrough, VfsOptions::new("doc-passthrough").with_default_base())?;
/// assert!(vfs.is_registered());
/// assert_eq!(NativeVfs::find("doc-passthrough")?.name(), "doc-passthrough");
///
/// vfs.unregister()?;
/// assert!(NativeVfs::find("doc-passthrough").is_err());
/// # Ok::<(), vfs_bridge::Error>(())
/// ```
pub struct Vfs {
    label: String,
    name: Option<CString>,
    native: NonNull<ffi::sqlite3_vfs>,
    handler: Arc<dyn VfsHandler>,
    base: Option<NativeVfs>,
    excluded: VfsMethods,
    installed: VfsMethods,
    registered: AtomicBool,
    syscall_names: Mutex<Vec<CString>>,
}

// SAFETY: the native structure is written only before registration and
// during drop; every other field is thread safe.
unsafe impl Send for Vfs {}
// SAFETY: as above.
unsafe impl Sync for Vfs {}

impl Vfs {
    /// Registers `handler` under the options' name.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for a version outside 1 to 3, a bad name,
    ///   a name another registered adapter uses, or a base that would
    ///   delegate back to this name
    /// - [`Error::NotFound`] if the base does not exist or has an unknown version
    /// - the engine's error if it rejects the registration
    pub fn register<H: VfsHandler>(handler: H, options: VfsOptions) -> Result<Arc<Vfs>> {
        Self::register_shared(Arc::new(handler), options)
    }

    /// Like [`Vfs::register`], for a handler that is already shared.
    pub fn register_shared(handler: Arc<dyn VfsHandler>, options: VfsOptions) -> Result<Arc<Vfs>> {
        options.validate()?;
        // Serialises registrations so the name check and the engine call agree.
        let _guard = execution::enter();
        let base = chain::resolve_base(&options)?;
        chain::ensure_unique(&options.name)?;
        let vfs = Self::build(handler, &options, base)?;
        let call = NativeCall::begin();
        // SAFETY: the structure is fully initialised and lives until drop.
        let rc = unsafe { ffi::sqlite3_vfs_register(vfs.native.as_ptr(), c_int::from(options.make_default)) };
        // On failure dropping `vfs` releases everything built so far.
        call.check(rc).map_err(|e| e.with_context("sqlite3_vfs_register", format!("name={:?}", options.name)))?;
        vfs.registered.store(true, Ordering::Release);
        tracing::debug!(
            name = %vfs.label,
            base = ?vfs.base.as_ref().map(NativeVfs::name),
            version = vfs.version(),
            max_pathname = vfs.max_pathname(),
            make_default = options.make_default,
            "registered vfs"
        );
        Ok(vfs)
    }

    fn build(handler: Arc<dyn VfsHandler>, options: &VfsOptions, base: Option<NativeVfs>) -> Result<Arc<Vfs>> {
        let max_pathname = match (options.max_pathname, &base) {
            (0, Some(base)) => base.max_pathname(),
            (0, None) => DEFAULT_MAX_PATHNAME,
            (explicit, _) => explicit,
        };
        let excluded: VfsMethods = options.excluded_methods().collect();
        let mut installed = handler.methods().intersection(VfsMethods::for_version(options.version));
        for method in excluded.iter() {
            installed.remove(method);
        }
        let name = CString::new(options.name.as_str())?;
        let table = native_table(options.version, max_pathname, name.as_ptr(), installed);
        let native = NonNull::from(Box::leak(Box::new(table)));

        let vfs = Arc::new(Vfs {
            label: options.name.clone(),
            name: Some(name),
            native,
            handler,
            base,
            excluded,
            installed,
            registered: AtomicBool::new(false),
            syscall_names: Mutex::new(Vec::new()),
        });
        // SAFETY: not yet visible to the engine.
        unsafe { (*native.as_ptr()).pAppData = Arc::as_ptr(&vfs).cast_mut().cast::<c_void>() };
        chain::track(&vfs);
        Ok(vfs)
    }

    /// A registration that was never handed to the engine.
    #[cfg(test)]
    pub(crate) fn unregistered(handler: Arc<dyn VfsHandler>) -> Arc<Vfs> {
        Self::build(handler, &VfsOptions::new("unregistered"), None)
            .unwrap_or_else(|e| panic!("building test vfs: {e}"))
    }

    /// The registered name.
    pub fn name(&self) -> &str {
        &self.label
    }

    /// The VFS this one delegates to.
    pub fn base(&self) -> Option<&NativeVfs> {
        self.base.as_ref()
    }

    /// The base VFS, or [`Error::NotImplemented`] for `operation` if there is none.
    pub fn require_base(&self, operation: &'static str) -> Result<&NativeVfs> {
        self.base.as_ref().ok_or(Error::NotImplemented { operation })
    }

    /// The handler.
    pub fn handler(&self) -> &Arc<dyn VfsHandler> {
        &self.handler
    }

    /// The native table version.
    pub fn version(&self) -> c_int {
        self.table().iVersion
    }

    /// Maximum pathname length.
    pub fn max_pathname(&self) -> c_int {
        self.table().mxPathname
    }

    /// Size of the per-file structure.
    pub fn os_file_size(&self) -> c_int {
        self.table().szOsFile
    }

    /// Methods excluded by the options.
    pub fn excluded(&self) -> VfsMethods {
        self.excluded
    }

    /// Methods with an installed native slot.
    pub fn installed(&self) -> VfsMethods {
        self.installed
    }

    /// Returns `true` until [`Vfs::unregister`] runs.
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// This VFS as seen by the engine.
    pub fn native(&self) -> NativeVfs {
        NativeVfs::from_ptr(self.native)
    }

    /// The raw structure.
    pub fn as_ptr(&self) -> *mut ffi::sqlite3_vfs {
        self.native.as_ptr()
    }

    /// Removes the VFS from the engine. Calling it again does nothing.
    pub fn unregister(&self) -> Result<()> {
        let call = NativeCall::begin();
        // SAFETY: unregistering an unknown VFS is a no-op for the engine.
        let rc = unsafe { ffi::sqlite3_vfs_unregister(self.native.as_ptr()) };
        if self.registered.swap(false, Ordering::AcqRel) {
            tracing::debug!(name = %self.label, "unregistered vfs");
        }
        call.check(rc)
    }

    fn table(&self) -> &ffi::sqlite3_vfs {
        // SAFETY: owned by self and only written before registration.
        unsafe { self.native.as_ref() }
    }

    fn intern_syscall_name(&self, name: String) -> *const c_char {
        let Ok(name) = CString::new(name) else {
            return ptr::null();
        };
        let mut names = self.syscall_names.lock();
        if let Some(existing) = names.iter().find(|n| **n == name) {
            return existing.as_ptr();
        }
        let ptr = name.as_ptr();
        names.push(name);
        ptr
    }
}

impl Drop for Vfs {
    fn drop(&mut self) {
        if let Err(error) = self.unregister() {
            unraisable::report("sqlite3_vfs_unregister", error);
        }
        chain::forget(self.native.as_ptr());
        self.base.take();
        self.name.take();
        // SAFETY: allocated in build and no longer reachable by the engine.
        drop(unsafe { Box::from_raw(self.native.as_ptr()) });
    }
}

impl fmt::Debug for Vfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vfs")
            .field("name", &self.label)
            .field("base", &self.base.as_ref().map(NativeVfs::name))
            .field("version", &self.version())
            .field("max_pathname", &self.max_pathname())
            .field("installed", &self.installed)
            .field("registered", &self.is_registered())
            .finish()
    }
}

/// Names of every registered VFS, default first.
pub fn vfs_names() -> Vec<String> {
    let mut names = Vec::new();
    // SAFETY: NULL finds the default VFS; the list is only read.
    let mut current = unsafe { ffi::sqlite3_vfs_find(ptr::null()) };
    while let Some(vfs) = NonNull::new(current) {
        // SAFETY: registered structures are valid.
        let vfs = unsafe { vfs.as_ref() };
        if !vfs.zName.is_null() {
            // SAFETY: NUL terminated.
            names.push(unsafe { CStr::from_ptr(vfs.zName) }.to_string_lossy().into_owned());
        }
        current = vfs.pNext;
    }
    names
}

macro_rules! install {
    ($installed:expr, $method:ident, $thunk:expr) => {
        if $installed.contains(VfsMethod::$method) {
            Some($thunk)
        } else {
            None
        }
    };
}

fn native_table(version: c_int, max_pathname: c_int, name: *const c_char, installed: VfsMethods) -> ffi::sqlite3_vfs {
    ffi::sqlite3_vfs {
        iVersion: version,
        szOsFile: std::mem::size_of::<AdapterFile>() as c_int,
        mxPathname: max_pathname,
        pNext: ptr::null_mut(),
        zName: name,
        pAppData: ptr::null_mut(),
        xOpen: install!(installed, Open, x_open),
        xDelete: install!(installed, Delete, x_delete),
        xAccess: install!(installed, Access, x_access),
        xFullPathname: install!(installed, FullPathname, x_full_pathname),
        xDlOpen: install!(installed, DlOpen, x_dl_open),
        xDlError: install!(installed, DlError, x_dl_error),
        xDlSym: install!(installed, DlSym, x_dl_sym),
        xDlClose: install!(installed, DlClose, x_dl_close),
        xRandomness: install!(installed, Randomness, x_randomness),
        xSleep: install!(installed, Sleep, x_sleep),
        xCurrentTime: install!(installed, CurrentTime, x_current_time),
        xGetLastError: install!(installed, GetLastError, x_get_last_error),
        xCurrentTimeInt64: install!(installed, CurrentTimeInt64, x_current_time_int64),
        xSetSystemCall: install!(installed, SetSystemCall, x_set_system_call),
        xGetSystemCall: install!(installed, GetSystemCall, x_get_system_call),
        xNextSystemCall: install!(installed, NextSystemCall, x_next_system_call),
    }
}

/// The registration behind a native structure.
///
/// # Safety
///
/// `vfs` must be a structure built by [`Vfs::build`] whose registration is
/// alive, which holds for every call the engine makes while it is registered.
unsafe fn registration<'a>(vfs: *mut ffi::sqlite3_vfs) -> &'a Vfs {
    // SAFETY: guaranteed by the caller.
    unsafe { &*(*vfs).pAppData.cast::<Vfs>() }
}

fn text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        // SAFETY: the engine passes NUL terminated strings.
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

/// Copies `message` into an engine buffer of `size` bytes, truncating and
/// NUL terminating it.
fn write_message(out: *mut c_char, size: c_int, message: &str) {
    let Ok(size) = usize::try_from(size) else {
        return;
    };
    if out.is_null() || size == 0 {
        return;
    }
    // SAFETY: the engine supplies `size` writable bytes.
    let out = unsafe { slice::from_raw_parts_mut(out.cast::<u8>(), size) };
    let len = message.len().min(size - 1);
    out[..len].copy_from_slice(&message.as_bytes()[..len]);
    out[len] = 0;
}

unsafe extern "C" fn x_open(
    vfs: *mut ffi::sqlite3_vfs,
    name: ffi::sqlite3_filename,
    file: *mut ffi::sqlite3_file,
    flags: c_int,
    out_flags: *mut c_int,
) -> c_int {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    let result = execution::run("xOpen", || {
        let scope = CallScope::new();
        let name = if name.is_null() {
            None
        } else if flags & (ffi::SQLITE_OPEN_URI | ffi::SQLITE_OPEN_MAIN_DB) != 0 {
            // SAFETY: valid for the duration of this call.
            Some(FileName::Uri(unsafe { ScopedFilenameView::new(name, scope.token()) }))
        } else {
            Some(FileName::Path(text(name)))
        };
        let mut open_flags = OpenFlags::new(flags);
        let handler = registration.handler.open(registration, name.as_ref(), &mut open_flags)?;
        let owner = unsafe {
            // SAFETY: pAppData came from Arc::as_ptr and the registration is alive.
            let ptr = (*vfs).pAppData.cast::<Vfs>().cast_const();
            Arc::increment_strong_count(ptr);
            Arc::from_raw(ptr)
        };
        // SAFETY: the engine allocated szOsFile bytes for the file.
        unsafe { AdapterFile::install(file, owner, handler) };
        if !out_flags.is_null() {
            // SAFETY: checked for NULL.
            unsafe { *out_flags = open_flags.output };
        }
        Ok(())
    });
    match result {
        Ok(()) => codes::OK,
        Err(error) => {
            // SAFETY: the header must read as unopened after a failure.
            unsafe { (*file).pMethods = ptr::null() };
            translate(error.with_context("xOpen", format!("name={:?} flags={flags:#x}", text(name))))
        }
    }
}

unsafe extern "C" fn x_delete(vfs: *mut ffi::sqlite3_vfs, name: *const c_char, sync_dir: c_int) -> c_int {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    let name = text(name);
    let result = execution::run("xDelete", || registration.handler.delete(registration, &name, sync_dir != 0));
    match result {
        Ok(()) => codes::OK,
        Err(error) if error.code() == codes::IOERR_DELETE_NOENT => {
            tracing::trace!(name, "delete of missing file");
            error.code()
        }
        Err(error) => translate(error.with_context("xDelete", format!("name={name:?} sync_dir={sync_dir}"))),
    }
}

unsafe extern "C" fn x_access(vfs: *mut ffi::sqlite3_vfs, name: *const c_char, flags: c_int, out: *mut c_int) -> c_int {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    let name = text(name);
    let result = execution::run("xAccess", || {
        let access = AccessFlags::from_raw(flags)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown access flags {flags}")))?;
        registration.handler.access(registration, &name, access)
    });
    match result {
        Ok(allowed) => {
            // SAFETY: the engine supplies the output slot.
            unsafe { *out = c_int::from(allowed) };
            codes::OK
        }
        Err(error) => translate(error.with_context("xAccess", format!("name={name:?} flags={flags}"))),
    }
}

unsafe extern "C" fn x_full_pathname(
    vfs: *mut ffi::sqlite3_vfs,
    name: *const c_char,
    n_out: c_int,
    out: *mut c_char,
) -> c_int {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    let name = text(name);
    let limit = usize::try_from(n_out).unwrap_or(0);
    let result = execution::run("xFullPathname", || {
        let full = registration.handler.full_pathname(registration, &name)?;
        if full.len() + 1 > limit {
            return Err(Error::TooBig {
                operation: "xFullPathname",
                size: full.len() + 1,
                limit,
            });
        }
        Ok(full)
    });
    match result {
        Ok(full) => {
            write_message(out, n_out, &full);
            codes::OK
        }
        Err(error) => translate(error.with_context("xFullPathname", format!("name={name:?}"))),
    }
}

unsafe extern "C" fn x_dl_open(vfs: *mut ffi::sqlite3_vfs, filename: *const c_char) -> *mut c_void {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    let filename = text(filename);
    let result = execution::run("xDlOpen", || registration.handler.dl_open(registration, &filename));
    result.unwrap_or_else(|error| {
        unraisable::report("xDlOpen", error);
        ptr::null_mut()
    })
}

unsafe extern "C" fn x_dl_error(vfs: *mut ffi::sqlite3_vfs, size: c_int, out: *mut c_char) {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    match execution::run("xDlError", || registration.handler.dl_error(registration)) {
        Ok(message) => write_message(out, size, message.as_deref().unwrap_or("")),
        Err(error) => {
            write_message(out, size, "");
            unraisable::report("xDlError", error);
        }
    }
}

unsafe extern "C" fn x_dl_sym(
    vfs: *mut ffi::sqlite3_vfs,
    handle: *mut c_void,
    symbol: *const c_char,
) -> Option<DlSymbol> {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    let symbol = text(symbol);
    let result = execution::run("xDlSym", || {
        // SAFETY: the engine passes a handle from xDlOpen.
        unsafe { registration.handler.dl_sym(registration, handle, &symbol) }
    });
    result.unwrap_or_else(|error| {
        unraisable::report("xDlSym", error);
        None
    })
}

unsafe extern "C" fn x_dl_close(vfs: *mut ffi::sqlite3_vfs, handle: *mut c_void) {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    let result = execution::run("xDlClose", || {
        // SAFETY: the engine passes a handle from xDlOpen.
        unsafe { registration.handler.dl_close(registration, handle) }
    });
    if let Err(error) = result {
        unraisable::report("xDlClose", error);
    }
}

unsafe extern "C" fn x_randomness(vfs: *mut ffi::sqlite3_vfs, amount: c_int, out: *mut c_char) -> c_int {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    let limit = usize::try_from(amount).unwrap_or(0);
    if out.is_null() || limit == 0 {
        return 0;
    }
    match execution::run("xRandomness", || registration.handler.randomness(registration, limit)) {
        Ok(bytes) => {
            let len = bytes.len().min(limit);
            // SAFETY: the engine supplies `amount` writable bytes.
            let out = unsafe { slice::from_raw_parts_mut(out.cast::<u8>(), limit) };
            out[..len].copy_from_slice(&bytes[..len]);
            len as c_int
        }
        Err(error) => {
            unraisable::report("xRandomness", error);
            0
        }
    }
}

unsafe extern "C" fn x_sleep(vfs: *mut ffi::sqlite3_vfs, microseconds: c_int) -> c_int {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    match execution::run("xSleep", || registration.handler.sleep(registration, microseconds)) {
        Ok(slept) => slept,
        Err(error) => {
            unraisable::report("xSleep", error);
            0
        }
    }
}

unsafe extern "C" fn x_current_time(vfs: *mut ffi::sqlite3_vfs, out: *mut f64) -> c_int {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    match execution::run("xCurrentTime", || registration.handler.current_time(registration)) {
        Ok(now) => {
            // SAFETY: the engine supplies the output slot.
            unsafe { *out = now };
            codes::OK
        }
        Err(error) => translate(error.with_context("xCurrentTime", "")),
    }
}

unsafe extern "C" fn x_current_time_int64(vfs: *mut ffi::sqlite3_vfs, out: *mut ffi::sqlite3_int64) -> c_int {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    match execution::run("xCurrentTimeInt64", || registration.handler.current_time_int64(registration)) {
        Ok(now) => {
            // SAFETY: the engine supplies the output slot.
            unsafe { *out = now };
            codes::OK
        }
        Err(error) => translate(error.with_context("xCurrentTimeInt64", "")),
    }
}

unsafe extern "C" fn x_get_last_error(vfs: *mut ffi::sqlite3_vfs, size: c_int, out: *mut c_char) -> c_int {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    match execution::run("xGetLastError", || registration.handler.get_last_error(registration)) {
        Ok((code, message)) => {
            write_message(out, size, message.as_deref().unwrap_or(""));
            code
        }
        Err(error) => {
            write_message(out, size, "");
            translate(error.with_context("xGetLastError", ""))
        }
    }
}

unsafe extern "C" fn x_set_system_call(
    vfs: *mut ffi::sqlite3_vfs,
    name: *const c_char,
    call: ffi::sqlite3_syscall_ptr,
) -> c_int {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    let name = (!name.is_null()).then(|| text(name));
    let result = execution::run("xSetSystemCall", || {
        // SAFETY: the engine forwards what the application installed.
        unsafe { registration.handler.set_system_call(registration, name.as_deref(), call) }
    });
    match result {
        Ok(()) => codes::OK,
        Err(error) if error.is_not_found() => codes::NOTFOUND,
        Err(error) => translate(error.with_context("xSetSystemCall", format!("name={name:?}"))),
    }
}

unsafe extern "C" fn x_get_system_call(vfs: *mut ffi::sqlite3_vfs, name: *const c_char) -> ffi::sqlite3_syscall_ptr {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    let name = text(name);
    match execution::run("xGetSystemCall", || registration.handler.get_system_call(registration, &name)) {
        Ok(call) => call,
        Err(error) if error.is_not_found() => None,
        Err(error) => {
            unraisable::report("xGetSystemCall", error);
            None
        }
    }
}

unsafe extern "C" fn x_next_system_call(vfs: *mut ffi::sqlite3_vfs, name: *const c_char) -> *const c_char {
    // SAFETY: called by the engine on a registered adapter.
    let registration = unsafe { registration(vfs) };
    let name = (!name.is_null()).then(|| text(name));
    let result = execution::run("xNextSystemCall", || {
        registration.handler.next_system_call(registration, name.as_deref())
    });
    match result {
        Ok(Some(next)) => registration.intern_syscall_name(next),
        Ok(None) => ptr::null(),
        Err(error) if error.is_not_found() => ptr::null(),
        Err(error) => {
            unraisable::report("xNextSystemCall", error);
            ptr::null()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;
    impl VfsHandler for Nothing {}

    struct OnlyAccess;
    impl VfsHandler for OnlyAccess {
        fn methods(&self) -> VfsMethods {
            VfsMethods::empty().with(VfsMethod::Access).with(VfsMethod::CurrentTimeInt64)
        }
    }

    #[test]
    fn slots_follow_declared_methods_and_version() {
        let vfs = Vfs::register(OnlyAccess, VfsOptions::new("unit-only-access").version(1)).unwrap();
        let table = vfs.table();
        assert!(table.xAccess.is_some());
        assert!(table.xOpen.is_none());
        assert!(table.xCurrentTimeInt64.is_none());
        assert_eq!(vfs.installed(), VfsMethods::empty().with(VfsMethod::Access));
        vfs.unregister().unwrap();
    }

    #[test]
    fn exclusions_remove_slots() {
        let options = VfsOptions::new("unit-exclude").exclude("xSleep").exclude("xDlOpen");
        let vfs = Vfs::register(Nothing, options).unwrap();
        assert!(vfs.table().xSleep.is_none());
        assert!(vfs.table().xDlOpen.is_none());
        assert!(vfs.table().xDelete.is_some());
        assert!(vfs.excluded().contains(VfsMethod::Sleep));
    }

    #[test]
    fn default_max_pathname_without_base() {
        let vfs = Vfs::register(Nothing, VfsOptions::new("unit-no-base")).unwrap();
        assert_eq!(vfs.max_pathname(), DEFAULT_MAX_PATHNAME);
        assert!(vfs.base().is_none());
        assert!(matches!(
            vfs.require_base("xOpen"),
            Err(Error::NotImplemented { operation: "xOpen" })
        ));
    }

    #[test]
    fn unregister_is_idempotent() {
        let vfs = Vfs::register(Nothing, VfsOptions::new("unit-idempotent")).unwrap();
        assert!(vfs_names().iter().any(|n| n == "unit-idempotent"));
        vfs.unregister().unwrap();
        vfs.unregister().unwrap();
        assert!(!vfs.is_registered());
        assert!(!vfs_names().iter().any(|n| n == "unit-idempotent"));
    }

    #[test]
    fn dropping_unregisters() {
        let vfs = Vfs::register(Nothing, VfsOptions::new("unit-drop")).unwrap();
        drop(vfs);
        assert!(NativeVfs::find("unit-drop").is_err());
    }

    #[test]
    fn file_structure_fits_adapter_file() {
        let vfs = Vfs::unregistered(Arc::new(Nothing));
        assert_eq!(vfs.os_file_size() as usize, std::mem::size_of::<AdapterFile>());
    }

    #[test]
    fn message_truncation() {
        let mut buf = [0x55 as c_char; 6];
        write_message(buf.as_mut_ptr(), 6, "abcdefgh");
        assert_eq!(text(buf.as_ptr()), "abcde");
    }
}
