//! The per-file native table.
//!
//! Every file opened through an adapter VFS is an [`AdapterFile`] placed in
//! the engine's per-file allocation: the `sqlite3_file` header the engine
//! reads, followed by the handler. Two method tables exist; the v2 table
//! adds the shared-memory methods and is chosen at open time when the
//! handler's base file has them.

use std::cell::RefCell;
use std::ffi::{CStr, c_char, c_int, c_void};
use std::ptr;
use std::slice;
use std::sync::Arc;

use libsqlite3_sys as ffi;

use crate::error::translate;
use crate::execution;
use crate::scope::{CallScope, FileControlArg};
use crate::types::{DEFAULT_SECTOR_SIZE, LockLevel, SyncFlags};
use crate::{Error, FileHandler, NativeFile, Result, Vfs, codes, unraisable};

#[repr(C)]
pub(crate) struct AdapterFile {
    base: ffi::sqlite3_file,
    state: RefCell<FileState>,
}

struct FileState {
    handler: Option<Box<dyn FileHandler>>,
    vfs: Option<Arc<Vfs>>,
}

impl AdapterFile {
    /// Writes an open adapter file into the engine's allocation.
    ///
    /// # Safety
    ///
    /// `out` must point to at least `size_of::<AdapterFile>()` writable
    /// bytes, suitably aligned.
    pub(crate) unsafe fn install(out: *mut ffi::sqlite3_file, vfs: Arc<Vfs>, mut handler: Box<dyn FileHandler>) {
        let shm = handler.base_file().is_some_and(|base| base.supports_shm());
        let methods: &'static ffi::sqlite3_io_methods = if shm { &IO_METHODS_V2 } else { &IO_METHODS_V1 };
        let file = AdapterFile {
            base: ffi::sqlite3_file { pMethods: methods },
            state: RefCell::new(FileState {
                handler: Some(handler),
                vfs: Some(vfs),
            }),
        };
        // SAFETY: guaranteed by the caller. The engine frees the memory
        // without dropping; xClose empties the state first.
        unsafe { out.cast::<AdapterFile>().write(file) };
    }
}

/// Calls `f` with the handler of `file`.
fn with_handler<T>(
    file: *mut ffi::sqlite3_file,
    operation: &'static str,
    f: impl FnOnce(&mut dyn FileHandler) -> Result<T>,
) -> Result<T> {
    // SAFETY: the engine only passes files opened by `install`, and the
    // memory stays valid until after xClose.
    let adapter = unsafe { &*file.cast::<AdapterFile>() };
    let mut state = adapter
        .state
        .try_borrow_mut()
        .map_err(|_| Error::Reentrant { operation })?;
    let handler = state
        .handler
        .as_deref_mut()
        .ok_or(Error::FileClosed { operation })?;
    f(handler)
}

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => codes::OK,
        Err(error) => translate(error),
    }
}

unsafe extern "C" fn x_close(file: *mut ffi::sqlite3_file) -> c_int {
    let result = execution::run("xClose", || {
        // SAFETY: see with_handler.
        let adapter = unsafe { &*file.cast::<AdapterFile>() };
        let (handler, vfs) = {
            let mut state = adapter
                .state
                .try_borrow_mut()
                .map_err(|_| Error::Reentrant { operation: "xClose" })?;
            (state.handler.take(), state.vfs.take())
        };
        // SAFETY: the header is ours to clear; later calls see a closed file.
        unsafe { (*file).pMethods = ptr::null() };
        let result = match handler {
            Some(mut handler) => handler.close(),
            None => Ok(()),
        };
        drop(vfs);
        result
    });
    status(result.map_err(|e| e.with_context("xClose", "")))
}

unsafe extern "C" fn x_read(file: *mut ffi::sqlite3_file, buf: *mut c_void, amount: c_int, offset: i64) -> c_int {
    let len = usize::try_from(amount).unwrap_or(0);
    // SAFETY: the engine supplies `amount` writable bytes.
    let out = unsafe { slice::from_raw_parts_mut(buf.cast::<u8>(), len) };
    let result = execution::run("xRead", || with_handler(file, "xRead", |h| h.read(len, offset)));
    match result {
        Ok(data) if data.len() == len => {
            out.copy_from_slice(&data);
            codes::OK
        }
        Ok(data) if data.len() < len => {
            out[..data.len()].copy_from_slice(&data);
            out[data.len()..].fill(0);
            tracing::trace!(amount, offset, got = data.len(), "short read");
            codes::IOERR_SHORT_READ
        }
        Ok(data) => {
            out.fill(0);
            translate(Error::Handler {
                operation: "xRead",
                message: format!("returned {} bytes, {} requested", data.len(), len),
            })
        }
        Err(error) => {
            out.fill(0);
            translate(error.with_context("xRead", format!("amount={amount} offset={offset}")))
        }
    }
}

unsafe extern "C" fn x_write(file: *mut ffi::sqlite3_file, buf: *const c_void, amount: c_int, offset: i64) -> c_int {
    let len = usize::try_from(amount).unwrap_or(0);
    // SAFETY: the engine supplies `amount` readable bytes.
    let data = unsafe { slice::from_raw_parts(buf.cast::<u8>(), len) };
    let result = execution::run("xWrite", || with_handler(file, "xWrite", |h| h.write(data, offset)));
    status(result.map_err(|e| e.with_context("xWrite", format!("amount={amount} offset={offset}"))))
}

unsafe extern "C" fn x_truncate(file: *mut ffi::sqlite3_file, size: i64) -> c_int {
    let result = execution::run("xTruncate", || with_handler(file, "xTruncate", |h| h.truncate(size)));
    status(result.map_err(|e| e.with_context("xTruncate", format!("size={size}"))))
}

unsafe extern "C" fn x_sync(file: *mut ffi::sqlite3_file, flags: c_int) -> c_int {
    let result = execution::run("xSync", || with_handler(file, "xSync", |h| h.sync(SyncFlags(flags))));
    status(result.map_err(|e| e.with_context("xSync", format!("flags={flags:#x}"))))
}

unsafe extern "C" fn x_file_size(file: *mut ffi::sqlite3_file, size: *mut ffi::sqlite3_int64) -> c_int {
    let result = execution::run("xFileSize", || with_handler(file, "xFileSize", |h| h.file_size()));
    match result {
        Ok(value) => {
            // SAFETY: the engine supplies the output slot.
            unsafe { *size = value };
            codes::OK
        }
        Err(error) => translate(error.with_context("xFileSize", "")),
    }
}

fn lock_status(operation: &'static str, level: c_int, result: Result<()>) -> c_int {
    match result {
        Ok(()) => codes::OK,
        Err(error) if error.is_busy() => {
            tracing::trace!(operation, level, "busy");
            error.code()
        }
        Err(error) => translate(error.with_context(operation, format!("level={level}"))),
    }
}

fn lock_level(operation: &'static str, level: c_int) -> Result<LockLevel> {
    LockLevel::from_raw(level).ok_or_else(|| Error::InvalidArgument(format!("{operation}: bad lock level {level}")))
}

unsafe extern "C" fn x_lock(file: *mut ffi::sqlite3_file, level: c_int) -> c_int {
    let result = execution::run("xLock", || {
        let level = lock_level("xLock", level)?;
        with_handler(file, "xLock", |h| h.lock(level))
    });
    lock_status("xLock", level, result)
}

unsafe extern "C" fn x_unlock(file: *mut ffi::sqlite3_file, level: c_int) -> c_int {
    let result = execution::run("xUnlock", || {
        let level = lock_level("xUnlock", level)?;
        with_handler(file, "xUnlock", |h| h.unlock(level))
    });
    lock_status("xUnlock", level, result)
}

unsafe extern "C" fn x_check_reserved_lock(file: *mut ffi::sqlite3_file, out: *mut c_int) -> c_int {
    let result = execution::run("xCheckReservedLock", || {
        with_handler(file, "xCheckReservedLock", |h| h.check_reserved_lock())
    });
    match result {
        Ok(reserved) => {
            // SAFETY: the engine supplies the output slot.
            unsafe { *out = c_int::from(reserved) };
            codes::OK
        }
        Err(error) => translate(error.with_context("xCheckReservedLock", "")),
    }
}

unsafe extern "C" fn x_file_control(file: *mut ffi::sqlite3_file, op: c_int, arg: *mut c_void) -> c_int {
    if op == ffi::SQLITE_FCNTL_VFSNAME {
        let result = execution::run("xFileControl", || {
            with_handler(file, "xFileControl", |h| compose_vfs_name(h, arg.cast::<*mut c_char>()))
        });
        return status(result.map_err(|e| e.with_context("xFileControl", "op=VFSNAME")));
    }
    let result = execution::run("xFileControl", || {
        let scope = CallScope::new();
        let arg = FileControlArg::new(op, arg, &scope.token());
        with_handler(file, "xFileControl", |h| h.file_control(&arg))
    });
    match result {
        Ok(true) => codes::OK,
        Ok(false) => codes::NOTFOUND,
        Err(error) => translate(error.with_context("xFileControl", format!("op={op}"))),
    }
}

/// Answers `SQLITE_FCNTL_VFSNAME`: the handler's type name followed by
/// whatever the base file reports, `outer/inner/.../unix`. A value already in
/// the slot stays as the last segment.
fn compose_vfs_name(handler: &mut dyn FileHandler, slot: *mut *mut c_char) -> Result<()> {
    if slot.is_null() {
        return Err(Error::InvalidArgument("VFSNAME without an output slot".into()));
    }
    let identity = handler.type_name();

    let mut from_base: *mut c_char = ptr::null_mut();
    if let Some(base) = handler.base_file() {
        let asked = (&mut from_base as *mut *mut c_char).cast::<c_void>();
        // SAFETY: VFSNAME takes a `char *` slot.
        if let Err(error) = unsafe { base.file_control(ffi::SQLITE_FCNTL_VFSNAME, asked) } {
            free(from_base);
            return Err(error);
        }
    }
    // SAFETY: the engine passes a pointer to a `char *` slot; it is emptied
    // here so every exit below leaves it owning at most one string.
    let prior = unsafe { ptr::replace(slot, ptr::null_mut()) };

    let mut name = identity.to_owned();
    for segment in [from_base, prior] {
        if !segment.is_null() {
            // SAFETY: engine allocated, NUL terminated.
            let segment_text = unsafe { CStr::from_ptr(segment) }.to_string_lossy();
            name.push('/');
            name.push_str(&segment_text);
        }
        free(segment);
    }

    let len = c_int::try_from(name.len()).map_err(|_| Error::TooBig {
        operation: "xFileControl",
        size: name.len(),
        limit: c_int::MAX as usize,
    })?;
    // SAFETY: "%.*s" reads exactly len bytes.
    let composed = unsafe { ffi::sqlite3_mprintf(c"%.*s".as_ptr(), len, name.as_ptr().cast::<c_char>()) };
    if composed.is_null() {
        return Err(Error::new(codes::NOMEM));
    }
    // SAFETY: as above.
    unsafe { *slot = composed };
    Ok(())
}

fn free(text: *mut c_char) {
    if !text.is_null() {
        // SAFETY: strings in VFSNAME slots come from the engine allocator.
        unsafe { ffi::sqlite3_free(text.cast::<c_void>()) };
    }
}

unsafe extern "C" fn x_sector_size(file: *mut ffi::sqlite3_file) -> c_int {
    let result = execution::run("xSectorSize", || with_handler(file, "xSectorSize", |h| h.sector_size()));
    result.unwrap_or_else(|error| {
        unraisable::report("xSectorSize", error);
        DEFAULT_SECTOR_SIZE
    })
}

unsafe extern "C" fn x_device_characteristics(file: *mut ffi::sqlite3_file) -> c_int {
    let result = execution::run("xDeviceCharacteristics", || {
        with_handler(file, "xDeviceCharacteristics", |h| h.device_characteristics())
    });
    result.unwrap_or_else(|error| {
        unraisable::report("xDeviceCharacteristics", error);
        0
    })
}

fn with_base<T>(
    file: *mut ffi::sqlite3_file,
    operation: &'static str,
    f: impl FnOnce(&mut NativeFile) -> Result<T>,
) -> Result<T> {
    execution::run(operation, || {
        with_handler(file, operation, |h| {
            let base = h.base_file().ok_or(Error::NotImplemented { operation })?;
            f(base)
        })
    })
}

unsafe extern "C" fn x_shm_map(
    file: *mut ffi::sqlite3_file,
    region: c_int,
    size: c_int,
    extend: c_int,
    out: *mut *mut c_void,
) -> c_int {
    match with_base(file, "xShmMap", |base| base.shm_map(region, size, extend != 0)) {
        Ok(mapped) => {
            // SAFETY: the engine supplies the output slot.
            unsafe { *out = mapped };
            codes::OK
        }
        Err(error) => translate(error.with_context("xShmMap", format!("region={region} size={size}"))),
    }
}

unsafe extern "C" fn x_shm_lock(file: *mut ffi::sqlite3_file, offset: c_int, count: c_int, flags: c_int) -> c_int {
    match with_base(file, "xShmLock", |base| base.shm_lock(offset, count, flags)) {
        Ok(()) => codes::OK,
        Err(error) if error.is_busy() => error.code(),
        Err(error) => translate(error.with_context("xShmLock", format!("offset={offset} count={count} flags={flags:#x}"))),
    }
}

unsafe extern "C" fn x_shm_barrier(file: *mut ffi::sqlite3_file) {
    if let Err(error) = with_base(file, "xShmBarrier", |base| base.shm_barrier()) {
        unraisable::report("xShmBarrier", error);
    }
}

unsafe extern "C" fn x_shm_unmap(file: *mut ffi::sqlite3_file, delete: c_int) -> c_int {
    let result = with_base(file, "xShmUnmap", |base| base.shm_unmap(delete != 0));
    status(result.map_err(|e| e.with_context("xShmUnmap", format!("delete={delete}"))))
}

const fn io_methods(shm: bool) -> ffi::sqlite3_io_methods {
    let mut methods = ffi::sqlite3_io_methods {
        iVersion: 1,
        xClose: Some(x_close),
        xRead: Some(x_read),
        xWrite: Some(x_write),
        xTruncate: Some(x_truncate),
        xSync: Some(x_sync),
        xFileSize: Some(x_file_size),
        xLock: Some(x_lock),
        xUnlock: Some(x_unlock),
        xCheckReservedLock: Some(x_check_reserved_lock),
        xFileControl: Some(x_file_control),
        xSectorSize: Some(x_sector_size),
        xDeviceCharacteristics: Some(x_device_characteristics),
        xShmMap: None,
        xShmLock: None,
        xShmBarrier: None,
        xShmUnmap: None,
        xFetch: None,
        xUnfetch: None,
    };
    if shm {
        methods.iVersion = 2;
        methods.xShmMap = Some(x_shm_map);
        methods.xShmLock = Some(x_shm_lock);
        methods.xShmBarrier = Some(x_shm_barrier);
        methods.xShmUnmap = Some(x_shm_unmap);
    }
    methods
}

static IO_METHODS_V1: ffi::sqlite3_io_methods = io_methods(false);
static IO_METHODS_V2: ffi::sqlite3_io_methods = io_methods(true);

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        data: Vec<u8>,
        closes: Arc<AtomicUsize>,
    }

    impl FileHandler for Scripted {
        fn read(&mut self, amount: usize, offset: i64) -> Result<Vec<u8>> {
            let start = (offset as usize).min(self.data.len());
            let end = (start + amount).min(self.data.len());
            Ok(self.data[start..end].to_vec())
        }

        fn lock(&mut self, _level: LockLevel) -> Result<()> {
            Err(Error::busy())
        }

        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_vfs() -> Arc<Vfs> {
        struct Nothing;
        impl crate::VfsHandler for Nothing {}
        Vfs::unregistered(Arc::new(Nothing))
    }

    fn open(handler: Scripted) -> Box<MaybeUninit<AdapterFile>> {
        open_handler(Box::new(handler))
    }

    fn open_handler(handler: Box<dyn FileHandler>) -> Box<MaybeUninit<AdapterFile>> {
        let mut slot = Box::new(MaybeUninit::<AdapterFile>::uninit());
        unsafe { AdapterFile::install(slot.as_mut_ptr().cast(), test_vfs(), handler) };
        slot
    }

    fn vfs_name_with_prior(raw: *mut ffi::sqlite3_file) -> String {
        let mut name = unsafe { ffi::sqlite3_mprintf(c"%s".as_ptr(), c"prior".as_ptr()) };
        let rc = unsafe {
            x_file_control(raw, ffi::SQLITE_FCNTL_VFSNAME, (&mut name as *mut *mut c_char).cast())
        };
        assert_eq!(rc, codes::OK);
        let text = unsafe { CStr::from_ptr(name) }.to_str().unwrap().to_owned();
        free(name);
        text
    }

    #[test]
    fn handler_only_file_uses_v1_table() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut file = open(Scripted { data: vec![], closes });
        let raw = file.as_mut_ptr().cast::<ffi::sqlite3_file>();
        assert!(ptr::eq(unsafe { (*raw).pMethods }, &IO_METHODS_V1));
        unsafe { x_close(raw) };
    }

    #[test]
    fn short_read_is_zero_padded() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut file = open(Scripted { data: vec![7; 10], closes });
        let raw = file.as_mut_ptr().cast::<ffi::sqlite3_file>();
        let mut buf = [0xAAu8; 16];
        let rc = unsafe { x_read(raw, buf.as_mut_ptr().cast(), 16, 4) };
        assert_eq!(rc, codes::IOERR_SHORT_READ);
        assert_eq!(&buf[..6], &[7; 6]);
        assert!(buf[6..].iter().all(|&b| b == 0));
        assert!(!crate::error::has_pending());
        unsafe { x_close(raw) };
    }

    #[test]
    fn close_is_idempotent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut file = open(Scripted {
            data: vec![],
            closes: Arc::clone(&closes),
        });
        let raw = file.as_mut_ptr().cast::<ffi::sqlite3_file>();
        assert_eq!(unsafe { x_close(raw) }, codes::OK);
        assert!(unsafe { (*raw).pMethods }.is_null());
        assert_eq!(unsafe { x_close(raw) }, codes::OK);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let mut buf = [0u8; 4];
        let rc = unsafe { x_read(raw, buf.as_mut_ptr().cast(), 4, 0) };
        assert_eq!(rc, codes::MISUSE);
        assert!(matches!(
            crate::error::take_pending().map(|e| e.root().code()),
            Some(code) if code == codes::MISUSE
        ));
    }

    #[test]
    fn busy_lock_is_silent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut file = open(Scripted { data: vec![], closes });
        let raw = file.as_mut_ptr().cast::<ffi::sqlite3_file>();
        let _ = crate::error::take_pending();
        assert_eq!(unsafe { x_lock(raw, ffi::SQLITE_LOCK_SHARED) }, codes::BUSY);
        assert!(!crate::error::has_pending());
        unsafe { x_close(raw) };
    }

    #[test]
    fn vfs_name_of_handler_only_file_keeps_prior_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut file = open(Scripted { data: vec![], closes });
        let raw = file.as_mut_ptr().cast::<ffi::sqlite3_file>();
        let text = vfs_name_with_prior(raw);
        assert!(text.ends_with("::Scripted/prior"), "{text}");
        assert_eq!(text.matches("prior").count(), 1);
        unsafe { x_close(raw) };
    }

    #[cfg(unix)]
    #[test]
    fn vfs_name_of_layered_file_keeps_prior_last() {
        struct Layered {
            inner: NativeFile,
        }
        impl FileHandler for Layered {
            fn base_file(&mut self) -> Option<&mut NativeFile> {
                Some(&mut self.inner)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = crate::FileName::Path(dir.path().join("layered.db").display().to_string());
        let mut flags = crate::OpenFlags::new(
            ffi::SQLITE_OPEN_MAIN_DB | ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
        );
        let inner = crate::NativeVfs::find("unix").unwrap().open(Some(&path), &mut flags).unwrap();
        let mut file = open_handler(Box::new(Layered { inner }));
        let raw = file.as_mut_ptr().cast::<ffi::sqlite3_file>();

        let text = vfs_name_with_prior(raw);
        assert!(text.ends_with("::Layered/unix/prior"), "{text}");
        assert_eq!(text.matches("prior").count(), 1);
        assert!(!crate::error::has_pending());
        assert_eq!(unsafe { x_close(raw) }, codes::OK);
    }

    #[test]
    fn sector_size_default() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut file = open(Scripted { data: vec![], closes });
        let raw = file.as_mut_ptr().cast::<ffi::sqlite3_file>();
        assert_eq!(unsafe { x_sector_size(raw) }, DEFAULT_SECTOR_SIZE);
        unsafe { x_close(raw) };
    }
}
