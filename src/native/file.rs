use std::alloc::{self, Layout};
use std::ffi::{CStr, c_char, c_int, c_void};
use std::fmt;
use std::ptr::{self, NonNull};

use libsqlite3_sys as ffi;

use super::NativeVfs;
use crate::error::NativeCall;
use crate::scope::FileName;
use crate::types::{LockLevel, OpenFlags, SyncFlags};
use crate::{Error, Result, codes, unraisable};

/// Alignment of the per-file structure allocation.
const FILE_ALIGN: usize = 16;

/// NUL bytes placed on both sides of owned names, the layout URI parameter
/// lookups expect: the engine scans backwards for the leading run and
/// forwards for the end of the parameter list.
const NAME_PADDING: usize = 4;

enum NativeName {
    Temp,
    Owned(Box<[u8]>),
    /// Engine-owned, valid until the file is closed.
    Borrowed(*const c_char),
}

impl NativeName {
    fn as_ptr(&self) -> *const c_char {
        match self {
            NativeName::Temp => ptr::null(),
            NativeName::Owned(bytes) => bytes[NAME_PADDING..].as_ptr().cast::<c_char>(),
            NativeName::Borrowed(name) => *name,
        }
    }
}

/// A file opened through a [`NativeVfs`].
///
/// Owns the per-file structure the VFS writes into. Closing is idempotent;
/// once closed every other operation fails with [`Error::FileClosed`].
/// Dropping an open file closes it and reports any error to the
/// [`unraisable`](crate::unraisable) channel.
pub struct NativeFile {
    vfs: NativeVfs,
    file: Option<NonNull<ffi::sqlite3_file>>,
    layout: Layout,
    name: NativeName,
}

// SAFETY: the per-file structure is owned exclusively by this value and the
// engine's file methods do not depend on the calling thread.
unsafe impl Send for NativeFile {}

impl NativeFile {
    pub(crate) fn open(vfs: NativeVfs, name: Option<&FileName>, flags: &mut OpenFlags) -> Result<Self> {
        let x_open = slot!(vfs_table(&vfs), xOpen, "xOpen")?;
        let name = match name {
            None => NativeName::Temp,
            Some(FileName::Path(path)) => {
                if path.as_bytes().contains(&0) {
                    return Err(Error::InvalidArgument(format!("file name contains NUL: {path:?}")));
                }
                let mut bytes = vec![0u8; NAME_PADDING];
                bytes.extend_from_slice(path.as_bytes());
                bytes.resize(NAME_PADDING + path.len() + 1 + NAME_PADDING, 0);
                NativeName::Owned(bytes.into_boxed_slice())
            }
            Some(FileName::Uri(view)) => NativeName::Borrowed(view.as_ptr()?),
        };

        let size = usize::try_from(vfs.os_file_size())
            .unwrap_or(0)
            .max(std::mem::size_of::<ffi::sqlite3_file>());
        let layout = Layout::from_size_align(size, FILE_ALIGN)
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) }.cast::<ffi::sqlite3_file>();
        let Some(file) = NonNull::new(raw) else {
            return Err(Error::new(codes::NOMEM));
        };

        let mut out_flags = flags.input;
        let call = NativeCall::begin();
        // SAFETY: file is zeroed and large enough for this VFS.
        let rc = unsafe {
            x_open(vfs.as_ptr(), name.as_ptr(), file.as_ptr(), flags.input, &mut out_flags)
        };
        if codes::primary(rc) != codes::OK {
            let error = call.raise(rc);
            // SAFETY: the VFS may have set pMethods even though it failed,
            // in which case xClose must still run.
            unsafe {
                let methods = (*file.as_ptr()).pMethods;
                if let Some(x_close) = methods.as_ref().and_then(|m| m.xClose) {
                    x_close(file.as_ptr());
                }
                alloc::dealloc(file.as_ptr().cast::<u8>(), layout);
            }
            return Err(error.with_context("xOpen", format!("flags={:#x}", flags.input)));
        }
        flags.output = out_flags;
        tracing::trace!(vfs = %vfs.name(), flags = flags.input, "opened native file");

        Ok(NativeFile {
            vfs,
            file: Some(file),
            layout,
            name,
        })
    }

    /// The VFS the file was opened with.
    pub fn vfs(&self) -> &NativeVfs {
        &self.vfs
    }

    /// The name the file was opened with; `None` for temporary files.
    pub fn filename(&self) -> Option<String> {
        let name = self.name.as_ptr();
        if name.is_null() {
            None
        } else {
            // SAFETY: owned names are NUL terminated; borrowed ones are valid until close.
            Some(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
        }
    }

    /// Returns `true` once [`NativeFile::close`] ran.
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// The per-file structure, or NULL once closed.
    pub fn as_ptr(&self) -> *mut ffi::sqlite3_file {
        self.file.map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    fn methods(&self, operation: &'static str) -> Result<(&ffi::sqlite3_io_methods, *mut ffi::sqlite3_file)> {
        let file = self.file.ok_or(Error::FileClosed { operation })?;
        // SAFETY: the structure stays allocated until close; pMethods is
        // either NULL or a static table.
        let methods = unsafe { (*file.as_ptr()).pMethods.as_ref() };
        let methods = methods.ok_or(Error::FileClosed { operation })?;
        Ok((methods, file.as_ptr()))
    }

    /// Reads up to `amount` bytes at `offset`.
    ///
    /// A short read is not an error; the result is shorter than `amount`,
    /// with the zero padding the VFS wrote trimmed off.
    pub fn read(&mut self, amount: usize, offset: i64) -> Result<Vec<u8>> {
        let (methods, file) = self.methods("xRead")?;
        let x_read = slot!(methods, xRead, "xRead")?;
        let len = c_int::try_from(amount).map_err(|_| Error::TooBig {
            operation: "xRead",
            size: amount,
            limit: c_int::MAX as usize,
        })?;
        let mut buf = vec![0u8; amount];
        let call = NativeCall::begin();
        // SAFETY: buf holds amount bytes.
        let rc = unsafe { x_read(file, buf.as_mut_ptr().cast::<c_void>(), len, offset) };
        if rc == codes::IOERR_SHORT_READ {
            call.forget();
            let end = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
            buf.truncate(end);
            return Ok(buf);
        }
        call.check(rc).map_err(|e| e.with_context("xRead", format!("amount={amount} offset={offset}")))?;
        Ok(buf)
    }

    /// Writes `data` at `offset`.
    pub fn write(&mut self, data: &[u8], offset: i64) -> Result<()> {
        let (methods, file) = self.methods("xWrite")?;
        let x_write = slot!(methods, xWrite, "xWrite")?;
        let len = c_int::try_from(data.len()).map_err(|_| Error::TooBig {
            operation: "xWrite",
            size: data.len(),
            limit: c_int::MAX as usize,
        })?;
        let call = NativeCall::begin();
        // SAFETY: data holds len bytes.
        let rc = unsafe { x_write(file, data.as_ptr().cast::<c_void>(), len, offset) };
        call.check(rc).map_err(|e| e.with_context("xWrite", format!("amount={} offset={offset}", data.len())))
    }

    /// Truncates the file to `size` bytes.
    pub fn truncate(&mut self, size: i64) -> Result<()> {
        let (methods, file) = self.methods("xTruncate")?;
        let x_truncate = slot!(methods, xTruncate, "xTruncate")?;
        let call = NativeCall::begin();
        // SAFETY: open file.
        call.check(unsafe { x_truncate(file, size) })
    }

    /// Flushes the file to storage.
    pub fn sync(&mut self, flags: SyncFlags) -> Result<()> {
        let (methods, file) = self.methods("xSync")?;
        let x_sync = slot!(methods, xSync, "xSync")?;
        let call = NativeCall::begin();
        // SAFETY: open file.
        call.check(unsafe { x_sync(file, flags.0) })
    }

    /// The file size in bytes.
    pub fn file_size(&mut self) -> Result<i64> {
        let (methods, file) = self.methods("xFileSize")?;
        let x_file_size = slot!(methods, xFileSize, "xFileSize")?;
        let mut size: ffi::sqlite3_int64 = 0;
        let call = NativeCall::begin();
        // SAFETY: open file and valid output pointer.
        call.check(unsafe { x_file_size(file, &mut size) })?;
        Ok(size)
    }

    /// Raises the lock to `level`.
    pub fn lock(&mut self, level: LockLevel) -> Result<()> {
        let (methods, file) = self.methods("xLock")?;
        let x_lock = slot!(methods, xLock, "xLock")?;
        let call = NativeCall::begin();
        // SAFETY: open file.
        call.check(unsafe { x_lock(file, level.to_raw()) })
    }

    /// Lowers the lock to `level`.
    pub fn unlock(&mut self, level: LockLevel) -> Result<()> {
        let (methods, file) = self.methods("xUnlock")?;
        let x_unlock = slot!(methods, xUnlock, "xUnlock")?;
        let call = NativeCall::begin();
        // SAFETY: open file.
        call.check(unsafe { x_unlock(file, level.to_raw()) })
    }

    /// Returns `true` if any connection holds a reserved lock.
    pub fn check_reserved_lock(&mut self) -> Result<bool> {
        let (methods, file) = self.methods("xCheckReservedLock")?;
        let x_check = slot!(methods, xCheckReservedLock, "xCheckReservedLock")?;
        let mut reserved: c_int = 0;
        let call = NativeCall::begin();
        // SAFETY: open file and valid output pointer.
        call.check(unsafe { x_check(file, &mut reserved) })?;
        Ok(reserved != 0)
    }

    /// Sends a file control. Returns `false` if the opcode is not understood.
    ///
    /// # Safety
    ///
    /// `arg` must be what the engine documents for `op`.
    pub unsafe fn file_control(&mut self, op: c_int, arg: *mut c_void) -> Result<bool> {
        let (methods, file) = self.methods("xFileControl")?;
        let x_file_control = slot!(methods, xFileControl, "xFileControl")?;
        let call = NativeCall::begin();
        // SAFETY: caller guarantees arg.
        let rc = unsafe { x_file_control(file, op, arg) };
        if rc == codes::NOTFOUND {
            call.forget();
            return Ok(false);
        }
        call.check(rc)?;
        Ok(true)
    }

    /// The sector size of the underlying device.
    pub fn sector_size(&mut self) -> Result<c_int> {
        let (methods, file) = self.methods("xSectorSize")?;
        let x_sector_size = slot!(methods, xSectorSize, "xSectorSize")?;
        // SAFETY: open file.
        Ok(unsafe { x_sector_size(file) })
    }

    /// The `SQLITE_IOCAP_*` bits of the underlying device.
    pub fn device_characteristics(&mut self) -> Result<c_int> {
        let (methods, file) = self.methods("xDeviceCharacteristics")?;
        let x_device = slot!(methods, xDeviceCharacteristics, "xDeviceCharacteristics")?;
        // SAFETY: open file.
        Ok(unsafe { x_device(file) })
    }

    /// Returns `true` if the file's table has the shared-memory methods.
    pub fn supports_shm(&self) -> bool {
        self.methods("xShmMap")
            .map(|(methods, _)| methods.iVersion >= 2 && methods.xShmMap.is_some())
            .unwrap_or(false)
    }

    /// Maps shared-memory region `region` of `size` bytes.
    ///
    /// Returns NULL when the region does not exist and `extend` is false.
    pub fn shm_map(&mut self, region: c_int, size: c_int, extend: bool) -> Result<*mut c_void> {
        let (methods, file) = self.shm_methods("xShmMap")?;
        let x_shm_map = slot!(methods, xShmMap, "xShmMap")?;
        let mut mapped: *mut c_void = ptr::null_mut();
        let call = NativeCall::begin();
        // SAFETY: open file and valid output pointer.
        call.check(unsafe { x_shm_map(file, region, size, c_int::from(extend), &mut mapped) })?;
        Ok(mapped)
    }

    /// Takes or releases shared-memory locks.
    pub fn shm_lock(&mut self, offset: c_int, count: c_int, flags: c_int) -> Result<()> {
        let (methods, file) = self.shm_methods("xShmLock")?;
        let x_shm_lock = slot!(methods, xShmLock, "xShmLock")?;
        let call = NativeCall::begin();
        // SAFETY: open file.
        call.check(unsafe { x_shm_lock(file, offset, count, flags) })
    }

    /// Memory barrier for shared memory.
    pub fn shm_barrier(&mut self) -> Result<()> {
        let (methods, file) = self.shm_methods("xShmBarrier")?;
        let x_shm_barrier = slot!(methods, xShmBarrier, "xShmBarrier")?;
        // SAFETY: open file.
        unsafe { x_shm_barrier(file) };
        Ok(())
    }

    /// Unmaps shared memory, deleting it when `delete` is set.
    pub fn shm_unmap(&mut self, delete: bool) -> Result<()> {
        let (methods, file) = self.shm_methods("xShmUnmap")?;
        let x_shm_unmap = slot!(methods, xShmUnmap, "xShmUnmap")?;
        let call = NativeCall::begin();
        // SAFETY: open file.
        call.check(unsafe { x_shm_unmap(file, c_int::from(delete)) })
    }

    fn shm_methods(&self, operation: &'static str) -> Result<(&ffi::sqlite3_io_methods, *mut ffi::sqlite3_file)> {
        let (methods, file) = self.methods(operation)?;
        if methods.iVersion < 2 {
            return Err(Error::NotImplemented { operation });
        }
        Ok((methods, file))
    }

    /// Closes the file. Calling it again does nothing.
    pub fn close(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let call = NativeCall::begin();
        // SAFETY: the structure is still allocated; it is freed exactly once here.
        let rc = unsafe {
            let methods = (*file.as_ptr()).pMethods;
            let rc = match methods.as_ref().and_then(|m| m.xClose) {
                Some(x_close) => x_close(file.as_ptr()),
                None => codes::OK,
            };
            (*file.as_ptr()).pMethods = ptr::null();
            alloc::dealloc(file.as_ptr().cast::<u8>(), self.layout);
            rc
        };
        tracing::trace!(vfs = %self.vfs.name(), rc, "closed native file");
        call.check(rc)
    }
}

fn vfs_table(vfs: &NativeVfs) -> &ffi::sqlite3_vfs {
    // SAFETY: see NativeVfs::raw.
    unsafe { &*vfs.as_ptr() }
}

impl Drop for NativeFile {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            unraisable::report("xClose", error);
        }
    }
}

impl fmt::Debug for NativeFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFile")
            .field("vfs", &self.vfs.name())
            .field("name", &self.filename())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn open_scratch(dir: &tempfile::TempDir, name: &str) -> NativeFile {
        let vfs = NativeVfs::find("unix").unwrap();
        let path = dir.path().join(name);
        let mut flags = OpenFlags::new(
            ffi::SQLITE_OPEN_MAIN_JOURNAL | ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
        );
        vfs.open(Some(&FileName::Path(path.display().to_string())), &mut flags)
            .unwrap()
    }

    #[test]
    fn write_read_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_scratch(&dir, "plain.bin");
        file.write(b"hello", 0).unwrap();
        assert_eq!(file.file_size().unwrap(), 5);
        assert_eq!(file.read(5, 0).unwrap(), b"hello");
        assert!(file.filename().unwrap().ends_with("plain.bin"));

        file.close().unwrap();
        file.close().unwrap();
        assert!(file.is_closed());
        assert!(matches!(file.read(1, 0), Err(Error::FileClosed { .. })));
    }

    #[test]
    fn short_read_trims_padding() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_scratch(&dir, "short.bin");
        file.write(b"abc", 0).unwrap();
        assert_eq!(file.read(10, 0).unwrap(), b"abc");
        assert!(file.read(10, 100).unwrap().is_empty());
    }

    #[test]
    fn unknown_file_control() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = open_scratch(&dir, "fcntl.bin");
        let handled = unsafe { file.file_control(0x7fff_0000, ptr::null_mut()) }.unwrap();
        assert!(!handled);
    }

    #[test]
    fn temp_file_has_no_name() {
        let vfs = NativeVfs::find("unix").unwrap();
        let mut flags = OpenFlags::new(
            ffi::SQLITE_OPEN_TEMP_JOURNAL
                | ffi::SQLITE_OPEN_READWRITE
                | ffi::SQLITE_OPEN_CREATE
                | ffi::SQLITE_OPEN_DELETEONCLOSE,
        );
        let mut file = vfs.open(None, &mut flags).unwrap();
        assert!(file.filename().is_none());
        file.write(&[1, 2, 3], 0).unwrap();
        assert!(file.sector_size().unwrap() > 0);
    }

    #[test]
    fn open_missing_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = NativeVfs::find("unix").unwrap();
        let path = dir.path().join("missing.bin");
        let mut flags = OpenFlags::new(ffi::SQLITE_OPEN_MAIN_JOURNAL | ffi::SQLITE_OPEN_READWRITE);
        let err = vfs
            .open(Some(&FileName::Path(path.display().to_string())), &mut flags)
            .unwrap_err();
        assert_eq!(err.primary_code(), codes::CANTOPEN);
    }
}
