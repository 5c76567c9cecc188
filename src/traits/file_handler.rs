//! Per-file operations.

use std::ffi::c_int;

use crate::scope::FileControlArg;
use crate::types::{DEFAULT_SECTOR_SIZE, LockLevel, SyncFlags};
use crate::{Error, NativeFile, Result};

/// The operations of an open file.
///
/// The default implementations forward to [`FileHandler::base_file`]. A
/// handler without a base file must override the I/O methods it supports;
/// the others fail with [`Error::NotImplemented`].
///
/// Shared-memory support is decided once, when the file is opened: if the
/// base file has the shared-memory methods, the adapter exposes them and
/// forwards them straight to it.
///
/// # Thread Safety
///
/// A file is used by one connection at a time but may move between
/// threads, so implementations must be `Send`.
pub trait FileHandler: Send + 'static {
    /// The native file this handler delegates to, if any.
    fn base_file(&mut self) -> Option<&mut NativeFile> {
        None
    }

    /// The fully qualified type name, used to build the VFS name chain.
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Reads up to `amount` bytes at `offset`.
    ///
    /// Returning fewer bytes signals a short read; the adapter zero-fills
    /// the rest of the engine's buffer. Returning more is an error.
    fn read(&mut self, amount: usize, offset: i64) -> Result<Vec<u8>> {
        base(self, "xRead")?.read(amount, offset)
    }

    /// Writes `data` at `offset`.
    fn write(&mut self, data: &[u8], offset: i64) -> Result<()> {
        base(self, "xWrite")?.write(data, offset)
    }

    /// Truncates the file to `size` bytes.
    fn truncate(&mut self, size: i64) -> Result<()> {
        base(self, "xTruncate")?.truncate(size)
    }

    /// Flushes to storage.
    fn sync(&mut self, flags: SyncFlags) -> Result<()> {
        base(self, "xSync")?.sync(flags)
    }

    /// The file size in bytes.
    fn file_size(&mut self) -> Result<i64> {
        base(self, "xFileSize")?.file_size()
    }

    /// Raises the lock.
    ///
    /// # Errors
    ///
    /// A busy error ([`Error::busy`]) tells the engine to retry.
    fn lock(&mut self, level: LockLevel) -> Result<()> {
        base(self, "xLock")?.lock(level)
    }

    /// Lowers the lock.
    fn unlock(&mut self, level: LockLevel) -> Result<()> {
        base(self, "xUnlock")?.unlock(level)
    }

    /// Returns `true` if some connection holds a reserved lock.
    fn check_reserved_lock(&mut self) -> Result<bool> {
        base(self, "xCheckReservedLock")?.check_reserved_lock()
    }

    /// Handles a file control. `Ok(false)` means the opcode is not understood.
    ///
    /// `SQLITE_FCNTL_VFSNAME` never reaches this method. For
    /// `SQLITE_FCNTL_PRAGMA`, [`FileControlArg::pragma`] gives typed access.
    fn file_control(&mut self, arg: &FileControlArg) -> Result<bool> {
        match self.base_file() {
            // SAFETY: the pointer comes from the engine, paired with its opcode.
            Some(file) => unsafe { file.file_control(arg.op(), arg.pointer()) },
            None => Ok(false),
        }
    }

    /// The device sector size.
    fn sector_size(&mut self) -> Result<c_int> {
        match self.base_file() {
            Some(file) => file.sector_size(),
            None => Ok(DEFAULT_SECTOR_SIZE),
        }
    }

    /// The `SQLITE_IOCAP_*` bits of the device.
    fn device_characteristics(&mut self) -> Result<c_int> {
        match self.base_file() {
            Some(file) => file.device_characteristics(),
            None => Ok(0),
        }
    }

    /// Closes the file. Called at most once by the adapter.
    fn close(&mut self) -> Result<()> {
        match self.base_file() {
            Some(file) => file.close(),
            None => Ok(()),
        }
    }
}

fn base<'a, F: FileHandler + ?Sized>(file: &'a mut F, operation: &'static str) -> Result<&'a mut NativeFile> {
    file.base_file().ok_or(Error::NotImplemented { operation })
}

impl FileHandler for NativeFile {
    fn base_file(&mut self) -> Option<&mut NativeFile> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;
    impl FileHandler for Bare {}

    #[test]
    fn bare_handler_defaults() {
        let mut file = Bare;
        assert!(matches!(file.read(1, 0), Err(Error::NotImplemented { operation: "xRead" })));
        assert_eq!(file.sector_size().unwrap(), DEFAULT_SECTOR_SIZE);
        assert_eq!(file.device_characteristics().unwrap(), 0);
        assert!(file.close().is_ok());
    }

    #[test]
    fn type_name_is_qualified() {
        assert!(Bare.type_name().ends_with("::Bare"));
        let boxed: Box<dyn FileHandler> = Box::new(Bare);
        assert!(boxed.type_name().ends_with("::Bare"));
    }
}
