//! Calling into registered VFS implementations.
//!
//! [`NativeVfs`] wraps any VFS the engine knows about, whether the engine's
//! own (`"unix"`, `"memdb"`) or an adapter registered by this crate.
//! [`NativeFile`] owns a file opened through one. Handlers use both to
//! delegate the operations they do not override.

/// Reads an optional slot from a native function table.
macro_rules! slot {
    ($table:expr, $field:ident, $operation:literal) => {
        $table
            .$field
            .ok_or($crate::Error::NotImplemented {
                operation: $operation,
            })
    };
}

mod file;
mod vfs;

pub use file::NativeFile;
pub use vfs::NativeVfs;
