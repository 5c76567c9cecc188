//! # Handler Traits
//!
//! The two traits a pluggable VFS implements.
//!
//! | Trait | Native table | Receives |
//! |-------|--------------|----------|
//! | [`VfsHandler`] | `sqlite3_vfs` | the [`Vfs`](crate::Vfs) registration |
//! | [`FileHandler`] | `sqlite3_io_methods` | nothing, it owns its state |
//!
//! ## Delegation
//!
//! Every method has a default implementation that forwards to the base:
//! the registration's [`base`](crate::Vfs::base) VFS for [`VfsHandler`],
//! [`base_file`](FileHandler::base_file) for [`FileHandler`]. Override only
//! what you want to change:
//!
//! ```rust
//! use vfs_bridge::{FileHandler, NativeFile, Result, Vfs, VfsHandler, OpenFlags, FileName};
//!
//! struct CountingFile {
//!     inner: NativeFile,
//!     reads: usize,
//! }
//!
//! impl FileHandler for CountingFile {
//!     fn base_file(&mut self) -> Option<&mut NativeFile> {
//!         Some(&mut self.inner)
//!     }
//!
//!     fn read(&mut self, amount: usize, offset: i64) -> Result<Vec<u8>> {
//!         self.reads += 1;
//!         self.inner.read(amount, offset)
//!     }
//! }
//!
//! struct Counting;
//!
//! impl VfsHandler for Counting {
//!     fn open(
//!         &self,
//!         vfs: &Vfs,
//!         name: Option<&FileName>,
//!         flags: &mut OpenFlags,
//!     ) -> Result<Box<dyn FileHandler>> {
//!         let inner = vfs.require_base("xOpen")?.open(name, flags)?;
//!         Ok(Box::new(CountingFile { inner, reads: 0 }))
//!     }
//! }
//! ```

mod file_handler;
mod vfs_handler;

pub use file_handler::FileHandler;
pub use vfs_handler::VfsHandler;
