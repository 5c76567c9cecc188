//! # vfs-bridge
//!
//! Pluggable **SQLite VFS** adapters written as ordinary Rust traits.
//!
//! SQLite performs all file I/O through a table of C function pointers, the
//! VFS. This crate registers a VFS whose table dispatches to a
//! [`VfsHandler`], and opens files whose method table dispatches to a
//! [`FileHandler`]. Every handler method defaults to forwarding to a *base*
//! VFS or file, so an adapter overrides only the calls it cares about and
//! adapters can be stacked into delegation chains.
//!
//! ---
//!
//! ## Quick Start
//!
//! ```rust
//! use vfs_bridge::{NativeVfs, Vfs, VfsHandler, VfsOptions, Result};
//!
//! /// Logs every delete, forwards everything else.
//! struct AuditDeletes;
//!
//! impl VfsHandler for AuditDeletes {
//!     fn delete(&self, vfs: &Vfs, name: &str, sync_dir: bool) -> Result<()> {
//!         eprintln!("deleting {name}");
//!         vfs.require_base("xDelete")?.delete(name, sync_dir)
//!     }
//! }
//!
//! let vfs = Vfs::register(AuditDeletes, VfsOptions::new("audit").with_default_base())?;
//! // Open connections with `sqlite3_open_v2(.., c"audit".as_ptr())`.
//! assert!(NativeVfs::find("audit")?.is_adapter());
//! vfs.unregister()?;
//! # Ok::<(), vfs_bridge::Error>(())
//! ```
//!
//! ---
//!
//! ## Core Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`VfsHandler`] | VFS-level operations: open, delete, access, time, randomness |
//! | [`FileHandler`] | Per-file operations: read, write, lock, file control |
//! | [`Vfs`] | A registered adapter, shared as `Arc<Vfs>` |
//! | [`VfsOptions`] | Name, base, version and exclusions of a registration |
//! | [`NativeVfs`] | Any VFS known to the engine, callable from Rust |
//! | [`NativeFile`] | A file opened through a [`NativeVfs`] |
//! | [`FileName`] | The name passed to `open`, possibly a [`ScopedFilenameView`] |
//! | [`PragmaView`] | Typed access to `PRAGMA` file controls |
//! | [`Error`] | Error type carrying a native status code |
//!
//! ---
//!
//! ## Delegation Chains
//!
//! [`VfsOptions::base`] names the VFS an adapter delegates to. The base may
//! itself be an adapter; the chain is checked for cycles at registration and
//! each adapter keeps the one below it registered for as long as it lives.
//!
//! ```text
//! "encrypting" -> "auditing" -> "unix"
//! ```
//!
//! `SQLITE_FCNTL_VFSNAME` reports the whole chain, outermost first, one
//! handler type name per adapter followed by the base VFS name. A name the
//! caller already placed in the slot is kept as the last segment.
//!
//! ---
//!
//! ## Error Handling
//!
//! Handlers return [`Result`]. When an error crosses into the engine the
//! native entry point returns [`Error::code`] and keeps the error as
//! *pending* on the current thread; a caller further up the chain retrieves
//! it with [`raise_from_code`], so the original error survives the trip.
//! Calls made through [`NativeVfs`] and [`NativeFile`] only adopt errors
//! recorded while they ran; leftovers from earlier calls are discarded.
//!
//! ```rust
//! use vfs_bridge::{Error, codes};
//!
//! let err = Error::NotImplemented { operation: "xShmMap" };
//! assert_eq!(err.code(), codes::ERROR);
//! assert_eq!(err.to_string(), "xShmMap: not implemented");
//! ```
//!
//! Errors from calls that have no way to report failure (`xSleep`,
//! `xDlClose`, closing on drop) go to the [`unraisable`] hook.
//!
//! ---
//!
//! ## Thread Safety
//!
//! Every native entry point runs under one process-wide reentrant
//! [execution lock](execution), so handlers never run concurrently with each
//! other, but a handler that calls back into the engine may be re-entered on
//! the same thread. [`VfsHandler`] must be `Send + Sync`; [`FileHandler`]
//! must be `Send`.
//!
//! ---
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` | Serialization for [`VfsOptions`] and the flag types, plus `VfsOptions::from_json` |

// Private modules
mod chain;
mod config;
mod error;
mod file;
mod native;
mod scope;
mod traits;
mod types;
mod vfs;

// Public modules
pub mod codes;
pub mod execution;
pub mod unraisable;

// Public re-exports - error types
pub use error::{Error, ErrorContext, Result, has_pending, raise_from_code, take_pending};

// Public re-exports - core types
pub use types::{
    AccessFlags, DEFAULT_MAX_PATHNAME, DEFAULT_SECTOR_SIZE, DlSymbol, LockLevel, OpenFlags, SyncFlags,
    SystemCall, VfsMethod, VfsMethods,
};

// Public re-exports - scoped views
pub use scope::{FileControlArg, FileName, PragmaView, ScopedFilenameView};

// Public re-exports - handler traits
pub use traits::{FileHandler, VfsHandler};

// Public re-exports - registration
pub use config::VfsOptions;
pub use native::{NativeFile, NativeVfs};
pub use vfs::{Vfs, vfs_names};
