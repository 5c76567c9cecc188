//! Native status codes used at the adapter boundary.
//!
//! Primary codes are re-exported from the engine bindings. Extended codes
//! are composed here from their primary code so they do not depend on which
//! macros the bindings happened to expand.

use std::ffi::c_int;

use libsqlite3_sys as ffi;

/// Successful result.
pub const OK: c_int = ffi::SQLITE_OK;
/// Generic error.
pub const ERROR: c_int = ffi::SQLITE_ERROR;
/// The database file is locked.
pub const BUSY: c_int = ffi::SQLITE_BUSY;
/// A memory allocation failed.
pub const NOMEM: c_int = ffi::SQLITE_NOMEM;
/// Some kind of disk I/O error occurred.
pub const IOERR: c_int = ffi::SQLITE_IOERR;
/// Unknown opcode, unknown system call, or similar lookup miss.
pub const NOTFOUND: c_int = ffi::SQLITE_NOTFOUND;
/// Unable to open the database file.
pub const CANTOPEN: c_int = ffi::SQLITE_CANTOPEN;
/// String or blob exceeds the size limit.
pub const TOOBIG: c_int = ffi::SQLITE_TOOBIG;
/// Library used incorrectly.
pub const MISUSE: c_int = ffi::SQLITE_MISUSE;

/// A read returned fewer bytes than requested.
pub const IOERR_SHORT_READ: c_int = IOERR | (2 << 8);
/// Error while writing.
pub const IOERR_WRITE: c_int = IOERR | (3 << 8);
/// Error while deleting a file.
pub const IOERR_DELETE: c_int = IOERR | (10 << 8);
/// Error while closing a file.
pub const IOERR_CLOSE: c_int = IOERR | (16 << 8);
/// The file being deleted does not exist.
pub const IOERR_DELETE_NOENT: c_int = IOERR | (23 << 8);

/// Returns the primary code of a (possibly extended) status code.
#[inline]
pub const fn primary(code: c_int) -> c_int {
    code & 0xff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extended_codes_keep_their_primary() {
        assert_eq!(primary(IOERR_SHORT_READ), IOERR);
        assert_eq!(primary(IOERR_DELETE_NOENT), IOERR);
        assert_eq!(primary(BUSY), BUSY);
    }

    #[test]
    fn extended_values_match_engine_numbering() {
        assert_eq!(IOERR_SHORT_READ, 522);
        assert_eq!(IOERR_DELETE_NOENT, 5898);
    }
}
