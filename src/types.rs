//! Core types shared by the VFS and file adapters.

use std::ffi::{c_char, c_int, c_void};
use std::fmt;

use libsqlite3_sys as ffi;

/// Sector size reported when a handler cannot provide one.
pub const DEFAULT_SECTOR_SIZE: c_int = 4096;

/// Maximum pathname length used when neither the options nor a base supply one.
pub const DEFAULT_MAX_PATHNAME: c_int = 1024;

/// A replaceable system call, as exchanged by `xSetSystemCall` and `xGetSystemCall`.
pub type SystemCall = unsafe extern "C" fn();

/// A symbol resolved by `xDlSym`, typed the way the engine bindings declare it.
pub type DlSymbol = unsafe extern "C" fn(*mut ffi::sqlite3_vfs, *mut c_void, *const c_char);

/// Flags passed to and returned from a VFS `open`.
///
/// `input` is what the engine asked for. `output` starts equal to `input`;
/// a handler may rewrite it (for example to add `SQLITE_OPEN_READONLY`) and
/// the adapter hands it back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OpenFlags {
    /// Flags requested by the engine.
    pub input: c_int,
    /// Flags reported back to the engine.
    pub output: c_int,
}

impl OpenFlags {
    /// Flags for a request, with `output` initialised to `input`.
    #[inline]
    pub const fn new(input: c_int) -> Self {
        Self {
            input,
            output: input,
        }
    }

    /// Returns `true` if every bit of `flag` is requested.
    #[inline]
    pub const fn contains(&self, flag: c_int) -> bool {
        self.input & flag == flag
    }

    /// Returns `true` for the main database file.
    #[inline]
    pub const fn is_main_db(&self) -> bool {
        self.contains(ffi::SQLITE_OPEN_MAIN_DB)
    }

    /// Returns `true` if the name may carry URI parameters.
    #[inline]
    pub const fn is_uri(&self) -> bool {
        self.contains(ffi::SQLITE_OPEN_URI)
    }

    /// Returns `true` if the file is to be opened read-only.
    #[inline]
    pub const fn is_readonly(&self) -> bool {
        self.contains(ffi::SQLITE_OPEN_READONLY)
    }

    /// Returns `true` if the file should be created when missing.
    #[inline]
    pub const fn is_create(&self) -> bool {
        self.contains(ffi::SQLITE_OPEN_CREATE)
    }

    /// Returns `true` if the file is removed when closed.
    #[inline]
    pub const fn is_delete_on_close(&self) -> bool {
        self.contains(ffi::SQLITE_OPEN_DELETEONCLOSE)
    }

    /// Marks the file as opened read-only in `output`.
    #[inline]
    pub fn set_readonly(&mut self) {
        self.output = (self.output & !ffi::SQLITE_OPEN_READWRITE) | ffi::SQLITE_OPEN_READONLY;
    }
}

/// The question asked by `xAccess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AccessFlags {
    /// Does the file exist?
    Exists,
    /// Is it readable and writable?
    ReadWrite,
    /// Is it readable?
    Read,
}

impl AccessFlags {
    /// Parses the engine's `SQLITE_ACCESS_*` value.
    pub const fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            ffi::SQLITE_ACCESS_EXISTS => Some(Self::Exists),
            ffi::SQLITE_ACCESS_READWRITE => Some(Self::ReadWrite),
            ffi::SQLITE_ACCESS_READ => Some(Self::Read),
            _ => None,
        }
    }

    /// The engine's value.
    pub const fn to_raw(self) -> c_int {
        match self {
            Self::Exists => ffi::SQLITE_ACCESS_EXISTS,
            Self::ReadWrite => ffi::SQLITE_ACCESS_READWRITE,
            Self::Read => ffi::SQLITE_ACCESS_READ,
        }
    }
}

/// File lock levels, in increasing strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LockLevel {
    /// No lock held.
    None,
    /// Reading allowed.
    Shared,
    /// Intends to write.
    Reserved,
    /// Waiting for readers to drain.
    Pending,
    /// Writing.
    Exclusive,
}

impl LockLevel {
    /// Parses the engine's `SQLITE_LOCK_*` value.
    pub const fn from_raw(raw: c_int) -> Option<Self> {
        match raw {
            ffi::SQLITE_LOCK_NONE => Some(Self::None),
            ffi::SQLITE_LOCK_SHARED => Some(Self::Shared),
            ffi::SQLITE_LOCK_RESERVED => Some(Self::Reserved),
            ffi::SQLITE_LOCK_PENDING => Some(Self::Pending),
            ffi::SQLITE_LOCK_EXCLUSIVE => Some(Self::Exclusive),
            _ => None,
        }
    }

    /// The engine's value.
    pub const fn to_raw(self) -> c_int {
        match self {
            Self::None => ffi::SQLITE_LOCK_NONE,
            Self::Shared => ffi::SQLITE_LOCK_SHARED,
            Self::Reserved => ffi::SQLITE_LOCK_RESERVED,
            Self::Pending => ffi::SQLITE_LOCK_PENDING,
            Self::Exclusive => ffi::SQLITE_LOCK_EXCLUSIVE,
        }
    }
}

/// Flags passed to `xSync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SyncFlags(pub c_int);

impl SyncFlags {
    /// Returns `true` for a full (`F_FULLFSYNC` style) sync.
    #[inline]
    pub const fn is_full(&self) -> bool {
        self.0 & 0x0f == ffi::SQLITE_SYNC_FULL
    }

    /// Returns `true` if only file content needs to reach the disk.
    #[inline]
    pub const fn is_data_only(&self) -> bool {
        self.0 & ffi::SQLITE_SYNC_DATAONLY != 0
    }
}

/// The VFS-level operations of the native table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VfsMethod {
    /// `xOpen`
    Open,
    /// `xDelete`
    Delete,
    /// `xAccess`
    Access,
    /// `xFullPathname`
    FullPathname,
    /// `xDlOpen`
    DlOpen,
    /// `xDlError`
    DlError,
    /// `xDlSym`
    DlSym,
    /// `xDlClose`
    DlClose,
    /// `xRandomness`
    Randomness,
    /// `xSleep`
    Sleep,
    /// `xCurrentTime`
    CurrentTime,
    /// `xGetLastError`
    GetLastError,
    /// `xCurrentTimeInt64`, version 2.
    CurrentTimeInt64,
    /// `xSetSystemCall`, version 3.
    SetSystemCall,
    /// `xGetSystemCall`, version 3.
    GetSystemCall,
    /// `xNextSystemCall`, version 3.
    NextSystemCall,
}

impl VfsMethod {
    /// Every method, in native table order.
    pub const ALL: [VfsMethod; 16] = [
        Self::Open,
        Self::Delete,
        Self::Access,
        Self::FullPathname,
        Self::DlOpen,
        Self::DlError,
        Self::DlSym,
        Self::DlClose,
        Self::Randomness,
        Self::Sleep,
        Self::CurrentTime,
        Self::GetLastError,
        Self::CurrentTimeInt64,
        Self::SetSystemCall,
        Self::GetSystemCall,
        Self::NextSystemCall,
    ];

    /// The native slot name, e.g. `"xOpen"`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "xOpen",
            Self::Delete => "xDelete",
            Self::Access => "xAccess",
            Self::FullPathname => "xFullPathname",
            Self::DlOpen => "xDlOpen",
            Self::DlError => "xDlError",
            Self::DlSym => "xDlSym",
            Self::DlClose => "xDlClose",
            Self::Randomness => "xRandomness",
            Self::Sleep => "xSleep",
            Self::CurrentTime => "xCurrentTime",
            Self::GetLastError => "xGetLastError",
            Self::CurrentTimeInt64 => "xCurrentTimeInt64",
            Self::SetSystemCall => "xSetSystemCall",
            Self::GetSystemCall => "xGetSystemCall",
            Self::NextSystemCall => "xNextSystemCall",
        }
    }

    /// Looks a method up by its native slot name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|method| method.as_str() == name)
    }

    /// The first table version that has this slot.
    pub const fn min_version(self) -> c_int {
        match self {
            Self::CurrentTimeInt64 => 2,
            Self::SetSystemCall | Self::GetSystemCall | Self::NextSystemCall => 3,
            _ => 1,
        }
    }

    const fn bit(self) -> u16 {
        1 << self as u16
    }
}

impl fmt::Display for VfsMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of [`VfsMethod`]s: which native slots a handler implements, or
/// which ones an adapter installed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VfsMethods(u16);

impl VfsMethods {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every method.
    pub const fn all() -> Self {
        Self(u16::MAX)
    }

    /// The methods that exist in table `version`.
    pub fn for_version(version: c_int) -> Self {
        VfsMethod::ALL
            .into_iter()
            .filter(|method| method.min_version() <= version)
            .collect()
    }

    /// Adds `method`.
    #[must_use]
    pub const fn with(self, method: VfsMethod) -> Self {
        Self(self.0 | method.bit())
    }

    /// Removes `method`.
    #[must_use]
    pub const fn without(self, method: VfsMethod) -> Self {
        Self(self.0 & !method.bit())
    }

    /// Adds `method` in place.
    pub fn insert(&mut self, method: VfsMethod) {
        self.0 |= method.bit();
    }

    /// Removes `method` in place.
    pub fn remove(&mut self, method: VfsMethod) {
        self.0 &= !method.bit();
    }

    /// Returns `true` if `method` is in the set.
    pub const fn contains(&self, method: VfsMethod) -> bool {
        self.0 & method.bit() != 0
    }

    /// Methods in both sets.
    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Returns `true` if no method is in the set.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// The methods in native table order.
    pub fn iter(&self) -> impl Iterator<Item = VfsMethod> + '_ {
        VfsMethod::ALL
            .into_iter()
            .filter(|method| self.contains(*method))
    }
}

impl FromIterator<VfsMethod> for VfsMethods {
    fn from_iter<I: IntoIterator<Item = VfsMethod>>(iter: I) -> Self {
        let mut set = Self::empty();
        for method in iter {
            set.insert(method);
        }
        set
    }
}

impl fmt::Debug for VfsMethods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_flags_helpers() {
        let mut flags = OpenFlags::new(
            ffi::SQLITE_OPEN_MAIN_DB | ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
        );
        assert!(flags.is_main_db());
        assert!(flags.is_create());
        assert!(!flags.is_uri());
        assert_eq!(flags.output, flags.input);

        flags.set_readonly();
        assert_eq!(flags.output & ffi::SQLITE_OPEN_READWRITE, 0);
        assert_ne!(flags.output & ffi::SQLITE_OPEN_READONLY, 0);
        assert!(!flags.is_readonly());
    }

    #[test]
    fn access_flags_round_trip_raw() {
        for flag in [AccessFlags::Exists, AccessFlags::ReadWrite, AccessFlags::Read] {
            assert_eq!(AccessFlags::from_raw(flag.to_raw()), Some(flag));
        }
        assert_eq!(AccessFlags::from_raw(99), None);
    }

    #[test]
    fn lock_levels_are_ordered() {
        assert!(LockLevel::Shared < LockLevel::Exclusive);
        assert_eq!(LockLevel::from_raw(4), Some(LockLevel::Exclusive));
        assert_eq!(LockLevel::from_raw(5), None);
    }

    #[test]
    fn sync_flags() {
        assert!(SyncFlags(ffi::SQLITE_SYNC_FULL).is_full());
        assert!(!SyncFlags(ffi::SQLITE_SYNC_NORMAL).is_full());
        assert!(SyncFlags(ffi::SQLITE_SYNC_NORMAL | ffi::SQLITE_SYNC_DATAONLY).is_data_only());
    }

    #[test]
    fn method_names() {
        assert_eq!(VfsMethod::from_name("xOpen"), Some(VfsMethod::Open));
        assert_eq!(VfsMethod::from_name("xNextSystemCall"), Some(VfsMethod::NextSystemCall));
        assert_eq!(VfsMethod::from_name("xNope"), None);
        assert_eq!(VfsMethod::Sleep.to_string(), "xSleep");
    }

    #[test]
    fn methods_per_version() {
        assert_eq!(VfsMethods::for_version(1).iter().count(), 12);
        assert_eq!(VfsMethods::for_version(2).iter().count(), 13);
        assert_eq!(VfsMethods::for_version(3).iter().count(), 16);
        assert!(!VfsMethods::for_version(1).contains(VfsMethod::CurrentTimeInt64));
    }

    #[test]
    fn method_set_operations() {
        let set = VfsMethods::empty()
            .with(VfsMethod::Open)
            .with(VfsMethod::Access)
            .without(VfsMethod::Open);
        assert!(set.contains(VfsMethod::Access));
        assert!(!set.contains(VfsMethod::Open));
        assert!(VfsMethods::all().intersection(set) == set);
        assert!(VfsMethods::empty().is_empty());
    }
}
