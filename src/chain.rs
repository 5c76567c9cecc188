//! Tracks adapter registrations and resolves the VFS each one delegates to.
//!
//! Every adapter is recorded by the address of its native structure, so a
//! [`NativeVfs`] found by name can tell whether it is one of ours and keep
//! the registration alive. Entries are weak: the registry never keeps a
//! VFS registered by itself.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use libsqlite3_sys as ffi;
use parking_lot::Mutex;

use crate::{Error, NativeVfs, Result, Vfs, VfsOptions};

/// Chains longer than this are treated as cycles.
const MAX_DEPTH: usize = 64;

static ADAPTERS: Mutex<BTreeMap<usize, Weak<Vfs>>> = parking_lot::const_mutex(BTreeMap::new());

pub(crate) fn track(vfs: &Arc<Vfs>) {
    ADAPTERS.lock().insert(vfs.as_ptr() as usize, Arc::downgrade(vfs));
}

pub(crate) fn forget(ptr: *mut ffi::sqlite3_vfs) {
    // Dropping a Weak never runs Vfs::drop, so this cannot re-enter the lock.
    let removed = ADAPTERS.lock().remove(&(ptr as usize));
    drop(removed);
}

pub(crate) fn lookup(ptr: *mut ffi::sqlite3_vfs) -> Option<Arc<Vfs>> {
    let weak = ADAPTERS.lock().get(&(ptr as usize)).cloned()?;
    // Upgrade outside the lock: a failed race with the last drop is fine.
    weak.upgrade()
}

/// Fails if a registered adapter already uses `name`.
pub(crate) fn ensure_unique(name: &str) -> Result<()> {
    let live: Vec<Weak<Vfs>> = ADAPTERS.lock().values().cloned().collect();
    let taken = live
        .iter()
        .filter_map(Weak::upgrade)
        .any(|vfs| vfs.is_registered() && vfs.name() == name);
    if taken {
        return Err(Error::InvalidArgument(format!("an adapter named {name:?} is already registered")));
    }
    Ok(())
}

/// Finds the base named in `options`, checking it can be delegated to.
///
/// # Errors
///
/// - [`Error::NotFound`] if no VFS has that name or its version is not 1 to 3
/// - [`Error::InvalidArgument`] if the base delegates back to `options.name`
pub(crate) fn resolve_base(options: &VfsOptions) -> Result<Option<NativeVfs>> {
    let Some(name) = options.base.as_deref() else {
        return Ok(None);
    };
    let base = NativeVfs::find(name)?;
    if !(1..=3).contains(&base.version()) {
        return Err(Error::NotFound {
            what: "vfs with a supported version",
            name: base.name(),
        });
    }
    check_cycle(&options.name, &base)?;
    Ok(Some(base))
}

fn check_cycle(name: &str, base: &NativeVfs) -> Result<()> {
    let mut path = vec![name.to_owned()];
    let mut current = Some(base.clone());
    while let Some(vfs) = current {
        let next_name = vfs.name();
        path.push(next_name.clone());
        if next_name == name || path.len() > MAX_DEPTH {
            return Err(Error::InvalidArgument(format!(
                "vfs {name:?} would delegate to itself: {}",
                path.join(" -> ")
            )));
        }
        current = vfs.registration().and_then(|r| r.base().cloned());
    }
    tracing::trace!(chain = %path.join(" -> "), "resolved delegation chain");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VfsHandler;

    struct Passthrough;
    impl VfsHandler for Passthrough {}

    #[test]
    fn lookup_finds_live_adapters_only() {
        let vfs = Vfs::register(Passthrough, VfsOptions::new("chain-live").with_default_base()).unwrap();
        let ptr = vfs.as_ptr();
        assert!(lookup(ptr).is_some_and(|found| Arc::ptr_eq(&found, &vfs)));
        drop(vfs);
        assert!(lookup(ptr).is_none());
    }

    #[test]
    fn engine_vfs_is_not_an_adapter() {
        let base = NativeVfs::default_vfs().unwrap();
        assert!(lookup(base.as_ptr()).is_none());
        assert!(!base.is_adapter());
    }

    #[test]
    fn missing_base() {
        let options = VfsOptions::new("chain-orphan").base("chain-no-such-vfs");
        assert!(matches!(resolve_base(&options), Err(Error::NotFound { .. })));
    }

    #[test]
    fn adapter_names_are_unique() {
        let first = Vfs::register(Passthrough, VfsOptions::new("chain-unique")).unwrap();
        assert!(matches!(ensure_unique("chain-unique"), Err(Error::InvalidArgument(_))));
        first.unregister().unwrap();
        assert!(ensure_unique("chain-unique").is_ok());
    }

    #[test]
    fn rejects_delegating_to_itself() {
        let first = Vfs::register(Passthrough, VfsOptions::new("chain-loop").with_default_base()).unwrap();
        let err = Vfs::register(Passthrough, VfsOptions::new("chain-loop").base("chain-loop")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));

        let outer = Vfs::register(Passthrough, VfsOptions::new("chain-loop-outer").base("chain-loop")).unwrap();
        let err = Vfs::register(Passthrough, VfsOptions::new("chain-loop").base("chain-loop-outer")).unwrap_err();
        assert!(err.to_string().contains("chain-loop-outer"));
        drop(outer);
        drop(first);
    }
}
