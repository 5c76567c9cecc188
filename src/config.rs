//! Registration options for an adapter VFS.

use std::collections::BTreeSet;
use std::ffi::c_int;

use crate::types::VfsMethod;
use crate::{Error, Result};

/// How an adapter VFS is registered.
///
/// # Examples
///
/// ```rust
/// use vfs_bridge::VfsOptions;
///
/// let options = VfsOptions::new("audit")
///     .base("unix")
///     .max_pathname(512)
///     .exclude("xDlOpen");
/// assert!(options.validate().is_ok());
/// assert_eq!(options.base.as_deref(), Some("unix"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VfsOptions {
    /// Name the VFS is registered under.
    pub name: String,
    /// Name of the VFS to delegate to, if any.
    pub base: Option<String>,
    /// Make this the engine's default VFS.
    pub make_default: bool,
    /// Maximum pathname length; 0 inherits the base's.
    pub max_pathname: c_int,
    /// Native table version, 1 to 3.
    pub version: c_int,
    /// Native slot names (`"xDlOpen"`, ...) left uninstalled.
    pub exclude: BTreeSet<String>,
}

impl Default for VfsOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            base: None,
            make_default: false,
            max_pathname: 0,
            version: 3,
            exclude: BTreeSet::new(),
        }
    }
}

impl VfsOptions {
    /// Options for a VFS called `name`, with no base.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Delegates to the VFS called `base`.
    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Delegates to the engine's current default VFS.
    pub fn with_default_base(self) -> Self {
        // An empty name resolves to the default VFS.
        self.base("")
    }

    /// Sets whether the VFS becomes the default.
    pub fn make_default(mut self, make_default: bool) -> Self {
        self.make_default = make_default;
        self
    }

    /// Sets the maximum pathname length.
    pub fn max_pathname(mut self, max_pathname: c_int) -> Self {
        self.max_pathname = max_pathname;
        self
    }

    /// Sets the native table version.
    pub fn version(mut self, version: c_int) -> Self {
        self.version = version;
        self
    }

    /// Leaves the slot called `method` uninstalled.
    pub fn exclude(mut self, method: impl Into<String>) -> Self {
        self.exclude.insert(method.into());
        self
    }

    /// Checks the options without touching the engine.
    pub fn validate(&self) -> Result<()> {
        if !(1..=3).contains(&self.version) {
            return Err(Error::InvalidArgument(format!(
                "version must be 1, 2 or 3, got {}",
                self.version
            )));
        }
        if self.name.is_empty() {
            return Err(Error::InvalidArgument("vfs name is empty".into()));
        }
        if self.name.contains('\0') {
            return Err(Error::InvalidArgument("vfs name contains NUL".into()));
        }
        if self.max_pathname < 0 {
            return Err(Error::InvalidArgument(format!(
                "max_pathname must not be negative, got {}",
                self.max_pathname
            )));
        }
        if let Some(unknown) = self
            .exclude
            .iter()
            .find(|name| VfsMethod::from_name(name).is_none())
        {
            return Err(Error::InvalidArgument(format!(
                "unknown method in exclude: {unknown}"
            )));
        }
        Ok(())
    }

    /// The excluded methods, parsed.
    pub(crate) fn excluded_methods(&self) -> impl Iterator<Item = VfsMethod> + '_ {
        self.exclude.iter().filter_map(|name| VfsMethod::from_name(name))
    }

    /// Parses options from JSON.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidArgument(e.to_string()))
    }

    /// Serializes the options to JSON.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidArgument(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = VfsOptions::new("plain");
        assert_eq!(options.version, 3);
        assert_eq!(options.max_pathname, 0);
        assert!(options.base.is_none());
        assert!(!options.make_default);
    }

    #[test]
    fn invalid_version() {
        for version in [0, 4, -1] {
            let err = VfsOptions::new("v").version(version).validate().unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
    }

    #[test]
    fn invalid_names() {
        assert!(VfsOptions::new("").validate().is_err());
        assert!(VfsOptions::new("a\0b").validate().is_err());
    }

    #[test]
    fn unknown_exclusion() {
        let err = VfsOptions::new("v").exclude("xFrobnicate").validate().unwrap_err();
        assert!(err.to_string().contains("xFrobnicate"));
    }

    #[test]
    fn excluded_methods_parse() {
        let options = VfsOptions::new("v").exclude("xSleep").exclude("xDlOpen");
        let methods: Vec<_> = options.excluded_methods().collect();
        assert_eq!(methods, vec![VfsMethod::DlOpen, VfsMethod::Sleep]);
    }

    #[test]
    fn default_base_is_empty_name() {
        let options = VfsOptions::new("v").with_default_base();
        assert_eq!(options.base.as_deref(), Some(""));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_round_trip() {
        let options = VfsOptions::new("json").base("unix").exclude("xSleep");
        let json = options.to_json().unwrap();
        assert_eq!(VfsOptions::from_json(&json).unwrap(), options);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_fills_defaults() {
        let options = VfsOptions::from_json(r#"{"name":"partial"}"#).unwrap();
        assert_eq!(options.version, 3);
    }
}
