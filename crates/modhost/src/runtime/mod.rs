//! The host side of loading: how modules become resident in the process.
//!
//! The manager never maps modules itself. It talks to a [`ModuleHost`], which
//! owns the mapping mechanics and a process-wide [`LoadEvents`] registry through
//! which the manager's dependency resolvers and load observers are reached.

mod events;
#[cfg(unix)]
pub mod native;

use std::any::Any;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::metadata::ModuleVersion;

pub use events::{LoadEvents, LoadHook};
#[cfg(unix)]
pub use native::{NativeHost, NativeModule};

/// Name and location of a module known to the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleIdentity {
    pub name: String,
    pub path: PathBuf,
}

impl ModuleIdentity {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Identity derived from a path, named after its file stem.
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::new(name, path)
    }
}

impl Display for ModuleIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

/// Opaque handle to a resident module.
///
/// Cloning is cheap. The host-specific payload is reachable through
/// [`ModuleHandle::downcast_ref`]; for the native host it is a [`NativeModule`].
#[derive(Clone)]
pub struct ModuleHandle {
    identity: ModuleIdentity,
    inner: Arc<dyn Any + Send + Sync>,
}

impl ModuleHandle {
    pub fn new<T>(identity: ModuleIdentity, inner: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            identity,
            inner: Arc::new(inner),
        }
    }

    pub fn identity(&self) -> &ModuleIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn path(&self) -> &Path {
        &self.identity.path
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// The host's own core runtime module, the one plugins are version-checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    pub module_name: String,
    pub version: ModuleVersion,
}

impl RuntimeInfo {
    pub fn new(module_name: impl Into<String>, version: ModuleVersion) -> Self {
        Self {
            module_name: module_name.into(),
            version,
        }
    }
}

/// The host runtime's module loading primitive.
pub trait ModuleHost: Send + Sync {
    /// Core runtime module of the running process.
    fn runtime(&self) -> RuntimeInfo;

    /// Process-wide load-event registry of this host.
    fn events(&self) -> &LoadEvents;

    /// Make the module at `path` resident.
    ///
    /// External references the host cannot satisfy on its own are routed to
    /// [`LoadEvents::resolve`]; every module that becomes resident is reported
    /// through [`LoadEvents::notify_loaded`]. `Ok(None)` means the host reported
    /// no error but produced no module.
    fn load(&self, path: &Path) -> Result<Option<ModuleHandle>>;

    /// Force resolution of the module's complete symbol table now, so link
    /// failures surface here instead of on first use.
    fn force_resolution(&self, module: &ModuleHandle) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_path() {
        let identity = ModuleIdentity::from_path(Path::new("/plugins/libgreeter.so"));
        assert_eq!(identity.name, "libgreeter");
        assert_eq!(identity.path, PathBuf::from("/plugins/libgreeter.so"));
        assert!(identity.to_string().contains("/plugins/libgreeter.so"));
    }

    #[test]
    fn test_handle_downcast() {
        let handle = ModuleHandle::new(ModuleIdentity::new("m", "/m.so"), 42u32);
        assert_eq!(handle.downcast_ref::<u32>(), Some(&42));
        assert!(handle.downcast_ref::<String>().is_none());
        assert_eq!(handle.name(), "m");

        let clone = handle.clone();
        assert_eq!(clone.path(), Path::new("/m.so"));
    }
}
