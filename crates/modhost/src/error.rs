//! Error types shared by the discovery and load pipelines.

use std::path::PathBuf;

use crate::metadata::ParseError;
use crate::runtime::ModuleIdentity;

/// Errors raised by the plugin manager and the host collaborators it drives.
///
/// Plugin-data problems never escape [`PluginManager::load`](crate::PluginManager::load)
/// as an `Err`: they are wrapped into a [`LoadOutcome`](crate::LoadOutcome) instead.
/// Only caller misuse (registration after locking) is returned directly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Registration was attempted after the first load call.
    #[error("Plugin manager is locked and cannot be modified anymore")]
    Locked,

    /// The module at the given path is not a loadable binary module.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// No resolver in the chain supplied a path for the dependency.
    #[error("Unable to resolve dependency {dependency}. Requesting module: {}", requesting_label(.requesting))]
    DependencyResolution {
        dependency: String,
        requesting: Option<ModuleIdentity>,
    },

    /// A resolver supplied a library the dynamic linker cannot match against
    /// the requested `DT_NEEDED` name, because its soname differs.
    #[error("{path} cannot satisfy dependency {dependency}: its soname is {}", soname.as_deref().unwrap_or("<none>"))]
    SonameMismatch {
        dependency: String,
        path: PathBuf,
        soname: Option<String>,
    },

    /// A resolved dependency (transitively) requires a module still being loaded.
    #[error("Dependency cycle detected while loading {0}")]
    DependencyCycle(PathBuf),

    /// The host dynamic loader refused the module.
    #[error("Load failed for {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Forced eager resolution found an import nothing in scope defines.
    #[error("Unresolved symbol {symbol} in {module}")]
    UnresolvedSymbol { module: String, symbol: String },

    /// Host or hook code panicked while loading a module.
    #[error("Panicked while loading: {0}")]
    Panicked(String),

    #[error("Unsupported platform")]
    UnsupportedPlatform,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn requesting_label(requesting: &Option<ModuleIdentity>) -> String {
    match requesting {
        Some(identity) => identity.to_string(),
        None => "<unknown>".to_string(),
    }
}

/// Result type for manager operations.
pub type Result<T> = std::result::Result<T, Error>;
