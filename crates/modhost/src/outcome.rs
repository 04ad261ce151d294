//! Discovery entries and per-entry load outcomes.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Error;
use crate::runtime::ModuleHandle;

/// A candidate that passed every validator.
///
/// Only discovery creates entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PluginEntry {
    name: String,
    path: PathBuf,
}

impl PluginEntry {
    pub(crate) fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// File name without its extension.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the module.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Display for PluginEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

/// A plugin module resident in the process.
#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    entry: PluginEntry,
    module: ModuleHandle,
    loaded_at: DateTime<Utc>,
}

impl LoadedPlugin {
    pub(crate) fn new(entry: PluginEntry, module: ModuleHandle) -> Self {
        Self {
            entry,
            module,
            loaded_at: Utc::now(),
        }
    }

    pub fn entry(&self) -> &PluginEntry {
        &self.entry
    }

    pub fn module(&self) -> &ModuleHandle {
        &self.module
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// A load failure together with the entry that caused it.
#[derive(Debug, thiserror::Error)]
#[error("Failed to load plugin {entry}: {source}")]
pub struct PluginLoadError {
    pub entry: PluginEntry,
    #[source]
    pub source: Error,
}

impl PluginLoadError {
    pub fn new(entry: PluginEntry, source: Error) -> Self {
        Self { entry, source }
    }
}

/// Result of loading one input entry. Exactly one per input, in input order.
#[derive(Debug)]
pub enum LoadOutcome {
    Success {
        entry: PluginEntry,
        plugin: LoadedPlugin,
    },
    /// The input entry was absent.
    NullEntry,
    FileNotFound {
        entry: PluginEntry,
        path: PathBuf,
    },
    ExceptionEncountered {
        entry: PluginEntry,
        error: PluginLoadError,
    },
    /// The host reported no error but produced no module.
    UnexpectedError {
        entry: PluginEntry,
        description: String,
    },
}

impl LoadOutcome {
    pub fn description(&self) -> String {
        match self {
            Self::Success { entry, .. } => format!("Successfully loaded plugin {}", entry.name),
            Self::NullEntry => "Plugin entry was null".to_string(),
            Self::FileNotFound { path, .. } => {
                format!("Plugin file not found: {}", path.display())
            }
            Self::ExceptionEncountered { error, .. } => error.to_string(),
            Self::UnexpectedError { description, .. } => description.clone(),
        }
    }

    /// The input entry, `None` for [`LoadOutcome::NullEntry`].
    pub fn entry(&self) -> Option<&PluginEntry> {
        match self {
            Self::Success { entry, .. }
            | Self::FileNotFound { entry, .. }
            | Self::ExceptionEncountered { entry, .. }
            | Self::UnexpectedError { entry, .. } => Some(entry),
            Self::NullEntry => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn plugin(&self) -> Option<&LoadedPlugin> {
        match self {
            Self::Success { plugin, .. } => Some(plugin),
            _ => None,
        }
    }

    pub fn into_plugin(self) -> Option<LoadedPlugin> {
        match self {
            Self::Success { plugin, .. } => Some(plugin),
            _ => None,
        }
    }

    /// Short variant label, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::NullEntry => "null_entry",
            Self::FileNotFound { .. } => "file_not_found",
            Self::ExceptionEncountered { .. } => "exception",
            Self::UnexpectedError { .. } => "unexpected_error",
        }
    }
}

impl Display for LoadOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}
