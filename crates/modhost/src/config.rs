//! Manager configuration.
//!
//! Defaults and environment variable names live in the [`defaults`] and
//! [`env_vars`] modules so the CLI and embedding hosts share one set.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default values.
pub mod defaults {
    /// Directory scanned when none is configured.
    pub const PLUGIN_DIR: &str = "plugins";

    pub const FORCE_EAGER_RESOLUTION: bool = true;

    /// Extension of loadable modules on this platform.
    pub const MODULE_EXTENSION: &str = std::env::consts::DLL_EXTENSION;

    /// Core runtime module plugins are version-checked against.
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    pub const CORE_RUNTIME_MODULE: &str = "libc.so.6";
    #[cfg(all(target_os = "linux", not(target_env = "gnu")))]
    pub const CORE_RUNTIME_MODULE: &str = "libc.so";
    #[cfg(target_os = "macos")]
    pub const CORE_RUNTIME_MODULE: &str = "libSystem.B.dylib";
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    pub const CORE_RUNTIME_MODULE: &str = "libc.so";
}

/// Environment variable names.
pub mod env_vars {
    pub const PLUGIN_DIR: &str = "MODHOST_PLUGIN_DIR";
    pub const FORCE_EAGER_RESOLUTION: &str = "MODHOST_FORCE_EAGER_RESOLUTION";
    pub const CORE_RUNTIME: &str = "MODHOST_CORE_RUNTIME";

    /// Parse a boolean flag (`1`/`true`/`yes`/`on`, `0`/`false`/`no`/`off`).
    pub fn parse_flag(value: &str) -> Option<bool> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory searched recursively for plugin modules.
    pub base_dir: PathBuf,
    /// File extension (without the dot) of candidate modules.
    pub module_extension: String,
    /// Force full symbol resolution right after each module is loaded.
    pub force_eager_resolution: bool,
    /// Overrides the core runtime module name reported by the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_runtime_module: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(defaults::PLUGIN_DIR),
            module_extension: defaults::MODULE_EXTENSION.to_string(),
            force_eager_resolution: defaults::FORCE_EAGER_RESOLUTION,
            core_runtime_module: None,
        }
    }
}

impl ManagerConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Default::default()
        }
    }

    /// Defaults overridden by `MODHOST_*` environment variables.
    ///
    /// Unparsable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var(env_vars::PLUGIN_DIR) {
            if !dir.is_empty() {
                config.base_dir = PathBuf::from(dir);
            }
        }

        if let Ok(value) = std::env::var(env_vars::FORCE_EAGER_RESOLUTION) {
            match env_vars::parse_flag(&value) {
                Some(flag) => config.force_eager_resolution = flag,
                None => tracing::warn!(
                    variable = env_vars::FORCE_EAGER_RESOLUTION,
                    value = %value,
                    "Ignoring invalid boolean"
                ),
            }
        }

        if let Ok(module) = std::env::var(env_vars::CORE_RUNTIME) {
            if !module.is_empty() {
                config.core_runtime_module = Some(module);
            }
        }

        config
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_module_extension(mut self, extension: impl Into<String>) -> Self {
        self.module_extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn with_force_eager_resolution(mut self, force: bool) -> Self {
        self.force_eager_resolution = force;
        self
    }

    pub fn with_core_runtime_module(mut self, module: impl Into<String>) -> Self {
        self.core_runtime_module = Some(module.into());
        self
    }

    /// The base directory made absolute against the current directory.
    pub(crate) fn absolute_base_dir(&self) -> PathBuf {
        absolute(&self.base_dir)
    }
}

pub(crate) fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
