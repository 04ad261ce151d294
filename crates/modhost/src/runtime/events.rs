//! Process-wide load-event registry.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::{ModuleHandle, ModuleIdentity};
use crate::error::{Error, Result};

/// Callbacks a host invokes while it loads modules.
pub trait LoadHook: Send + Sync {
    /// A module became resident.
    fn module_loaded(&self, module: &ModuleHandle);

    /// The host could not find `dependency` on its own search path.
    fn resolve_dependency(
        &self,
        requesting: Option<&ModuleIdentity>,
        dependency: &str,
    ) -> Option<PathBuf>;
}

/// Installed load hooks, in installation order.
///
/// Hooks are held weakly: whoever installs a hook keeps it alive, and a dropped
/// hook silently stops receiving events.
#[derive(Default)]
pub struct LoadEvents {
    hooks: RwLock<Vec<Weak<dyn LoadHook>>>,
}

impl LoadEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, hook: &Arc<dyn LoadHook>) {
        let mut hooks = self.hooks.write();
        hooks.retain(|hook| hook.strong_count() > 0);
        hooks.push(Arc::downgrade(hook));
    }

    /// Number of hooks still alive.
    pub fn hook_count(&self) -> usize {
        self.hooks
            .read()
            .iter()
            .filter(|hook| hook.strong_count() > 0)
            .count()
    }

    // Callbacks run on a snapshot so a hook may install further hooks.
    fn live(&self) -> Vec<Arc<dyn LoadHook>> {
        self.hooks.read().iter().filter_map(Weak::upgrade).collect()
    }

    pub fn notify_loaded(&self, module: &ModuleHandle) {
        tracing::debug!(module = %module.identity(), "Module loaded");
        for hook in self.live() {
            hook.module_loaded(module);
        }
    }

    /// Ask every hook in order for a path; the first answer wins.
    pub fn resolve(
        &self,
        requesting: Option<&ModuleIdentity>,
        dependency: &str,
    ) -> Result<PathBuf> {
        for hook in self.live() {
            if let Some(path) = hook.resolve_dependency(requesting, dependency) {
                tracing::debug!(dependency, path = %path.display(), "Dependency resolved");
                return Ok(path);
            }
        }

        Err(Error::DependencyResolution {
            dependency: dependency.to_string(),
            requesting: requesting.cloned(),
        })
    }
}
