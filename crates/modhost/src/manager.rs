//! The plugin manager: registration, discovery and the load coordinator.
//!
//! A manager starts unlocked. Validators, resolvers and observers may be
//! registered until the first [`PluginManager::load`] call locks it; after that
//! every registration attempt fails with [`Error::Locked`].
//!
//! Loading is serialized process-wide. The manager's resolvers and observers
//! are reached through the host's [`LoadEvents`](crate::runtime::LoadEvents),
//! installed once per manager on its first load.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::discovery::{Discovery, DiscoveryIter};
use crate::error::{Error, Result};
use crate::metadata::{ElfMetadataReader, MetadataReader};
use crate::outcome::{LoadOutcome, LoadedPlugin, PluginEntry, PluginLoadError};
use crate::resolver::{DependencyResolver, ResolverChain};
use crate::runtime::{LoadHook, ModuleHandle, ModuleHost, ModuleIdentity, RuntimeInfo};
use crate::validator::{
    MetadataValidator, TypeDefinitionsValidator, ValidatorChain, VersionValidator,
};

/// Serializes every load call in the process, across all managers. Reentrant,
/// so an observer or resolver may itself call `load` on the same thread.
static LOAD_LOCK: ReentrantMutex<()> = parking_lot::const_reentrant_mutex(());

/// Called once for every module the host reports as loaded.
pub trait LoadObserver: Send + Sync {
    fn module_loaded(&self, module: &ModuleHandle);
}

impl<F> LoadObserver for F
where
    F: Fn(&ModuleHandle) + Send + Sync,
{
    fn module_loaded(&self, module: &ModuleHandle) {
        self(module)
    }
}

/// Everything registered on a manager. Frozen once the manager locks.
#[derive(Clone)]
pub(crate) struct Registrations {
    pub(crate) validators: ValidatorChain,
    pub(crate) resolvers: ResolverChain,
    pub(crate) observers: Vec<Arc<dyn LoadObserver>>,
    pub(crate) force_eager_resolution: bool,
}

impl Registrations {
    fn new(force_eager_resolution: bool) -> Self {
        Self {
            validators: ValidatorChain::new(),
            resolvers: ResolverChain::new(),
            observers: Vec::new(),
            force_eager_resolution,
        }
    }
}

/// The manager's side of the host's load events.
struct ManagerHooks {
    registrations: Arc<Registrations>,
}

impl LoadHook for ManagerHooks {
    fn module_loaded(&self, module: &ModuleHandle) {
        for observer in &self.registrations.observers {
            observer.module_loaded(module);
        }
    }

    fn resolve_dependency(
        &self,
        requesting: Option<&ModuleIdentity>,
        dependency: &str,
    ) -> Option<PathBuf> {
        self.registrations.resolvers.resolve(requesting, dependency)
    }
}

/// Fluent construction of a [`PluginManager`].
pub struct PluginManagerBuilder {
    config: ManagerConfig,
    host: Option<Arc<dyn ModuleHost>>,
    reader: Option<Arc<dyn MetadataReader>>,
    registrations: Registrations,
}

impl PluginManagerBuilder {
    fn new(config: ManagerConfig) -> Self {
        let registrations = Registrations::new(config.force_eager_resolution);
        Self {
            config,
            host: None,
            reader: None,
            registrations,
        }
    }

    /// Replace the whole configuration, keeping registered extension points.
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.registrations.force_eager_resolution = config.force_eager_resolution;
        self.config = config;
        self
    }

    pub fn version_validator(mut self, validator: impl VersionValidator + 'static) -> Self {
        self.registrations.validators.push_version(Arc::new(validator));
        self
    }

    pub fn metadata_validator(mut self, validator: impl MetadataValidator + 'static) -> Self {
        self.registrations.validators.push_metadata(Arc::new(validator));
        self
    }

    pub fn type_definitions_validator(
        mut self,
        validator: impl TypeDefinitionsValidator + 'static,
    ) -> Self {
        self.registrations
            .validators
            .push_type_definitions(Arc::new(validator));
        self
    }

    pub fn dependency_resolver(mut self, resolver: impl DependencyResolver + 'static) -> Self {
        self.registrations.resolvers.push(Arc::new(resolver));
        self
    }

    pub fn load_observer(mut self, observer: impl LoadObserver + 'static) -> Self {
        self.registrations.observers.push(Arc::new(observer));
        self
    }

    pub fn force_eager_resolution(mut self, force: bool) -> Self {
        self.config.force_eager_resolution = force;
        self.registrations.force_eager_resolution = force;
        self
    }

    pub fn module_extension(mut self, extension: impl Into<String>) -> Self {
        self.config = self.config.with_module_extension(extension);
        self
    }

    pub fn host(mut self, host: Arc<dyn ModuleHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn metadata_reader(mut self, reader: impl MetadataReader + 'static) -> Self {
        self.reader = Some(Arc::new(reader));
        self
    }

    /// Build the manager.
    ///
    /// Without an explicit host the native one is used; on platforms without
    /// it this fails with [`Error::UnsupportedPlatform`].
    pub fn build(self) -> Result<PluginManager> {
        let host = match self.host {
            Some(host) => host,
            None => default_host()?,
        };
        let reader = self
            .reader
            .unwrap_or_else(|| Arc::new(ElfMetadataReader::new()) as Arc<dyn MetadataReader>);

        let mut config = self.config;
        config.base_dir = config.absolute_base_dir();
        debug!(
            base_dir = %config.base_dir.display(),
            extension = %config.module_extension,
            force_eager_resolution = config.force_eager_resolution,
            "Plugin manager created"
        );

        Ok(PluginManager {
            config,
            host,
            reader,
            registrations: RwLock::new(Arc::new(self.registrations)),
            locked: AtomicBool::new(false),
            hooks: OnceCell::new(),
        })
    }
}

#[cfg(unix)]
fn default_host() -> Result<Arc<dyn ModuleHost>> {
    Ok(crate::runtime::NativeHost::shared())
}

#[cfg(not(unix))]
fn default_host() -> Result<Arc<dyn ModuleHost>> {
    Err(Error::UnsupportedPlatform)
}

/// Discovers, validates and loads plugins from one base directory.
pub struct PluginManager {
    config: ManagerConfig,
    host: Arc<dyn ModuleHost>,
    reader: Arc<dyn MetadataReader>,
    registrations: RwLock<Arc<Registrations>>,
    locked: AtomicBool,
    hooks: OnceCell<Arc<dyn LoadHook>>,
}

impl PluginManager {
    /// Manager over `base_dir` with the native host and default settings.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(base_dir).build()
    }

    pub fn builder(base_dir: impl Into<PathBuf>) -> PluginManagerBuilder {
        PluginManagerBuilder::new(ManagerConfig::new(base_dir))
    }

    /// Builder seeded from a configuration (e.g. [`ManagerConfig::from_env`]).
    pub fn from_config(config: ManagerConfig) -> PluginManagerBuilder {
        PluginManagerBuilder::new(config)
    }

    /// Absolute base directory.
    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<dyn ModuleHost> {
        &self.host
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn force_eager_resolution(&self) -> bool {
        self.registrations.read().force_eager_resolution
    }

    pub fn add_version_validator(&self, validator: impl VersionValidator + 'static) -> Result<()> {
        self.register(|r| r.validators.push_version(Arc::new(validator)))
    }

    pub fn add_metadata_validator(
        &self,
        validator: impl MetadataValidator + 'static,
    ) -> Result<()> {
        self.register(|r| r.validators.push_metadata(Arc::new(validator)))
    }

    pub fn add_type_definitions_validator(
        &self,
        validator: impl TypeDefinitionsValidator + 'static,
    ) -> Result<()> {
        self.register(|r| r.validators.push_type_definitions(Arc::new(validator)))
    }

    pub fn add_dependency_resolver(
        &self,
        resolver: impl DependencyResolver + 'static,
    ) -> Result<()> {
        self.register(|r| r.resolvers.push(Arc::new(resolver)))
    }

    pub fn add_load_observer(&self, observer: impl LoadObserver + 'static) -> Result<()> {
        self.register(|r| r.observers.push(Arc::new(observer)))
    }

    pub fn set_force_eager_resolution(&self, force: bool) -> Result<()> {
        self.register(|r| r.force_eager_resolution = force)
    }

    fn register(&self, apply: impl FnOnce(&mut Registrations)) -> Result<()> {
        let mut registrations = self.registrations.write();
        if self.is_locked() {
            return Err(Error::Locked);
        }
        apply(Arc::make_mut(&mut *registrations));
        Ok(())
    }

    /// Core runtime module candidates are checked against.
    pub fn runtime(&self) -> RuntimeInfo {
        let mut runtime = self.host.runtime();
        if let Some(module) = &self.config.core_runtime_module {
            runtime.module_name = module.clone();
        }
        runtime
    }

    /// Accepted plugins under the base directory, produced lazily.
    pub fn discover(&self) -> Discovery<'_> {
        Discovery::new(self)
    }

    pub(crate) fn scan(&self) -> DiscoveryIter {
        DiscoveryIter::new(
            &self.config.base_dir,
            &self.config.module_extension,
            self.reader.clone(),
            Arc::clone(&*self.registrations.read()),
            self.runtime(),
        )
    }

    /// Load every entry, producing one outcome per entry in input order.
    ///
    /// The first call locks the manager. A `None` entry yields
    /// [`LoadOutcome::NullEntry`]; no failure of one entry stops the others.
    pub fn load<I>(&self, entries: I) -> Vec<LoadOutcome>
    where
        I: IntoIterator,
        I::Item: Into<Option<PluginEntry>>,
    {
        let _guard = LOAD_LOCK.lock();
        let registrations = self.lock();
        self.install_hooks(&registrations);

        let outcomes: Vec<LoadOutcome> = entries
            .into_iter()
            .map(|entry| self.load_entry(entry.into(), registrations.force_eager_resolution))
            .collect();

        let loaded = outcomes.iter().filter(|o| o.is_success()).count();
        info!(
            total = outcomes.len(),
            loaded,
            failed = outcomes.len() - loaded,
            "Plugin load finished"
        );
        outcomes
    }

    fn lock(&self) -> Arc<Registrations> {
        let registrations = self.registrations.write();
        if !self.locked.swap(true, Ordering::AcqRel) {
            debug!(base_dir = %self.config.base_dir.display(), "Plugin manager locked");
        }
        Arc::clone(&*registrations)
    }

    fn install_hooks(&self, registrations: &Arc<Registrations>) {
        self.hooks.get_or_init(|| {
            let hooks: Arc<dyn LoadHook> = Arc::new(ManagerHooks {
                registrations: registrations.clone(),
            });
            self.host.events().install(&hooks);
            debug!(
                resolvers = registrations.resolvers.len(),
                observers = registrations.observers.len(),
                "Load hooks installed"
            );
            hooks
        });
    }

    fn load_entry(
        &self,
        entry: Option<PluginEntry>,
        force_eager_resolution: bool,
    ) -> LoadOutcome {
        let Some(entry) = entry else {
            debug!("Skipping null plugin entry");
            return LoadOutcome::NullEntry;
        };

        if !entry.path().exists() {
            warn!(plugin = %entry.name(), path = %entry.path().display(), "Plugin file not found");
            let path = entry.path().to_path_buf();
            return LoadOutcome::FileNotFound { entry, path };
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.load_module(entry.path(), force_eager_resolution)
        }))
        .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload.as_ref()))));

        match result {
            Ok(Some(module)) => {
                info!(plugin = %entry.name(), path = %entry.path().display(), "Plugin loaded");
                let plugin = LoadedPlugin::new(entry.clone(), module);
                LoadOutcome::Success { entry, plugin }
            }
            Ok(None) => {
                warn!(plugin = %entry.name(), "Host produced no module");
                let description = format!(
                    "Loading plugin {} reported no error but produced no module",
                    entry.name()
                );
                LoadOutcome::UnexpectedError { entry, description }
            }
            Err(error) => {
                warn!(plugin = %entry.name(), error = %error, "Plugin failed to load");
                let error = PluginLoadError::new(entry.clone(), error);
                LoadOutcome::ExceptionEncountered { entry, error }
            }
        }
    }

    fn load_module(
        &self,
        path: &Path,
        force_eager_resolution: bool,
    ) -> Result<Option<ModuleHandle>> {
        let Some(module) = self.host.load(path)? else {
            return Ok(None);
        };
        if force_eager_resolution {
            self.host.force_resolution(&module)?;
        }
        Ok(Some(module))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
