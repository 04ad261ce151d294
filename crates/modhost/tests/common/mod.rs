//! Shared fixtures: a fake metadata reader and a fake module host backed by one
//! in-memory catalog, so tests never need real shared objects.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use modhost::{
    DefinitionKind, Error, LoadEvents, MetadataReader, ModuleHandle, ModuleHost, ModuleIdentity,
    ModuleMetadata, ModuleReference, ModuleVersion, ParseError, PluginManager,
    PluginManagerBuilder, RuntimeInfo, TypeDefinition,
};
use parking_lot::Mutex;
use tempfile::TempDir;

pub const HOST_RUNTIME: &str = "libc.so.6";
pub const EXT: &str = std::env::consts::DLL_EXTENSION;

pub fn host_version() -> ModuleVersion {
    ModuleVersion::new(2, 35, 0, 0)
}

/// What a fake module looks like to the reader and how it behaves when loaded.
#[derive(Debug, Clone, Default)]
pub struct FakeModule {
    pub metadata: ModuleMetadata,
    /// Needed at load time.
    pub eager_deps: Vec<String>,
    /// Only needed once every symbol is bound.
    pub lazy_deps: Vec<String>,
    pub produces_nothing: bool,
    pub panics: bool,
}

impl FakeModule {
    /// A module referencing the core runtime at `runtime` and defining `definitions`.
    pub fn plugin(runtime: ModuleVersion, definitions: &[&str]) -> Self {
        Self {
            metadata: ModuleMetadata {
                type_definitions: definitions
                    .iter()
                    .map(|name| TypeDefinition::new(*name, DefinitionKind::Function))
                    .collect(),
                module_references: vec![ModuleReference::new(HOST_RUNTIME, runtime)],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// A module with no core runtime reference.
    pub fn without_runtime(definitions: &[&str]) -> Self {
        let mut module = Self::plugin(ModuleVersion::default(), definitions);
        module.metadata.module_references.clear();
        module
    }

    pub fn with_reference(mut self, name: &str, version: ModuleVersion) -> Self {
        self.metadata
            .module_references
            .push(ModuleReference::new(name, version));
        self
    }

    pub fn with_eager_dep(mut self, name: &str) -> Self {
        self.metadata
            .module_references
            .push(ModuleReference::new(name, ModuleVersion::default()));
        self.eager_deps.push(name.to_string());
        self
    }

    pub fn with_lazy_dep(mut self, name: &str) -> Self {
        self.metadata
            .module_references
            .push(ModuleReference::new(name, ModuleVersion::default()));
        self.lazy_deps.push(name.to_string());
        self
    }

    pub fn producing_nothing(mut self) -> Self {
        self.produces_nothing = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }
}

/// Fake modules keyed by file name.
#[derive(Default)]
pub struct Catalog {
    modules: Mutex<HashMap<String, FakeModule>>,
    reads: AtomicUsize,
}

impl Catalog {
    pub fn insert(&self, file_name: &str, module: FakeModule) {
        self.modules.lock().insert(file_name.to_string(), module);
    }

    pub fn get(&self, path: &Path) -> Option<FakeModule> {
        self.modules.lock().get(&file_name(path)).cloned()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub struct FakeReader {
    catalog: Arc<Catalog>,
}

impl MetadataReader for FakeReader {
    fn read_metadata(&self, path: &Path) -> Result<ModuleMetadata, ParseError> {
        self.catalog.reads.fetch_add(1, Ordering::SeqCst);
        // Fail like a real reader when the file is gone.
        std::fs::metadata(path)?;
        self.catalog
            .get(path)
            .map(|module| module.metadata)
            .ok_or_else(|| ParseError::Malformed(format!("{} is not a module", path.display())))
    }
}

/// Host that "loads" catalog modules and routes missing dependencies to its
/// own load events, like the native host does.
pub struct FakeHost {
    catalog: Arc<Catalog>,
    events: LoadEvents,
    /// Found on the default search path without any resolver.
    available: Vec<String>,
    loaded: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            events: LoadEvents::new(),
            available: vec![HOST_RUNTIME.to_string(), "libm.so.6".to_string()],
            loaded: Mutex::new(Vec::new()),
        }
    }

    /// File names of every module this host made resident, in order.
    pub fn loaded(&self) -> Vec<String> {
        self.loaded.lock().clone()
    }

    fn is_resident(&self, name: &str) -> bool {
        self.available.iter().any(|n| n == name) || self.loaded.lock().iter().any(|n| n == name)
    }

    fn ensure(&self, requesting: &ModuleIdentity, dependency: &str) -> modhost::Result<()> {
        if self.is_resident(dependency) {
            return Ok(());
        }
        let path = self.events.resolve(Some(requesting), dependency)?;
        match self.load(&path)? {
            Some(_) => Ok(()),
            None => Err(Error::LoadFailed {
                path,
                message: "dependency produced no module".to_string(),
            }),
        }
    }
}

impl ModuleHost for FakeHost {
    fn runtime(&self) -> RuntimeInfo {
        RuntimeInfo::new(HOST_RUNTIME, host_version())
    }

    fn events(&self) -> &LoadEvents {
        &self.events
    }

    fn load(&self, path: &Path) -> modhost::Result<Option<ModuleHandle>> {
        let module = self.catalog.get(path).ok_or_else(|| Error::LoadFailed {
            path: path.to_path_buf(),
            message: "unknown module".to_string(),
        })?;
        if module.panics {
            panic!("initializer of {} panicked", path.display());
        }

        let identity = ModuleIdentity::from_path(path);
        for dependency in &module.eager_deps {
            self.ensure(&identity, dependency)?;
        }
        if module.produces_nothing {
            return Ok(None);
        }

        let handle = ModuleHandle::new(identity, module);
        self.loaded.lock().push(file_name(path));
        self.events.notify_loaded(&handle);
        Ok(Some(handle))
    }

    fn force_resolution(&self, module: &ModuleHandle) -> modhost::Result<()> {
        let fake = module
            .downcast_ref::<FakeModule>()
            .ok_or_else(|| Error::LoadFailed {
                path: module.path().to_path_buf(),
                message: "not a fake module".to_string(),
            })?;
        for dependency in &fake.lazy_deps {
            self.ensure(module.identity(), dependency)?;
        }
        Ok(())
    }
}

/// A temporary plugin directory, a dependency directory and a fake host.
pub struct Fixture {
    pub dir: TempDir,
    pub catalog: Arc<Catalog>,
    pub host: Arc<FakeHost>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("plugins")).unwrap();
        std::fs::create_dir_all(dir.path().join("deps")).unwrap();
        let catalog = Arc::new(Catalog::default());
        let host = Arc::new(FakeHost::new(catalog.clone()));
        Self { dir, catalog, host }
    }

    pub fn plugin_dir(&self) -> PathBuf {
        self.dir.path().join("plugins")
    }

    pub fn deps_dir(&self) -> PathBuf {
        self.dir.path().join("deps")
    }

    /// Write `plugins/<name>.<ext>` and register it.
    pub fn add_plugin(&self, name: &str, module: FakeModule) -> PathBuf {
        self.add_plugin_in("", name, module)
    }

    pub fn add_plugin_in(&self, subdir: &str, name: &str, module: FakeModule) -> PathBuf {
        let dir = self.plugin_dir().join(subdir);
        std::fs::create_dir_all(&dir).unwrap();
        let file = format!("{name}.{EXT}");
        let path = dir.join(&file);
        std::fs::write(&path, b"fake module").unwrap();
        self.catalog.insert(&file, module);
        path
    }

    /// Write `deps/<file_name>` and register it as a plain module.
    pub fn add_dependency(&self, file_name: &str) -> PathBuf {
        let path = self.deps_dir().join(file_name);
        std::fs::write(&path, b"fake dependency").unwrap();
        self.catalog.insert(file_name, FakeModule::default());
        path
    }

    pub fn reader(&self) -> FakeReader {
        FakeReader {
            catalog: self.catalog.clone(),
        }
    }

    pub fn builder(&self) -> PluginManagerBuilder {
        PluginManager::builder(self.plugin_dir())
            .host(self.host.clone())
            .metadata_reader(self.reader())
    }

    pub fn manager(&self) -> PluginManager {
        self.builder().build().unwrap()
    }
}
