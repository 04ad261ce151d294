//! Native host backed by the platform dynamic linker.
//!
//! Modules are opened with `RTLD_LAZY | RTLD_LOCAL`. Before a module is opened
//! its `DT_NEEDED` entries are checked: anything already resident, found on the
//! module's own run path or found by the default search is left to the dynamic
//! linker; everything else is handed to the installed resolvers and the path
//! they supply is opened first, so the linker finds it by soname afterwards.
//!
//! Objects the linker maps on its own while opening a module are reported to
//! observers as well, ahead of the module that pulled them in.

use std::collections::HashSet;
use std::ffi::{c_void, OsStr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::os::unix::{Library, Symbol, RTLD_LAZY, RTLD_LOCAL};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::{LoadEvents, ModuleHandle, ModuleHost, ModuleIdentity, RuntimeInfo};
use crate::config::defaults;
use crate::error::{Error, Result};
use crate::metadata::{ElfMetadataReader, MetadataReader, ModuleMetadata, ModuleVersion};

static SHARED: Lazy<Arc<NativeHost>> = Lazy::new(|| Arc::new(NativeHost::new()));

/// A module opened by the native host.
pub struct NativeModule {
    name: String,
    library: Library,
    metadata: ModuleMetadata,
}

impl NativeModule {
    pub fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    /// Look up a symbol exported by the module.
    ///
    /// # Safety
    /// `T` must match the actual type of the symbol.
    pub unsafe fn get<T>(&self, symbol: &[u8]) -> Result<Symbol<T>> {
        self.library
            .get(symbol)
            .map_err(|e| {
                tracing::debug!(module = %self.name, error = %e, "Symbol lookup failed");
                Error::UnresolvedSymbol {
                    module: self.name.clone(),
                    symbol: String::from_utf8_lossy(symbol).into_owned(),
                }
            })
    }
}

/// A library freshly returned by `dlopen`.
struct Opened {
    library: Library,
    /// Where the linker mapped the object, when this open mapped it.
    path: Option<PathBuf>,
    /// Objects mapped as a side effect, in load order.
    transitive: Vec<PathBuf>,
}

/// Host implementation over `dlopen`.
///
/// There is one per process, reachable through [`NativeHost::shared`]; its
/// [`LoadEvents`] are the process-wide hook registry.
pub struct NativeHost {
    events: LoadEvents,
    reader: ElfMetadataReader,
    /// Everything this host made resident stays resident for the life of the process.
    retained: Mutex<Vec<ModuleHandle>>,
}

impl NativeHost {
    fn new() -> Self {
        Self {
            events: LoadEvents::new(),
            reader: ElfMetadataReader::new(),
            retained: Mutex::new(Vec::new()),
        }
    }

    pub fn shared() -> Arc<NativeHost> {
        SHARED.clone()
    }

    /// Load `path`. When it was supplied for the `DT_NEEDED` name `satisfies`,
    /// its soname has to match that name or the linker will never use it.
    fn load_module(
        &self,
        path: &Path,
        satisfies: Option<&str>,
        in_progress: &mut Vec<PathBuf>,
    ) -> Result<ModuleHandle> {
        if in_progress.iter().any(|loading| loading == path) {
            return Err(Error::DependencyCycle(path.to_path_buf()));
        }

        let metadata = self.reader.read_metadata(path)?;
        if let Some(dependency) = satisfies {
            if metadata.soname.as_deref() != Some(dependency) {
                return Err(Error::SonameMismatch {
                    dependency: dependency.to_string(),
                    path: path.to_path_buf(),
                    soname: metadata.soname,
                });
            }
        }
        let identity = ModuleIdentity::from_path(path);

        in_progress.push(path.to_path_buf());
        let result = self.load_with_dependencies(path, identity, metadata, in_progress);
        in_progress.pop();
        result
    }

    fn load_with_dependencies(
        &self,
        path: &Path,
        identity: ModuleIdentity,
        metadata: ModuleMetadata,
        in_progress: &mut Vec<PathBuf>,
    ) -> Result<ModuleHandle> {
        let origin = path.parent().unwrap_or_else(|| Path::new("/"));
        for reference in &metadata.module_references {
            self.ensure_dependency(&identity, &reference.name, &metadata, origin, in_progress)?;
        }

        let resident = is_resident(path.as_os_str());
        let opened = open_tracked(path)?;
        self.report_transitive(&opened.transitive);
        let module = NativeModule {
            name: identity.name.clone(),
            library: opened.library,
            metadata,
        };
        let handle = ModuleHandle::new(identity, module);
        if !resident {
            self.retain(&handle);
        }
        Ok(handle)
    }

    fn ensure_dependency(
        &self,
        requesting: &ModuleIdentity,
        dependency: &str,
        metadata: &ModuleMetadata,
        origin: &Path,
        in_progress: &mut Vec<PathBuf>,
    ) -> Result<()> {
        if is_resident(dependency.as_ref()) {
            return Ok(());
        }

        let candidate = metadata
            .search_paths
            .iter()
            .map(|dir| PathBuf::from(dir.replace("$ORIGIN", &origin.to_string_lossy())))
            .map(|dir| dir.join(dependency))
            .find(|candidate| candidate.is_file())
            .unwrap_or_else(|| PathBuf::from(dependency));

        match open_tracked(&candidate) {
            Ok(opened) => {
                self.report_transitive(&opened.transitive);
                let path = opened.path.unwrap_or(candidate);
                let identity = ModuleIdentity::from_path(&path);
                let module = NativeModule {
                    name: identity.name.clone(),
                    library: opened.library,
                    metadata: ModuleMetadata::default(),
                };
                self.retain(&ModuleHandle::new(identity, module));
                Ok(())
            }
            Err(err) => {
                tracing::debug!(
                    dependency,
                    requesting = %requesting,
                    error = %err,
                    "Dependency not found on default search path"
                );
                let resolved = self.events.resolve(Some(requesting), dependency)?;
                self.load_module(&resolved, Some(dependency), in_progress)
                    .map(|_| ())
            }
        }
    }

    /// Report objects the linker mapped behind our back.
    fn report_transitive(&self, paths: &[PathBuf]) {
        for path in paths {
            match open(path, RTLD_LAZY | libc::RTLD_NOLOAD) {
                Ok(library) => {
                    let identity = ModuleIdentity::from_path(path);
                    let module = NativeModule {
                        name: identity.name.clone(),
                        library,
                        metadata: ModuleMetadata::default(),
                    };
                    self.retain(&ModuleHandle::new(identity, module));
                }
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "Mapped object vanished");
                }
            }
        }
    }

    fn retain(&self, handle: &ModuleHandle) {
        self.retained.lock().push(handle.clone());
        self.events.notify_loaded(handle);
    }
}

impl ModuleHost for NativeHost {
    fn runtime(&self) -> RuntimeInfo {
        RuntimeInfo::new(defaults::CORE_RUNTIME_MODULE, libc_version())
    }

    fn events(&self) -> &LoadEvents {
        &self.events
    }

    fn load(&self, path: &Path) -> Result<Option<ModuleHandle>> {
        let mut in_progress = Vec::new();
        self.load_module(path, None, &mut in_progress).map(Some)
    }

    fn force_resolution(&self, module: &ModuleHandle) -> Result<()> {
        let native = module
            .downcast_ref::<NativeModule>()
            .ok_or_else(|| Error::LoadFailed {
                path: module.path().to_path_buf(),
                message: "module was not opened by the native host".to_string(),
            })?;

        let global = Library::this();
        for symbol in &native.metadata.imports {
            let name = symbol.as_bytes();
            let bound = unsafe {
                native.library.get::<*mut c_void>(name).is_ok()
                    || global.get::<*mut c_void>(name).is_ok()
            };
            if !bound {
                return Err(Error::UnresolvedSymbol {
                    module: module.name().to_string(),
                    symbol: symbol.clone(),
                });
            }
        }

        tracing::debug!(
            module = %module.identity(),
            imports = native.metadata.imports.len(),
            "All imports bound"
        );
        Ok(())
    }
}

fn open(path: &Path, flags: libc::c_int) -> Result<Library> {
    unsafe { Library::open(Some(path.as_os_str()), flags) }.map_err(|e| Error::LoadFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Open `path` and work out which objects the open newly mapped.
fn open_tracked(path: &Path) -> Result<Opened> {
    let before: HashSet<PathBuf> = loaded_objects().into_iter().collect();
    let library = open(path, RTLD_LAZY | RTLD_LOCAL)?;
    // The opened object enters the link map ahead of its own dependencies.
    let mut mapped = loaded_objects()
        .into_iter()
        .filter(|object| !before.contains(object));
    Ok(Opened {
        library,
        path: mapped.next(),
        transitive: mapped.collect(),
    })
}

fn is_resident(name: &OsStr) -> bool {
    // RTLD_NOLOAD only bumps the reference count of an already mapped object;
    // dropping the handle undoes that.
    unsafe { Library::open(Some(name), RTLD_LAZY | libc::RTLD_NOLOAD) }.is_ok()
}

/// Paths of every object in the link map, in load order. The main program
/// and the vDSO have no usable path and are left out.
#[cfg(target_os = "linux")]
fn loaded_objects() -> Vec<PathBuf> {
    use std::ffi::CStr;
    use std::os::unix::ffi::OsStrExt;

    unsafe extern "C" fn collect(
        info: *mut libc::dl_phdr_info,
        _size: usize,
        data: *mut c_void,
    ) -> libc::c_int {
        let objects = &mut *(data as *mut Vec<PathBuf>);
        let name = (*info).dlpi_name;
        if !name.is_null() {
            let bytes = CStr::from_ptr(name).to_bytes();
            if bytes.starts_with(b"/") {
                objects.push(PathBuf::from(OsStr::from_bytes(bytes)));
            }
        }
        0
    }

    let mut objects: Vec<PathBuf> = Vec::new();
    unsafe {
        libc::dl_iterate_phdr(Some(collect), &mut objects as *mut Vec<PathBuf> as *mut c_void);
    }
    objects
}

#[cfg(not(target_os = "linux"))]
fn loaded_objects() -> Vec<PathBuf> {
    Vec::new()
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn libc_version() -> ModuleVersion {
    let raw = unsafe { libc::gnu_get_libc_version() };
    if raw.is_null() {
        return ModuleVersion::default();
    }
    unsafe { std::ffi::CStr::from_ptr(raw) }
        .to_str()
        .ok()
        .and_then(|version| version.parse().ok())
        .unwrap_or_default()
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn libc_version() -> ModuleVersion {
    ModuleVersion::default()
}
