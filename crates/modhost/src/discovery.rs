//! Lazy, re-enumerable scan of the plugin directory.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::manager::{PluginManager, Registrations};
use crate::metadata::MetadataReader;
use crate::outcome::PluginEntry;
use crate::runtime::RuntimeInfo;

/// Accepted plugins under a manager's base directory.
///
/// Every call to [`Discovery::iter`] rescans the directory and reruns the
/// validators with the registrations current at that moment. Nothing is read
/// until the iterator is advanced.
pub struct Discovery<'a> {
    manager: &'a PluginManager,
}

impl<'a> Discovery<'a> {
    pub(crate) fn new(manager: &'a PluginManager) -> Self {
        Self { manager }
    }

    pub fn iter(&self) -> DiscoveryIter {
        self.manager.scan()
    }
}

impl<'a> IntoIterator for &Discovery<'a> {
    type Item = PluginEntry;
    type IntoIter = DiscoveryIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for Discovery<'a> {
    type Item = PluginEntry;
    type IntoIter = DiscoveryIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One pass over the directory tree.
///
/// Directories are visited breadth-first, each directory's entries in name
/// order.
pub struct DiscoveryIter {
    reader: Arc<dyn MetadataReader>,
    registrations: Arc<Registrations>,
    runtime: RuntimeInfo,
    extension: String,
    dirs: VecDeque<PathBuf>,
    files: VecDeque<PathBuf>,
}

impl DiscoveryIter {
    pub(crate) fn new(
        base_dir: &Path,
        extension: &str,
        reader: Arc<dyn MetadataReader>,
        registrations: Arc<Registrations>,
        runtime: RuntimeInfo,
    ) -> Self {
        let mut dirs = VecDeque::new();
        if base_dir.is_dir() {
            dirs.push_back(base_dir.to_path_buf());
        } else {
            debug!(dir = %base_dir.display(), "Plugin directory does not exist");
        }

        Self {
            reader,
            registrations,
            runtime,
            extension: extension.to_string(),
            dirs,
            files: VecDeque::new(),
        }
    }

    fn enqueue(&mut self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                return;
            }
        };

        let mut paths: Vec<(PathBuf, bool)> = entries
            .flatten()
            .map(|entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                (entry.path(), is_dir)
            })
            .collect();
        paths.sort();

        for (path, is_dir) in paths {
            if is_dir {
                self.dirs.push_back(path);
            } else if self.is_candidate(&path) {
                self.files.push_back(path);
            }
        }
    }

    fn is_candidate(&self, path: &Path) -> bool {
        path.extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
            && path.is_file()
    }

    fn evaluate(&self, path: &Path) -> Option<PluginEntry> {
        let metadata = match self.reader.read_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unparsable candidate");
                return None;
            }
        };

        if let Err(rejection) = self.registrations.validators.validate(&metadata, &self.runtime) {
            debug!(path = %path.display(), reason = %rejection, "Candidate rejected");
            return None;
        }

        let name = path.file_stem()?.to_string_lossy().into_owned();
        info!(plugin = %name, path = %path.display(), "Plugin accepted");
        Some(PluginEntry::new(name, path))
    }
}

impl Iterator for DiscoveryIter {
    type Item = PluginEntry;

    fn next(&mut self) -> Option<PluginEntry> {
        loop {
            if let Some(path) = self.files.pop_front() {
                if let Some(entry) = self.evaluate(&path) {
                    return Some(entry);
                }
                continue;
            }

            let dir = self.dirs.pop_front()?;
            self.enqueue(&dir);
        }
    }
}
