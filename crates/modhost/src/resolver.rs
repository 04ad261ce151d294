//! Strategies for locating dependencies the host loader cannot find itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::runtime::ModuleIdentity;

/// Supplies a path for a dependency the host could not find on its own.
///
/// Returning `None` passes the request on to the next resolver.
pub trait DependencyResolver: Send + Sync {
    fn resolve(&self, requesting: Option<&ModuleIdentity>, dependency: &str) -> Option<PathBuf>;
}

impl<F> DependencyResolver for F
where
    F: Fn(Option<&ModuleIdentity>, &str) -> Option<PathBuf> + Send + Sync,
{
    fn resolve(&self, requesting: Option<&ModuleIdentity>, dependency: &str) -> Option<PathBuf> {
        self(requesting, dependency)
    }
}

/// Resolvers in registration order.
#[derive(Clone, Default)]
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn DependencyResolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resolver: Arc<dyn DependencyResolver>) {
        self.resolvers.push(resolver);
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// First path any resolver supplies.
    pub fn resolve(&self, requesting: Option<&ModuleIdentity>, dependency: &str) -> Option<PathBuf> {
        self.resolvers
            .iter()
            .find_map(|resolver| resolver.resolve(requesting, dependency))
    }
}

/// Looks for the dependency by file name in a fixed directory.
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    dir: PathBuf,
}

impl DirectoryResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: crate::config::absolute(&dir.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DependencyResolver for DirectoryResolver {
    fn resolve(&self, _requesting: Option<&ModuleIdentity>, dependency: &str) -> Option<PathBuf> {
        // Dependency names are bare file names; anything with a separator is not ours.
        if dependency.contains(std::path::MAIN_SEPARATOR) {
            return None;
        }
        let candidate = self.dir.join(dependency);
        candidate.is_file().then_some(candidate)
    }
}
