//! Host-side loader for native plugin modules.
//!
//! Plugins are shared objects in a directory. Their metadata is read and
//! validated before any of their code runs; accepted modules are then loaded
//! into the process, with missing dependencies routed to pluggable resolvers
//! and every newly resident module reported to load observers.
//!
//! ```no_run
//! use modhost::prelude::*;
//!
//! let manager = PluginManager::builder("plugins")
//!     .type_definitions_validator(RequireTypeDefinition::named("plugin_main"))
//!     .dependency_resolver(DirectoryResolver::new("plugins/deps"))
//!     .build()?;
//!
//! for outcome in manager.load(manager.discover()) {
//!     println!("{outcome}");
//! }
//! # Ok::<(), modhost::Error>(())
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod metadata;
pub mod outcome;
pub mod resolver;
pub mod runtime;
pub mod validator;

pub use config::ManagerConfig;
pub use discovery::{Discovery, DiscoveryIter};
pub use error::{Error, Result};
pub use manager::{LoadObserver, PluginManager, PluginManagerBuilder};
pub use metadata::{
    DefinitionKind, ElfMetadataReader, MetadataReader, ModuleMetadata, ModuleReference,
    ModuleVersion, ParseError, TypeDefinition,
};
pub use outcome::{LoadOutcome, LoadedPlugin, PluginEntry, PluginLoadError};
pub use resolver::{DependencyResolver, DirectoryResolver, ResolverChain};
pub use runtime::{LoadEvents, LoadHook, ModuleHandle, ModuleHost, ModuleIdentity, RuntimeInfo};
#[cfg(unix)]
pub use runtime::{NativeHost, NativeModule};
pub use validator::{
    MetadataValidator, NotNewerThanHost, Rejection, RequireTypeDefinition,
    TypeDefinitionsValidator, ValidatorChain, VersionRequirement, VersionValidator,
};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::ManagerConfig;
    pub use crate::error::{Error, Result};
    pub use crate::manager::{LoadObserver, PluginManager};
    pub use crate::metadata::{ModuleMetadata, ModuleVersion, TypeDefinition};
    pub use crate::outcome::{LoadOutcome, LoadedPlugin, PluginEntry};
    pub use crate::resolver::{DependencyResolver, DirectoryResolver};
    pub use crate::runtime::{ModuleHandle, ModuleIdentity};
    pub use crate::validator::{
        MetadataValidator, NotNewerThanHost, RequireTypeDefinition, TypeDefinitionsValidator,
        VersionRequirement, VersionValidator,
    };
}
