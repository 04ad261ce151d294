//! Structural metadata of binary modules, read without running any of their code.
//!
//! A [`MetadataReader`] turns a path into [`ModuleMetadata`]: the symbols the
//! module defines (its "type definitions") and the external modules it
//! references together with the version it declares for each of them.

pub mod elf;
mod version;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use elf::ElfMetadataReader;
pub use version::ModuleVersion;

/// Errors raised while reading module metadata.
///
/// Discovery treats every variant as "not a plugin" and skips the candidate.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed module: {0}")]
    Malformed(String),

    /// Well-formed, but not something the host loader would accept.
    #[error("Not a loadable module: {0}")]
    NotLoadable(String),

    #[error("Architecture mismatch: expected {expected}, found {found}")]
    ArchitectureMismatch { expected: String, found: String },
}

/// Kind of a symbol defined by a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    Function,
    Data,
    ThreadLocal,
}

/// A symbol exported by the module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: DefinitionKind,
}

impl TypeDefinition {
    pub fn new(name: impl Into<String>, kind: DefinitionKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// An external module the module needs at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleReference {
    /// Name as written in the module (e.g. `libc.so.6`).
    pub name: String,
    /// Version the module declares for this reference, `0.0.0.0` if none.
    pub version: ModuleVersion,
}

impl ModuleReference {
    pub fn new(name: impl Into<String>, version: ModuleVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// Everything discovery and validation know about a candidate module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    /// The module's own declared name (`DT_SONAME`), if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soname: Option<String>,
    /// Exported symbols, in symbol-table order.
    pub type_definitions: Vec<TypeDefinition>,
    /// Referenced external modules, in declaration order.
    pub module_references: Vec<ModuleReference>,
    /// Strong undefined symbols the module imports.
    #[serde(default)]
    pub imports: Vec<String>,
    /// Library search paths embedded in the module (`DT_RUNPATH`, then `DT_RPATH`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_paths: Vec<String>,
}

impl ModuleMetadata {
    /// First reference whose name matches `module_name`, ignoring ASCII case.
    ///
    /// Only the first match counts, even if the module references the same
    /// module more than once.
    pub fn find_reference(&self, module_name: &str) -> Option<&ModuleReference> {
        self.module_references
            .iter()
            .find(|reference| reference.name.eq_ignore_ascii_case(module_name))
    }

    /// Whether a symbol with exactly this name is exported.
    pub fn defines(&self, name: &str) -> bool {
        self.type_definitions.iter().any(|def| def.name == name)
    }
}

/// Reads structural metadata of a candidate module.
///
/// Implementations must not execute, link or map the module. Any file handle
/// opened for the read must be released before returning, on every path.
pub trait MetadataReader: Send + Sync {
    fn read_metadata(&self, path: &Path) -> Result<ModuleMetadata, ParseError>;
}

impl<F> MetadataReader for F
where
    F: Fn(&Path) -> Result<ModuleMetadata, ParseError> + Send + Sync,
{
    fn read_metadata(&self, path: &Path) -> Result<ModuleMetadata, ParseError> {
        self(path)
    }
}
