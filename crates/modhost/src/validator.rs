//! Acceptance rules run over candidate metadata before anything is loaded.
//!
//! Three kinds of validators exist. For each candidate they run in a fixed
//! order: whole-metadata validators, then runtime-version validators, then
//! type-definition validators. Within a kind they run in registration order and
//! the first rejection stops the chain.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use crate::metadata::{ModuleMetadata, ModuleVersion, TypeDefinition};
use crate::runtime::RuntimeInfo;

/// Checks the version a candidate declares for the host's core runtime module.
pub trait VersionValidator: Send + Sync {
    /// `host` is the running core runtime version, `declared` the version the
    /// candidate references.
    fn validate(&self, host: &ModuleVersion, declared: &ModuleVersion) -> bool;
}

/// Inspects a candidate's whole metadata.
pub trait MetadataValidator: Send + Sync {
    fn validate(&self, metadata: &ModuleMetadata) -> bool;
}

/// Inspects the symbols a candidate defines.
pub trait TypeDefinitionsValidator: Send + Sync {
    fn validate(&self, definitions: &[TypeDefinition], metadata: &ModuleMetadata) -> bool;
}

impl<F> VersionValidator for F
where
    F: Fn(&ModuleVersion, &ModuleVersion) -> bool + Send + Sync,
{
    fn validate(&self, host: &ModuleVersion, declared: &ModuleVersion) -> bool {
        self(host, declared)
    }
}

impl<F> MetadataValidator for F
where
    F: Fn(&ModuleMetadata) -> bool + Send + Sync,
{
    fn validate(&self, metadata: &ModuleMetadata) -> bool {
        self(metadata)
    }
}

impl<F> TypeDefinitionsValidator for F
where
    F: Fn(&[TypeDefinition], &ModuleMetadata) -> bool + Send + Sync,
{
    fn validate(&self, definitions: &[TypeDefinition], metadata: &ModuleMetadata) -> bool {
        self(definitions, metadata)
    }
}

/// Why a candidate was turned down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The metadata validator at this registration index said no.
    Metadata(usize),
    /// The candidate does not reference the core runtime module at all.
    MissingRuntimeReference(String),
    Version {
        index: usize,
        host: ModuleVersion,
        declared: ModuleVersion,
    },
    TypeDefinitions(usize),
}

impl Display for Rejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metadata(index) => write!(f, "rejected by metadata validator #{index}"),
            Self::MissingRuntimeReference(module) => {
                write!(f, "no reference to core runtime module {module}")
            }
            Self::Version {
                index,
                host,
                declared,
            } => write!(
                f,
                "rejected by version validator #{index} (host {host}, declared {declared})"
            ),
            Self::TypeDefinitions(index) => {
                write!(f, "rejected by type definitions validator #{index}")
            }
        }
    }
}

/// Registered validators of all three kinds.
#[derive(Clone, Default)]
pub struct ValidatorChain {
    metadata: Vec<Arc<dyn MetadataValidator>>,
    version: Vec<Arc<dyn VersionValidator>>,
    type_definitions: Vec<Arc<dyn TypeDefinitionsValidator>>,
}

impl ValidatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_metadata(&mut self, validator: Arc<dyn MetadataValidator>) {
        self.metadata.push(validator);
    }

    pub fn push_version(&mut self, validator: Arc<dyn VersionValidator>) {
        self.version.push(validator);
    }

    pub fn push_type_definitions(&mut self, validator: Arc<dyn TypeDefinitionsValidator>) {
        self.type_definitions.push(validator);
    }

    pub fn len(&self) -> usize {
        self.metadata.len() + self.version.len() + self.type_definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every validator against one candidate.
    ///
    /// The core runtime reference is located before any validator runs: a
    /// candidate without one is rejected even if no validator is registered.
    /// Only the first reference with a matching name is considered.
    pub fn validate(
        &self,
        metadata: &ModuleMetadata,
        runtime: &RuntimeInfo,
    ) -> Result<(), Rejection> {
        let declared = metadata
            .find_reference(&runtime.module_name)
            .map(|reference| reference.version);

        if let Some(index) = self.metadata.iter().position(|v| !v.validate(metadata)) {
            return Err(Rejection::Metadata(index));
        }

        let declared = declared
            .ok_or_else(|| Rejection::MissingRuntimeReference(runtime.module_name.clone()))?;
        if let Some(index) = self
            .version
            .iter()
            .position(|v| !v.validate(&runtime.version, &declared))
        {
            return Err(Rejection::Version {
                index,
                host: runtime.version,
                declared,
            });
        }

        if let Some(index) = self
            .type_definitions
            .iter()
            .position(|v| !v.validate(&metadata.type_definitions, metadata))
        {
            return Err(Rejection::TypeDefinitions(index));
        }

        Ok(())
    }
}

/// Requires an exported symbol with exactly the given name.
#[derive(Debug, Clone)]
pub struct RequireTypeDefinition {
    name: String,
}

impl RequireTypeDefinition {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl TypeDefinitionsValidator for RequireTypeDefinition {
    fn validate(&self, definitions: &[TypeDefinition], _metadata: &ModuleMetadata) -> bool {
        definitions.iter().any(|def| def.name == self.name)
    }
}

/// Accepts candidates built against a core runtime no newer than the host's.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotNewerThanHost;

impl VersionValidator for NotNewerThanHost {
    fn validate(&self, host: &ModuleVersion, declared: &ModuleVersion) -> bool {
        declared <= host
    }
}

/// Matches the declared core runtime version against a semver requirement.
#[derive(Debug, Clone)]
pub struct VersionRequirement {
    requirement: semver::VersionReq,
}

impl VersionRequirement {
    pub fn new(requirement: semver::VersionReq) -> Self {
        Self { requirement }
    }

    pub fn parse(requirement: &str) -> Result<Self, semver::Error> {
        semver::VersionReq::parse(requirement).map(Self::new)
    }
}

impl VersionValidator for VersionRequirement {
    fn validate(&self, _host: &ModuleVersion, declared: &ModuleVersion) -> bool {
        self.requirement.matches(&declared.to_semver())
    }
}
