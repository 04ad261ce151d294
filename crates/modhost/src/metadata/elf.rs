//! ELF metadata reader.
//!
//! Only looks at the dynamic section, the dynamic symbol table and the GNU
//! version-requirement table. Nothing is mapped or relocated.

use std::collections::HashMap;
use std::path::Path;

use goblin::elf::dynamic::DF_1_PIE;
use goblin::elf::header::{self, ET_DYN};
use goblin::elf::section_header::SHN_UNDEF;
use goblin::elf::sym::{STB_GLOBAL, STB_WEAK, STT_FUNC, STT_OBJECT, STT_TLS};
use goblin::elf::Elf;

use super::{
    DefinitionKind, MetadataReader, ModuleMetadata, ModuleReference, ModuleVersion, ParseError,
    TypeDefinition,
};

/// Reads metadata from ELF shared objects built for the running host.
#[derive(Debug, Clone, Default)]
pub struct ElfMetadataReader {
    /// Skip the class/machine check (inspect foreign objects).
    any_architecture: bool,
}

impl ElfMetadataReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept objects built for any architecture.
    pub fn any_architecture(mut self) -> Self {
        self.any_architecture = true;
        self
    }

    /// Parse metadata from an in-memory image.
    pub fn parse(&self, bytes: &[u8]) -> Result<ModuleMetadata, ParseError> {
        let elf = Elf::parse(bytes).map_err(|e| ParseError::Malformed(e.to_string()))?;

        if elf.header.e_type != ET_DYN {
            return Err(ParseError::NotLoadable(format!(
                "ELF type {} is not a shared object",
                header::et_to_str(elf.header.e_type)
            )));
        }

        // PIE executables are ET_DYN too, but the dynamic linker refuses them.
        if elf.dynamic.as_ref().is_some_and(|d| d.info.flags_1 & DF_1_PIE != 0) {
            return Err(ParseError::NotLoadable(
                "position-independent executable".to_string(),
            ));
        }

        if !self.any_architecture {
            check_architecture(&elf)?;
        }

        Ok(ModuleMetadata {
            soname: elf.soname.map(str::to_string),
            type_definitions: type_definitions(&elf),
            module_references: module_references(&elf),
            imports: imports(&elf),
            search_paths: elf
                .runpaths
                .iter()
                .chain(elf.rpaths.iter())
                .flat_map(|paths| paths.split(':'))
                .filter(|path| !path.is_empty())
                .map(str::to_string)
                .collect(),
        })
    }
}

impl MetadataReader for ElfMetadataReader {
    fn read_metadata(&self, path: &Path) -> Result<ModuleMetadata, ParseError> {
        // The handle is closed before parsing starts.
        let bytes = std::fs::read(path)?;
        self.parse(&bytes)
    }
}

fn check_architecture(elf: &Elf<'_>) -> Result<(), ParseError> {
    let host_is_64 = cfg!(target_pointer_width = "64");
    if elf.is_64 != host_is_64 {
        return Err(ParseError::ArchitectureMismatch {
            expected: if host_is_64 { "ELF64" } else { "ELF32" }.to_string(),
            found: if elf.is_64 { "ELF64" } else { "ELF32" }.to_string(),
        });
    }

    if let Some(machine) = host_machine() {
        if elf.header.e_machine != machine {
            return Err(ParseError::ArchitectureMismatch {
                expected: header::machine_to_str(machine).to_string(),
                found: header::machine_to_str(elf.header.e_machine).to_string(),
            });
        }
    }

    Ok(())
}

fn host_machine() -> Option<u16> {
    if cfg!(target_arch = "x86_64") {
        Some(header::EM_X86_64)
    } else if cfg!(target_arch = "x86") {
        Some(header::EM_386)
    } else if cfg!(target_arch = "aarch64") {
        Some(header::EM_AARCH64)
    } else if cfg!(target_arch = "arm") {
        Some(header::EM_ARM)
    } else if cfg!(any(target_arch = "riscv64", target_arch = "riscv32")) {
        Some(header::EM_RISCV)
    } else {
        None
    }
}

fn type_definitions(elf: &Elf<'_>) -> Vec<TypeDefinition> {
    elf.dynsyms
        .iter()
        .filter(|sym| sym.st_shndx != SHN_UNDEF as usize)
        .filter(|sym| matches!(sym.st_bind(), STB_GLOBAL | STB_WEAK))
        .filter_map(|sym| {
            let kind = match sym.st_type() {
                STT_FUNC => DefinitionKind::Function,
                STT_OBJECT => DefinitionKind::Data,
                STT_TLS => DefinitionKind::ThreadLocal,
                _ => return None,
            };
            let name = elf.dynstrtab.get_at(sym.st_name).filter(|n| !n.is_empty())?;
            Some(TypeDefinition::new(name, kind))
        })
        .collect()
}

fn imports(elf: &Elf<'_>) -> Vec<String> {
    elf.dynsyms
        .iter()
        .filter(|sym| sym.st_shndx == SHN_UNDEF as usize && sym.st_bind() == STB_GLOBAL)
        .filter_map(|sym| elf.dynstrtab.get_at(sym.st_name))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// `DT_NEEDED` entries paired with the highest version required from each.
fn module_references(elf: &Elf<'_>) -> Vec<ModuleReference> {
    let mut required: HashMap<&str, ModuleVersion> = HashMap::new();
    if let Some(verneed) = &elf.verneed {
        for need in verneed.iter() {
            let Some(file) = elf.dynstrtab.get_at(need.vn_file) else {
                continue;
            };
            for aux in need.iter() {
                let version = elf
                    .dynstrtab
                    .get_at(aux.vna_name)
                    .and_then(ModuleVersion::from_version_tag);
                if let Some(version) = version {
                    let entry = required.entry(file).or_default();
                    *entry = (*entry).max(version);
                }
            }
        }
    }

    elf.libraries
        .iter()
        .map(|name| {
            let version = required.get(name).copied().unwrap_or_default();
            ModuleReference::new(*name, version)
        })
        .collect()
}
