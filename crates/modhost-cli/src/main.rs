//! Command-line interface for modhost.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use modhost::config::env_vars;
use modhost::{
    DirectoryResolver, ElfMetadataReader, ManagerConfig, MetadataReader,
    ModuleHandle, ModuleMetadata, NotNewerThanHost, PluginManager, PluginManagerBuilder,
    RequireTypeDefinition, VersionRequirement,
};

/// modhost - Discover, validate and load native plugin modules.
#[derive(Parser, Debug)]
#[command(name = "modhost")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List plugins that pass validation.
    List {
        #[command(flatten)]
        discovery: DiscoveryArgs,
    },
    /// Show the metadata of a module without loading it.
    Inspect {
        /// Path to the module.
        #[arg(required = true)]
        path: PathBuf,
        /// Print metadata as JSON.
        #[arg(long)]
        json: bool,
        /// Accept modules built for another architecture.
        #[arg(long)]
        any_architecture: bool,
    },
    /// Discover and load plugins into this process.
    Load {
        #[command(flatten)]
        discovery: DiscoveryArgs,
        /// Directory searched for dependencies the dynamic linker cannot find.
        #[arg(long = "resolve-dir")]
        resolve_dirs: Vec<PathBuf>,
        /// Skip forced symbol resolution after loading.
        #[arg(long)]
        lazy: bool,
    },
}

/// Options shared by every command that scans a plugin directory.
#[derive(ClapArgs, Debug)]
struct DiscoveryArgs {
    /// Plugin directory to scan (defaults to $MODHOST_PLUGIN_DIR or ./plugins).
    #[arg(short, long)]
    dir: Option<PathBuf>,
    /// Require an exported symbol with this name.
    #[arg(long = "require-symbol")]
    require_symbols: Vec<String>,
    /// Reject plugins built against a newer core runtime than this host's.
    #[arg(long)]
    not_newer_than_host: bool,
    /// Semver requirement on the plugin's core runtime version (e.g. ">=2.17").
    #[arg(long)]
    runtime_requirement: Option<String>,
    /// Module file extension (defaults to the platform's).
    #[arg(long)]
    extension: Option<String>,
    /// Core runtime module name plugins must reference.
    #[arg(long)]
    core_runtime: Option<String>,
}

impl DiscoveryArgs {
    fn builder(&self) -> Result<PluginManagerBuilder> {
        let mut config = ManagerConfig::from_env();
        if let Some(dir) = &self.dir {
            config = config.with_base_dir(dir);
        }
        if let Some(extension) = &self.extension {
            config = config.with_module_extension(extension);
        }
        if let Some(module) = &self.core_runtime {
            config = config.with_core_runtime_module(module);
        }

        let mut builder = PluginManager::from_config(config);
        for symbol in &self.require_symbols {
            builder = builder.type_definitions_validator(RequireTypeDefinition::named(symbol));
        }
        if self.not_newer_than_host {
            builder = builder.version_validator(NotNewerThanHost);
        }
        if let Some(requirement) = &self.runtime_requirement {
            let requirement = VersionRequirement::parse(requirement)
                .with_context(|| format!("Invalid runtime requirement: {}", requirement))?;
            builder = builder.version_validator(requirement);
        }
        Ok(builder)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var("MODHOST_LOG_JSON")
        .ok()
        .and_then(|v| env_vars::parse_flag(&v))
        .unwrap_or(false);

    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("modhost=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("modhost=info"))
    };

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}

fn run(command: Command) -> Result<ExitCode> {
    match command {
        Command::List { discovery } => list(&discovery),
        Command::Inspect {
            path,
            json,
            any_architecture,
        } => inspect(&path, json, any_architecture),
        Command::Load {
            discovery,
            resolve_dirs,
            lazy,
        } => load(&discovery, resolve_dirs, lazy),
    }
}

fn list(args: &DiscoveryArgs) -> Result<ExitCode> {
    let manager = args.builder()?.build()?;
    let entries: Vec<_> = manager.discover().into_iter().collect();

    if entries.is_empty() {
        println!("No plugins found in {}", manager.base_dir().display());
        return Ok(ExitCode::SUCCESS);
    }

    for entry in &entries {
        println!("{}\t{}", entry.name(), entry.path().display());
    }
    Ok(ExitCode::SUCCESS)
}

fn inspect(path: &Path, json: bool, any_architecture: bool) -> Result<ExitCode> {
    let reader = if any_architecture {
        ElfMetadataReader::new().any_architecture()
    } else {
        ElfMetadataReader::new()
    };
    let metadata = reader
        .read_metadata(path)
        .with_context(|| format!("Failed to read metadata from {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
    } else {
        print_metadata(path, &metadata);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_metadata(path: &Path, metadata: &ModuleMetadata) {
    println!("Module: {}", path.display());
    if let Some(soname) = &metadata.soname {
        println!("Soname: {}", soname);
    }

    println!("References ({}):", metadata.module_references.len());
    for reference in &metadata.module_references {
        println!("  {}  {}", reference.name, reference.version);
    }

    println!("Definitions ({}):", metadata.type_definitions.len());
    for definition in &metadata.type_definitions {
        println!("  {:?}  {}", definition.kind, definition.name);
    }

    println!("Imports: {}", metadata.imports.len());
    if !metadata.search_paths.is_empty() {
        println!("Search paths: {}", metadata.search_paths.join(":"));
    }
}

fn load(args: &DiscoveryArgs, resolve_dirs: Vec<PathBuf>, lazy: bool) -> Result<ExitCode> {
    let mut builder = args.builder()?.load_observer(|module: &ModuleHandle| {
        tracing::info!(module = %module.identity(), "Module resident");
    });
    for dir in resolve_dirs {
        builder = builder.dependency_resolver(DirectoryResolver::new(dir));
    }
    if lazy {
        builder = builder.force_eager_resolution(false);
    }
    let manager = builder.build()?;

    let outcomes = manager.load(manager.discover());
    if outcomes.is_empty() {
        println!("No plugins found in {}", manager.base_dir().display());
        return Ok(ExitCode::SUCCESS);
    }

    for outcome in &outcomes {
        let name = outcome.entry().map(|entry| entry.name()).unwrap_or("-");
        println!("{}\t{}\t{}", outcome.kind(), name, outcome.description());
    }

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    if failed > 0 {
        eprintln!("{} of {} plugins failed to load", failed, outcomes.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
