//! Discovery and validation behaviour against a fake metadata reader.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{host_version, FakeModule, Fixture, HOST_RUNTIME};
use modhost::{
    ModuleMetadata, ModuleVersion, NotNewerThanHost, PluginManager, RequireTypeDefinition,
    TypeDefinition, VersionRequirement,
};
use parking_lot::Mutex;

fn v(major: u32, minor: u32) -> ModuleVersion {
    ModuleVersion::new(major, minor, 0, 0)
}

fn names(manager: &PluginManager) -> Vec<String> {
    manager
        .discover()
        .iter()
        .map(|entry| entry.name().to_string())
        .collect()
}

#[test]
fn test_missing_base_dir_yields_nothing() {
    let fixture = Fixture::new();
    let manager = PluginManager::builder(fixture.dir.path().join("nowhere"))
        .host(fixture.host.clone())
        .metadata_reader(fixture.reader())
        .build()
        .unwrap();

    assert_eq!(manager.discover().iter().count(), 0);
    assert_eq!(fixture.catalog.reads(), 0);
}

#[test]
fn test_single_plugin_is_discovered_and_loaded() {
    let fixture = Fixture::new();
    let path = fixture.add_plugin("libgreeter", FakeModule::plugin(v(2, 17), &["Main"]));
    let manager = fixture.manager();

    let entries: Vec<_> = manager.discover().into_iter().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name(), "libgreeter");
    assert_eq!(entries[0].path(), path);
    assert!(entries[0].path().is_absolute());

    let outcomes = manager.load(entries);
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_success(), "{}", outcomes[0]);
}

#[test]
fn test_required_type_definition() {
    let fixture = Fixture::new();
    fixture.add_plugin("libgreeter", FakeModule::plugin(v(2, 17), &["Main", "Helper"]));

    let manager = fixture
        .builder()
        .type_definitions_validator(RequireTypeDefinition::named("Main"))
        .build()
        .unwrap();
    assert_eq!(names(&manager), vec!["libgreeter"]);

    let manager = fixture
        .builder()
        .type_definitions_validator(RequireTypeDefinition::named("DoesNotExist"))
        .build()
        .unwrap();
    assert!(names(&manager).is_empty());
}

#[test]
fn test_version_validator_receives_host_and_declared_versions() {
    let fixture = Fixture::new();
    fixture.add_plugin("libold", FakeModule::plugin(v(2, 17), &["Main"]));
    fixture.add_plugin("libnew", FakeModule::plugin(v(2, 38), &["Main"]));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let manager = fixture
        .builder()
        .version_validator(move |host: &ModuleVersion, declared: &ModuleVersion| {
            sink.lock().push((*host, *declared));
            true
        })
        .build()
        .unwrap();

    assert_eq!(names(&manager), vec!["libnew", "libold"]);
    assert_eq!(
        *seen.lock(),
        vec![(host_version(), v(2, 38)), (host_version(), v(2, 17))]
    );
}

#[test]
fn test_stock_version_validators() {
    let fixture = Fixture::new();
    fixture.add_plugin("libold", FakeModule::plugin(v(2, 17), &["Main"]));
    fixture.add_plugin("libnew", FakeModule::plugin(v(2, 38), &["Main"]));

    let manager = fixture
        .builder()
        .version_validator(NotNewerThanHost)
        .build()
        .unwrap();
    assert_eq!(names(&manager), vec!["libold"]);

    let manager = fixture
        .builder()
        .version_validator(VersionRequirement::parse(">=2.30").unwrap())
        .build()
        .unwrap();
    assert_eq!(names(&manager), vec!["libnew"]);
}

#[test]
fn test_missing_runtime_reference_is_rejected() {
    let fixture = Fixture::new();
    fixture.add_plugin("libstandalone", FakeModule::without_runtime(&["Main"]));
    fixture.add_plugin("libgreeter", FakeModule::plugin(v(2, 17), &["Main"]));

    assert_eq!(names(&fixture.manager()), vec!["libgreeter"]);
}

#[test]
fn test_runtime_reference_match_ignores_case_and_uses_first() {
    let fixture = Fixture::new();
    let mut module = FakeModule::without_runtime(&["Main"]);
    module = module
        .with_reference(&HOST_RUNTIME.to_uppercase(), v(2, 4))
        .with_reference(HOST_RUNTIME, v(2, 30));
    fixture.add_plugin("libtwice", module);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let manager = fixture
        .builder()
        .version_validator(move |_: &ModuleVersion, declared: &ModuleVersion| {
            sink.lock().push(*declared);
            true
        })
        .build()
        .unwrap();

    assert_eq!(names(&manager), vec!["libtwice"]);
    assert_eq!(*seen.lock(), vec![v(2, 4)]);
}

#[test]
fn test_core_runtime_module_override() {
    let fixture = Fixture::new();
    fixture.add_plugin(
        "libmusl",
        FakeModule::without_runtime(&["Main"]).with_reference("libc.so", v(1, 2)),
    );

    assert!(names(&fixture.manager()).is_empty());

    let config =
        modhost::ManagerConfig::new(fixture.plugin_dir()).with_core_runtime_module("libc.so");
    let manager = fixture.builder().config(config).build().unwrap();
    assert_eq!(names(&manager), vec!["libmusl"]);
}

#[derive(Default)]
struct Counters {
    metadata: AtomicUsize,
    version: AtomicUsize,
    types: AtomicUsize,
}

fn counting_manager(
    fixture: &Fixture,
    counters: &Arc<Counters>,
    accept_metadata: bool,
    accept_version: bool,
) -> PluginManager {
    let (mc, vc, tc) = (counters.clone(), counters.clone(), counters.clone());
    fixture
        .builder()
        .metadata_validator(move |_: &ModuleMetadata| {
            mc.metadata.fetch_add(1, Ordering::SeqCst);
            accept_metadata
        })
        .version_validator(move |_: &ModuleVersion, _: &ModuleVersion| {
            vc.version.fetch_add(1, Ordering::SeqCst);
            accept_version
        })
        .type_definitions_validator(move |_: &[TypeDefinition], _: &ModuleMetadata| {
            tc.types.fetch_add(1, Ordering::SeqCst);
            true
        })
        .build()
        .unwrap()
}

#[test]
fn test_metadata_rejection_skips_later_kinds() {
    let fixture = Fixture::new();
    fixture.add_plugin("libgreeter", FakeModule::plugin(v(2, 17), &["Main"]));
    let counters = Arc::new(Counters::default());
    let manager = counting_manager(&fixture, &counters, false, true);

    assert!(names(&manager).is_empty());
    assert_eq!(counters.metadata.load(Ordering::SeqCst), 1);
    assert_eq!(counters.version.load(Ordering::SeqCst), 0);
    assert_eq!(counters.types.load(Ordering::SeqCst), 0);
}

#[test]
fn test_version_rejection_skips_type_validators() {
    let fixture = Fixture::new();
    fixture.add_plugin("libgreeter", FakeModule::plugin(v(2, 17), &["Main"]));
    let counters = Arc::new(Counters::default());
    let manager = counting_manager(&fixture, &counters, true, false);

    assert!(names(&manager).is_empty());
    assert_eq!(counters.metadata.load(Ordering::SeqCst), 1);
    assert_eq!(counters.version.load(Ordering::SeqCst), 1);
    assert_eq!(counters.types.load(Ordering::SeqCst), 0);
}

#[test]
fn test_rejection_within_a_kind_stops_that_kind() {
    let fixture = Fixture::new();
    fixture.add_plugin("libgreeter", FakeModule::plugin(v(2, 17), &["Main"]));
    let later = Arc::new(AtomicUsize::new(0));
    let counter = later.clone();
    let manager = fixture
        .builder()
        .metadata_validator(|_: &ModuleMetadata| false)
        .metadata_validator(move |_: &ModuleMetadata| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .build()
        .unwrap();

    assert!(names(&manager).is_empty());
    assert_eq!(later.load(Ordering::SeqCst), 0);
}

#[test]
fn test_discovery_is_lazy() {
    let fixture = Fixture::new();
    fixture.add_plugin("liba", FakeModule::plugin(v(2, 17), &["Main"]));
    fixture.add_plugin("libb", FakeModule::plugin(v(2, 17), &["Main"]));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let manager = fixture
        .builder()
        .metadata_validator(move |_: &ModuleMetadata| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        })
        .build()
        .unwrap();

    let discovery = manager.discover();
    let mut iter = discovery.iter();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(iter.next().unwrap().name(), "liba");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(iter.next().unwrap().name(), "libb");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(iter.next().is_none());
}

#[test]
fn test_discovery_is_re_enumerable() {
    let fixture = Fixture::new();
    fixture.add_plugin("liba", FakeModule::plugin(v(2, 17), &["Main"]));
    let manager = fixture.manager();
    let discovery = manager.discover();

    assert_eq!(discovery.iter().count(), 1);
    fixture.add_plugin("libb", FakeModule::plugin(v(2, 17), &["Main"]));
    assert_eq!(discovery.iter().count(), 2);
    assert_eq!(fixture.catalog.reads(), 3);
}

#[test]
fn test_discovery_recurses_and_skips_non_modules() {
    let fixture = Fixture::new();
    fixture.add_plugin("libtop", FakeModule::plugin(v(2, 17), &["Main"]));
    fixture.add_plugin_in("nested/deeper", "libdeep", FakeModule::plugin(v(2, 17), &["Main"]));
    // Right extension, but the reader cannot parse it.
    std::fs::write(
        fixture.plugin_dir().join(format!("libjunk.{}", common::EXT)),
        b"junk",
    )
    .unwrap();
    std::fs::write(fixture.plugin_dir().join("notes.txt"), b"not a module").unwrap();

    let entries: Vec<_> = fixture.manager().discover().iter().collect();
    let names: Vec<_> = entries.iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["libtop", "libdeep"]);
    assert!(entries[1].path().starts_with(fixture.plugin_dir().join("nested")));
}

#[test]
fn test_custom_module_extension() {
    let fixture = Fixture::new();
    std::fs::write(fixture.plugin_dir().join("libcustom.plug"), b"fake").unwrap();
    fixture
        .catalog
        .insert("libcustom.plug", FakeModule::plugin(v(2, 17), &["Main"]));
    fixture.add_plugin("libnative", FakeModule::plugin(v(2, 17), &["Main"]));

    let manager = fixture.builder().module_extension("plug").build().unwrap();
    assert_eq!(names(&manager), vec!["libcustom"]);
}

#[test]
fn test_registration_between_scans_is_observed() {
    let fixture = Fixture::new();
    fixture.add_plugin("libgreeter", FakeModule::plugin(v(2, 17), &["Main"]));
    let manager = fixture.manager();
    assert_eq!(names(&manager).len(), 1);

    manager
        .add_type_definitions_validator(RequireTypeDefinition::named("Other"))
        .unwrap();
    assert!(names(&manager).is_empty());
}
