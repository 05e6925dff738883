#![cfg(test)]

use std::fs;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::event::EventDispatcher;
use crate::plugin_system::dependency::DependencyError;
use crate::plugin_system::descriptor::{DescriptorBuilder, DescriptorError};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::loader::FactoryLoader;
use crate::plugin_system::manager::{EngineOptions, LifecycleManager};
use crate::plugin_system::messaging::MessageBus;
use crate::plugin_system::permissions::PermissionRegistry;
use crate::plugin_system::tests::common::{Fixture, MockPlugin};
use crate::plugin_system::traits::{CommandParams, Plugin, PluginState};
use crate::plugin_system::version::FrameworkVersion;

fn write_descriptor(fixture: &Fixture, file_stem: &str, body: Value) {
    let path = fixture.metadata_dir.path().join(format!("{file_stem}.json"));
    fs::write(path, serde_json::to_string_pretty(&body).unwrap()).unwrap();
}

fn params(pairs: &[(&str, Value)]) -> CommandParams {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn test_operations_require_initialize() {
    let events = Arc::new(EventDispatcher::new());
    let permissions = Arc::new(PermissionRegistry::with_builtin(Arc::clone(&events)));
    let bus = Arc::new(MessageBus::new(Arc::clone(&permissions), Arc::clone(&events)));
    let engine = LifecycleManager::new(
        EngineOptions::default(),
        Box::new(FactoryLoader::new()),
        permissions,
        bus,
        events,
    );
    assert!(!engine.is_initialized());
    assert!(matches!(engine.load("a"), Err(PluginSystemError::NotInitialized)));
    assert!(matches!(engine.activate("a"), Err(PluginSystemError::NotInitialized)));
    assert!(matches!(engine.unload("a"), Err(PluginSystemError::NotInitialized)));
    assert_eq!(engine.execute_command("a", "x", &CommandParams::new()), None);

    engine.initialize().unwrap();
    assert!(engine.is_initialized());
    engine.shutdown().unwrap();
    assert!(!engine.is_initialized());
    assert!(matches!(engine.load("a"), Err(PluginSystemError::NotInitialized)));
}

#[test]
fn test_default_options() {
    let options = EngineOptions::default();
    assert_eq!(options.framework_version, FrameworkVersion::new(1, 0, 0));
}

#[test]
fn test_descriptor_registration_replaces_wholesale() {
    let f = Fixture::new();
    f.engine.register_descriptor(
        DescriptorBuilder::new("a", "First", "1.0.0", "V").dependency("b").build().unwrap(),
    ).unwrap();
    f.engine
        .register_descriptor(DescriptorBuilder::new("a", "Second", "2.0.0", "V").build().unwrap()).unwrap();
    let d = f.engine.descriptor("a").unwrap();
    assert_eq!(d.name(), "Second");
    assert!(d.dependencies().is_empty());
    assert_eq!(f.engine.available_plugins(), vec!["a"]);
}

#[test]
fn test_descriptor_loaded_on_demand_from_metadata_dir() {
    let f = Fixture::new();
    write_descriptor(&f, "disk", json!({"id":"disk","name":"Disk","version":"1.0.0","vendor":"V"}));
    f.loader.inner.register("disk", {
        let plugin = f.mock("disk");
        move || Box::new(plugin.clone()) as Box<dyn Plugin>
    });

    assert!(f.engine.descriptor("disk").is_none());
    f.engine.load("disk").unwrap();
    assert_eq!(f.engine.state("disk"), PluginState::Loaded);
    assert_eq!(f.engine.descriptor("disk").unwrap().name(), "Disk");
}

#[test]
fn test_descriptor_file_must_match_id() {
    let f = Fixture::new();
    write_descriptor(&f, "expected", json!({"id":"other","name":"X","version":"1.0.0","vendor":"V"}));
    match f.engine.load_descriptor("expected") {
        Err(PluginSystemError::MetadataError { source: DescriptorError::IdMismatch { found, .. }, .. }) => {
            assert_eq!(found, "other");
        }
        other => panic!("expected id mismatch, got {other:?}"),
    }
}

#[test]
fn test_load_without_descriptor_fails_with_metadata_error() {
    let f = Fixture::new();
    assert!(matches!(
        f.engine.load("nowhere"),
        Err(PluginSystemError::MetadataError { .. })
    ));
    assert_eq!(f.engine.state("nowhere"), PluginState::Failed);
    assert_eq!(f.failure_messages("nowhere").len(), 1);
    assert_eq!(f.loader.loads(), 0);
}

#[test]
fn test_scan_registers_valid_descriptors_only() {
    let f = Fixture::new();
    write_descriptor(&f, "b", json!({"id":"b","name":"B","version":"1.0.0","vendor":"V"}));
    write_descriptor(&f, "a", json!({"id":"a","name":"A","version":"1.0.0","vendor":"V","dependencies":["b"]}));
    write_descriptor(&f, "broken", json!({"id":"broken","name":"Broken"}));
    fs::write(f.metadata_dir.path().join("notes.txt"), "ignored").unwrap();

    let found = f.engine.scan_for_plugins().unwrap();
    assert_eq!(found, vec!["a", "b"]);
    assert_eq!(f.engine.available_plugins(), vec!["a", "b"]);
    assert_eq!(f.engine.dependents_of("b"), vec!["a"]);
}

#[test]
fn test_scan_of_missing_directory_is_empty() {
    let events = Arc::new(EventDispatcher::new());
    let permissions = Arc::new(PermissionRegistry::new(Arc::clone(&events)));
    let bus = Arc::new(MessageBus::new(Arc::clone(&permissions), Arc::clone(&events)));
    let options = EngineOptions {
        metadata_dir: "/definitely/not/here".into(),
        ..EngineOptions::default()
    };
    let engine = LifecycleManager::new(options, Box::new(FactoryLoader::new()), permissions, bus, events);
    engine.initialize().unwrap();
    assert!(engine.scan_for_plugins().unwrap().is_empty());
}

#[test]
fn test_descriptor_operations_require_initialize() {
    let f = Fixture::new();
    write_descriptor(
        &f,
        "late",
        json!({"id": "late", "name": "Late", "version": "1.0.0", "vendor": "V"}),
    );
    f.engine.shutdown().unwrap();

    let descriptor = DescriptorBuilder::new("early", "Early", "1.0.0", "V").build().unwrap();
    assert!(matches!(
        f.engine.register_descriptor(descriptor),
        Err(PluginSystemError::NotInitialized)
    ));
    assert!(matches!(f.engine.load_descriptor("late"), Err(PluginSystemError::NotInitialized)));
    assert!(matches!(f.engine.scan_for_plugins(), Err(PluginSystemError::NotInitialized)));
    assert!(matches!(
        f.engine.dependency_order(&["late"]),
        Err(PluginSystemError::NotInitialized)
    ));
    assert!(f.engine.available_plugins().is_empty());

    f.engine.initialize().unwrap();
    assert_eq!(f.engine.scan_for_plugins().unwrap(), vec!["late"]);
}

#[test]
fn test_dependency_order_over_descriptors() {
    let f = Fixture::new();
    f.add(f.mock("app").with_dependency("ui").with_dependency("core"));
    f.add(f.mock("ui").with_dependency("core"));
    f.add(f.mock("core"));

    assert_eq!(f.engine.dependency_order(&["app"]).unwrap(), vec!["core", "ui", "app"]);
    assert_eq!(f.engine.dependency_order(&["core"]).unwrap(), vec!["core"]);
}

#[test]
fn test_dependency_order_reports_cycles_and_missing() {
    let f = Fixture::new();
    f.add(f.mock("a").with_dependency("b"));
    f.add(f.mock("b").with_dependency("a"));
    f.add(f.mock("lonely").with_dependency("ghost"));

    assert!(matches!(
        f.engine.dependency_order(&["a"]),
        Err(PluginSystemError::DependencyError { source: DependencyError::CyclicDependency(_), .. })
    ));
    assert!(matches!(
        f.engine.dependency_order(&["lonely"]),
        Err(PluginSystemError::MetadataError { .. })
    ));
}

#[test]
fn test_execute_command_requires_active() {
    let f = Fixture::new();
    f.add(f.mock("cmd"));
    let p = params(&[("text", json!("hi"))]);

    assert_eq!(f.engine.execute_command("cmd", "echo", &p), None);
    f.engine.load("cmd").unwrap();
    assert_eq!(f.engine.execute_command("cmd", "echo", &p), None);
    f.engine.initialize_plugin("cmd").unwrap();
    assert_eq!(f.engine.execute_command("cmd", "echo", &p), None);
    assert!(!f.journal().contains(&"command:cmd".to_string()));

    f.engine.activate("cmd").unwrap();
    assert_eq!(f.engine.execute_command("cmd", "echo", &p), Some(json!({"text": "hi"})));
}

#[test]
fn test_execute_command_contains_failures() {
    let f = Fixture::new();
    f.add(f.mock("cmd"));
    f.engine.activate("cmd").unwrap();

    assert_eq!(f.engine.execute_command("cmd", "fail", &CommandParams::new()), None);
    assert_eq!(f.engine.execute_command("cmd", "panic", &CommandParams::new()), None);
    assert_eq!(f.engine.execute_command("cmd", "missing", &CommandParams::new()), None);
    // A failing command does not change the plugin's state
    assert_eq!(f.engine.state("cmd"), PluginState::Active);
    assert_eq!(f.engine.execute_command("cmd", "echo", &CommandParams::new()), Some(json!({})));
}

#[test]
fn test_queries() {
    let f = Fixture::new();
    f.add(f.mock("a").with_dependency("b"));
    f.add(f.mock("b"));
    f.add(f.mock("c"));

    assert_eq!(f.engine.state("a"), PluginState::NotLoaded);
    f.engine.activate("a").unwrap();
    f.engine.load("c").unwrap();

    assert_eq!(f.engine.loaded_plugins(), vec!["a", "b", "c"]);
    assert_eq!(f.engine.active_plugins(), vec!["a", "b"]);
    assert!(f.engine.is_loaded("c"));
    assert!(!f.engine.is_active("c"));
    assert!(f.engine.is_active("b"));
    assert_eq!(f.engine.framework_version(), FrameworkVersion::new(1, 0, 0));
}

#[test]
fn test_observer_can_query_engine_during_events() {
    let events = Arc::new(EventDispatcher::new());
    let permissions = Arc::new(PermissionRegistry::with_builtin(Arc::clone(&events)));
    let bus = Arc::new(MessageBus::new(Arc::clone(&permissions), Arc::clone(&events)));
    let journal = Arc::new(std::sync::Mutex::new(Vec::new()));
    let plugin = MockPlugin::new("a", &journal);
    let loader = FactoryLoader::new().with("a", move || Box::new(plugin.clone()) as Box<dyn Plugin>);
    let engine = Arc::new(LifecycleManager::new(
        EngineOptions::default(),
        Box::new(loader),
        permissions,
        bus,
        Arc::clone(&events),
    ));
    engine.initialize().unwrap();
    engine.register_descriptor(DescriptorBuilder::new("a", "A", "1.0.0", "V").build().unwrap()).unwrap();

    // The observer runs while the engine lock is held on this thread.
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let weak = Arc::downgrade(&engine);
    events.subscribe_to("plugin.activated", move |_| {
        if let Some(engine) = weak.upgrade() {
            sink.lock().unwrap().push(engine.state("a"));
        }
    });

    engine.activate("a").unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![PluginState::Active]);
}
