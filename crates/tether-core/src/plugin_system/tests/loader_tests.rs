#![cfg(test)]

use std::fs;
use std::sync::{Arc, Mutex};

use tempfile::tempdir;

use crate::plugin_system::loader::{
    FactoryLoader, LibraryLoader, LoaderError, ModuleHandle, ModuleLoader, ModuleLocator, construct,
};
use crate::plugin_system::tests::common::MockPlugin;
use crate::plugin_system::traits::Plugin;

fn journal() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

#[test]
fn test_factory_loader_round_trip() {
    let j = journal();
    let loader = FactoryLoader::new().with("alpha", move || Box::new(MockPlugin::new("alpha", &j)) as Box<dyn Plugin>);
    assert!(loader.contains("alpha"));

    let handle = loader.load(&ModuleLocator::new("alpha", "unused")).unwrap();
    assert_eq!(handle.plugin_id(), "alpha");
    assert!(handle.path().is_none());

    let instance = loader.instantiate(&handle).unwrap();
    assert_eq!(instance.id(), "alpha");
    drop(instance);
    assert!(loader.unload(handle));
}

#[test]
fn test_factory_loader_unknown_id() {
    let loader = FactoryLoader::new();
    assert!(matches!(
        loader.load(&ModuleLocator::new("ghost", ".")),
        Err(LoaderError::NotFound { plugin_id, .. }) if plugin_id == "ghost"
    ));
}

#[test]
fn test_factory_panic_becomes_instantiation_error() {
    let loader = FactoryLoader::new().with("bomb", || -> Box<dyn Plugin> { panic!("constructor failed") });
    let handle = loader.load(&ModuleLocator::new("bomb", ".")).unwrap();
    match loader.instantiate(&handle) {
        Err(LoaderError::Instantiation { message, .. }) => assert!(message.contains("constructor failed")),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("expected failure"),
    }
}

#[test]
fn test_factory_rejects_foreign_handle() {
    let loader = FactoryLoader::new();
    let foreign = ModuleHandle::new("x", 5u32);
    assert!(matches!(
        loader.instantiate(&foreign),
        Err(LoaderError::UnsupportedHandle { .. })
    ));
    assert!(!loader.unload(foreign));
}

#[test]
fn test_unregister_factory() {
    let loader = FactoryLoader::new();
    loader.register("x", || -> Box<dyn Plugin> { unreachable!() });
    assert!(loader.unregister("x"));
    assert!(!loader.unregister("x"));
    assert!(!loader.contains("x"));
}

#[test]
fn test_library_candidates_follow_platform_order() {
    let locator = ModuleLocator::new("echo-plugin", "/opt/plugins");
    let names: Vec<String> = LibraryLoader::candidates(&locator)
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "echo-plugin.dll",
            "libecho-plugin.so",
            "libecho-plugin.dylib",
            "echo_plugin.dll",
            "libecho_plugin.so",
            "libecho_plugin.dylib",
        ]
    );

    let plain = LibraryLoader::candidates(&ModuleLocator::new("core", "d"));
    assert_eq!(plain.len(), 3);
}

#[test]
fn test_library_loader_rejects_suspicious_ids() {
    let loader = LibraryLoader::new();
    for id in ["", "../evil", "a/b", "a\\b"] {
        assert!(
            matches!(loader.load(&ModuleLocator::new(id, ".")), Err(LoaderError::InvalidLocator { .. })),
            "id {id:?} should be rejected"
        );
    }
}

#[test]
fn test_library_loader_reports_missing_library() {
    let dir = tempdir().expect("Failed to create temporary directory");
    match LibraryLoader::new().load(&ModuleLocator::new("absent", dir.path())) {
        Err(LoaderError::NotFound { searched, .. }) => assert_eq!(searched.len(), 3),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn test_library_loader_reports_invalid_library() {
    let dir = tempdir().expect("Failed to create temporary directory");
    let bogus = if cfg!(windows) {
        dir.path().join("bogus.dll")
    } else if cfg!(target_os = "macos") {
        dir.path().join("libbogus.dylib")
    } else {
        dir.path().join("libbogus.so")
    };
    fs::write(&bogus, b"definitely not a shared object").unwrap();

    match LibraryLoader::new().load(&ModuleLocator::new("bogus", dir.path())) {
        Err(LoaderError::Library { path, .. }) => assert_eq!(path, bogus),
        other => panic!("expected Library error, got {other:?}"),
    }
}

#[test]
fn test_handle_resource_access() {
    let handle = ModuleHandle::new("p", String::from("payload")).with_path("/tmp/libp.so");
    assert_eq!(handle.resource::<String>().map(String::as_str), Some("payload"));
    assert!(handle.resource::<u8>().is_none());
    assert_eq!(handle.path().unwrap().to_str(), Some("/tmp/libp.so"));

    let handle = handle.into_resource::<u8>().unwrap_err();
    assert_eq!(handle.into_resource::<String>().unwrap(), "payload");
}

/// Same export a plugin library gets, with a constructor that panics.
mod exploding_library {
    use crate::plugin_system::tests::common::MockPlugin;

    fn explode() -> MockPlugin {
        panic!("constructor exploded")
    }

    crate::declare_plugin!(MockPlugin, explode);
}

extern "C-unwind" fn unwinding_create() -> *mut Box<dyn Plugin> {
    panic!("unwound into the host")
}

extern "C-unwind" fn working_create() -> *mut Box<dyn Plugin> {
    let plugin: Box<dyn Plugin> = Box::new(MockPlugin::new("made", &journal()));
    Box::into_raw(Box::new(plugin))
}

#[test]
fn test_declared_constructor_panic_becomes_instantiation_error() {
    let result = unsafe { construct("exploding", exploding_library::_tether_plugin_create) };
    match result {
        Err(LoaderError::Instantiation { plugin_id, message }) => {
            assert_eq!(plugin_id, "exploding");
            assert!(message.contains("panicked"), "{message}");
        }
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("expected failure"),
    }
}

#[test]
fn test_unwinding_constructor_is_caught_by_host() {
    match unsafe { construct("raw", unwinding_create) } {
        Err(LoaderError::Instantiation { message, .. }) => assert!(message.contains("unwound into the host")),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("expected failure"),
    }
}

#[test]
fn test_construct_takes_ownership_of_instance() {
    let plugin = unsafe { construct("made", working_create) }.unwrap();
    assert_eq!(plugin.id(), "made");
}
