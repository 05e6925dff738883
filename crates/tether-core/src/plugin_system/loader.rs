//! Module loaders: turning a plugin id into a runnable instance.
//!
//! [`ModuleLoader`] is the seam between the engine and however plugin code
//! reaches the process. Two backends ship with the crate:
//!
//! - [`FactoryLoader`], an in-process registry of constructors for
//!   statically linked plugins.
//! - [`LibraryLoader`], which opens dynamic libraries with `libloading` and
//!   calls the constructor exported by [`declare_plugin!`](crate::declare_plugin).
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};
use log::{debug, info, warn};
use parking_lot::RwLock;
use thiserror::Error;

use crate::kernel::constants::PLUGIN_CREATE_SYMBOL;
use crate::plugin_system::guard::panic_message;
use crate::plugin_system::traits::Plugin;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Plugin library not found for '{plugin_id}' (searched: {})", display_paths(.searched))]
    NotFound {
        plugin_id: String,
        searched: Vec<PathBuf>,
    },
    #[error("Invalid plugin locator '{plugin_id}': {reason}")]
    InvalidLocator { plugin_id: String, reason: String },
    #[error("Failed to open library '{}': {source}", path.display())]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("Library '{}' does not export '{symbol}': {source}", path.display())]
    MissingSymbol {
        path: PathBuf,
        symbol: String,
        #[source]
        source: libloading::Error,
    },
    #[error("Failed to instantiate '{plugin_id}': {message}")]
    Instantiation { plugin_id: String, message: String },
    #[error("Handle for '{plugin_id}' was not produced by this loader")]
    UnsupportedHandle { plugin_id: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where to look for a plugin's code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLocator {
    pub plugin_id: String,
    pub search_dir: PathBuf,
}

impl ModuleLocator {
    pub fn new(plugin_id: &str, search_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            search_dir: search_dir.into(),
        }
    }
}

/// Opaque, loader-owned resource backing one loaded plugin.
///
/// The engine keeps the handle for as long as the plugin is loaded and
/// gives it back through [`ModuleLoader::unload`] after dropping the
/// instance.
pub struct ModuleHandle {
    plugin_id: String,
    path: Option<PathBuf>,
    resource: Box<dyn Any + Send + Sync>,
}

impl ModuleHandle {
    pub fn new(plugin_id: &str, resource: impl Any + Send + Sync) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            path: None,
            resource: Box::new(resource),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// File the module came from, for file-backed loaders.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn resource<T: Any>(&self) -> Option<&T> {
        self.resource.downcast_ref::<T>()
    }

    /// Takes the resource back out, or returns the handle unchanged.
    pub fn into_resource<T: Any>(self) -> Result<T, Self> {
        let ModuleHandle { plugin_id, path, resource } = self;
        match resource.downcast::<T>() {
            Ok(r) => Ok(*r),
            Err(resource) => Err(ModuleHandle { plugin_id, path, resource }),
        }
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("plugin_id", &self.plugin_id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Collaborator that resolves, instantiates and releases plugin modules.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, locator: &ModuleLocator) -> Result<ModuleHandle, LoaderError>;

    fn instantiate(&self, handle: &ModuleHandle) -> Result<Box<dyn Plugin>, LoaderError>;

    /// Releases the module. Returns false if the release failed.
    fn unload(&self, handle: ModuleHandle) -> bool;
}

impl<L: ModuleLoader + ?Sized> ModuleLoader for Arc<L> {
    fn load(&self, locator: &ModuleLocator) -> Result<ModuleHandle, LoaderError> {
        (**self).load(locator)
    }

    fn instantiate(&self, handle: &ModuleHandle) -> Result<Box<dyn Plugin>, LoaderError> {
        (**self).instantiate(handle)
    }

    fn unload(&self, handle: ModuleHandle) -> bool {
        (**self).unload(handle)
    }
}

// --- In-process factory backend ---

/// Constructor registered with a [`FactoryLoader`]
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Loader backed by constructors registered in code.
#[derive(Default)]
pub struct FactoryLoader {
    factories: RwLock<HashMap<String, PluginFactory>>,
}

impl FactoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the constructor for `plugin_id`.
    pub fn register<F>(&self, plugin_id: &str, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(plugin_id.to_string(), Arc::new(factory));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(self, plugin_id: &str, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.register(plugin_id, factory);
        self
    }

    pub fn unregister(&self, plugin_id: &str) -> bool {
        self.factories.write().remove(plugin_id).is_some()
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.factories.read().contains_key(plugin_id)
    }
}

impl ModuleLoader for FactoryLoader {
    fn load(&self, locator: &ModuleLocator) -> Result<ModuleHandle, LoaderError> {
        let factory = self
            .factories
            .read()
            .get(&locator.plugin_id)
            .cloned()
            .ok_or_else(|| LoaderError::NotFound {
                plugin_id: locator.plugin_id.clone(),
                searched: Vec::new(),
            })?;
        Ok(ModuleHandle::new(&locator.plugin_id, factory))
    }

    fn instantiate(&self, handle: &ModuleHandle) -> Result<Box<dyn Plugin>, LoaderError> {
        let factory = handle
            .resource::<PluginFactory>()
            .ok_or_else(|| LoaderError::UnsupportedHandle {
                plugin_id: handle.plugin_id().to_string(),
            })?;
        panic::catch_unwind(AssertUnwindSafe(|| factory())).map_err(|p| LoaderError::Instantiation {
            plugin_id: handle.plugin_id().to_string(),
            message: format!("panic: {}", panic_message(p.as_ref())),
        })
    }

    fn unload(&self, handle: ModuleHandle) -> bool {
        handle.resource::<PluginFactory>().is_some()
    }
}

impl fmt::Debug for FactoryLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<String> = self.factories.read().keys().cloned().collect();
        ids.sort();
        f.debug_struct("FactoryLoader").field("factories", &ids).finish()
    }
}

// --- Dynamic library backend ---

/// Signature of the constructor exported by plugin libraries. The returned
/// pointer owns a boxed trait object and is reclaimed with `Box::from_raw`;
/// null means construction failed.
pub type PluginCreateFn = unsafe extern "C-unwind" fn() -> *mut Box<dyn Plugin>;

/// Calls an exported constructor and takes ownership of its result.
///
/// # Safety
///
/// `create` must return null or a pointer obtained from `Box::into_raw` on a
/// `Box<Box<dyn Plugin>>`, as [`declare_plugin!`](crate::declare_plugin) does.
pub unsafe fn construct(plugin_id: &str, create: PluginCreateFn) -> Result<Box<dyn Plugin>, LoaderError> {
    let raw = panic::catch_unwind(AssertUnwindSafe(|| unsafe { create() })).map_err(|p| {
        LoaderError::Instantiation {
            plugin_id: plugin_id.to_string(),
            message: format!("panic: {}", panic_message(p.as_ref())),
        }
    })?;
    if raw.is_null() {
        return Err(LoaderError::Instantiation {
            plugin_id: plugin_id.to_string(),
            message: "constructor panicked or returned a null pointer".to_string(),
        });
    }
    // SAFETY: non-null pointers come from `Box::into_raw`, per the contract above.
    let plugin = unsafe { Box::from_raw(raw) };
    Ok(*plugin)
}

/// Loader that opens `<dir>/<id>.dll`, `<dir>/lib<id>.so` or
/// `<dir>/lib<id>.dylib`, in that order.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibraryLoader;

impl LibraryLoader {
    pub fn new() -> Self {
        Self
    }

    /// File names tried for `locator`, in order. Ids containing `-` are also
    /// tried with `_`, matching cargo's library naming.
    pub fn candidates(locator: &ModuleLocator) -> Vec<PathBuf> {
        let mut stems = vec![locator.plugin_id.clone()];
        let underscored = locator.plugin_id.replace('-', "_");
        if underscored != locator.plugin_id {
            stems.push(underscored);
        }
        let mut paths = Vec::new();
        for stem in &stems {
            paths.push(locator.search_dir.join(format!("{stem}.dll")));
            paths.push(locator.search_dir.join(format!("lib{stem}.so")));
            paths.push(locator.search_dir.join(format!("lib{stem}.dylib")));
        }
        paths
    }

    fn validate(locator: &ModuleLocator) -> Result<(), LoaderError> {
        let id = &locator.plugin_id;
        let reason = if id.is_empty() {
            Some("empty id")
        } else if id.contains("..") {
            Some("contains '..'")
        } else if id.contains(['/', '\\']) {
            Some("contains a path separator")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(LoaderError::InvalidLocator {
                plugin_id: id.clone(),
                reason: reason.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl ModuleLoader for LibraryLoader {
    fn load(&self, locator: &ModuleLocator) -> Result<ModuleHandle, LoaderError> {
        Self::validate(locator)?;
        let searched = Self::candidates(locator);
        let path = searched
            .iter()
            .find(|p| p.is_file())
            .cloned()
            .ok_or_else(|| LoaderError::NotFound {
                plugin_id: locator.plugin_id.clone(),
                searched: searched.clone(),
            })?;

        debug!(target: "LibraryLoader", "Opening plugin library {}", path.display());
        // SAFETY: loading a library runs its initializers. Plugin libraries
        // are trusted code placed in the plugin directory by the operator.
        let library = unsafe { Library::new(&path) }.map_err(|source| LoaderError::Library {
            path: path.clone(),
            source,
        })?;
        info!(target: "LibraryLoader", "Loaded plugin library {}", path.display());
        Ok(ModuleHandle::new(&locator.plugin_id, library).with_path(path))
    }

    fn instantiate(&self, handle: &ModuleHandle) -> Result<Box<dyn Plugin>, LoaderError> {
        let library = handle
            .resource::<Library>()
            .ok_or_else(|| LoaderError::UnsupportedHandle {
                plugin_id: handle.plugin_id().to_string(),
            })?;
        let path = handle.path().map(Path::to_path_buf).unwrap_or_default();
        let symbol_name = String::from_utf8_lossy(&PLUGIN_CREATE_SYMBOL[..PLUGIN_CREATE_SYMBOL.len() - 1]).into_owned();

        // SAFETY: the symbol is declared by `declare_plugin!` with exactly
        // the `PluginCreateFn` signature.
        let create: Symbol<PluginCreateFn> = unsafe { library.get(PLUGIN_CREATE_SYMBOL) }.map_err(|source| {
            LoaderError::MissingSymbol {
                path: path.clone(),
                symbol: symbol_name,
                source,
            }
        })?;

        // SAFETY: `declare_plugin!` returns null or a leaked `Box<Box<dyn Plugin>>`.
        unsafe { construct(handle.plugin_id(), *create) }
    }

    fn unload(&self, handle: ModuleHandle) -> bool {
        let plugin_id = handle.plugin_id().to_string();
        match handle.into_resource::<Library>() {
            Ok(library) => match library.close() {
                Ok(()) => true,
                Err(e) => {
                    warn!(target: "LibraryLoader", "Failed to close library for {}: {}", plugin_id, e);
                    false
                }
            },
            Err(_) => false,
        }
    }
}

/// Exports the constructor a [`LibraryLoader`] looks for.
///
/// A panicking constructor is caught inside the library and reported as a
/// null pointer: the library carries its own copy of std, and a panic
/// caught by the host's copy would abort the process.
///
/// ```ignore
/// tether_core::declare_plugin!(EchoPlugin, EchoPlugin::new);
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($plugin_type:ty, $constructor:path) => {
        #[unsafe(no_mangle)]
        pub extern "C-unwind" fn _tether_plugin_create()
        -> *mut ::std::boxed::Box<dyn $crate::plugin_system::Plugin> {
            let constructor: fn() -> $plugin_type = $constructor;
            match ::std::panic::catch_unwind(constructor) {
                Ok(plugin) => {
                    let plugin: ::std::boxed::Box<dyn $crate::plugin_system::Plugin> =
                        ::std::boxed::Box::new(plugin);
                    ::std::boxed::Box::into_raw(::std::boxed::Box::new(plugin))
                }
                Err(_) => ::std::ptr::null_mut(),
            }
        }
    };
}
