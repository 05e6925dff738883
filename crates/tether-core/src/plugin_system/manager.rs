//! # Lifecycle engine
//!
//! [`LifecycleManager`] drives every plugin id through
//! `NotLoaded -> Loaded -> Initialized -> Active`, satisfying dependencies
//! recursively before each transition and containing plugin failures.
//!
//! ## Locking
//!
//! All engine state sits in a `ReentrantMutex<RefCell<EngineState>>`. A
//! public operation holds the mutex for its whole duration, including the
//! recursive work it does for dependencies, so other threads are excluded
//! while the same thread (for example an event observer querying state) can
//! re-enter. The `RefCell` borrow is never held across calls into plugin
//! code, the module loader or event observers.
//!
//! Before the state mutex every operation takes the message bus dispatch
//! gate, the same reentrant lock a send or broadcast holds while handlers
//! run. A plugin is therefore never shut down or released while one of its
//! handlers executes on another thread.
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use serde_json::Value;

use crate::event::{EventDispatcher, PluginEvent};
use crate::kernel::constants::{DEFAULT_METADATA_DIR, DEFAULT_PLUGIN_DIR, FRAMEWORK_VERSION};
use crate::plugin_system::dependency::{DependencyError, DependencyGraph};
use crate::plugin_system::descriptor::{DescriptorError, PluginDescriptor};
use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::guard::{LifecycleOperation, guarded};
use crate::plugin_system::loader::{LoaderError, ModuleHandle, ModuleLoader, ModuleLocator};
use crate::plugin_system::messaging::MessageBus;
use crate::plugin_system::permissions::PermissionRegistry;
use crate::plugin_system::traits::{CommandParams, Plugin, PluginContext, PluginState};
use crate::plugin_system::version::FrameworkVersion;

type Result<T> = std::result::Result<T, PluginSystemError>;

/// Static settings of an engine instance
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Version of the running framework
    pub framework_version: FrameworkVersion,
    /// Directory handed to the module loader as the search location
    pub plugin_dir: PathBuf,
    /// Directory holding `<id>.json` descriptors
    pub metadata_dir: PathBuf,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            framework_version: FrameworkVersion::parse(FRAMEWORK_VERSION)
                .unwrap_or(FrameworkVersion::new(1, 0, 0)),
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            metadata_dir: PathBuf::from(DEFAULT_METADATA_DIR),
        }
    }
}

/// Runtime record of a loaded plugin
struct PluginRecord {
    descriptor: Arc<PluginDescriptor>,
    instance: Arc<dyn Plugin>,
    handle: ModuleHandle,
    context: PluginContext,
}

#[derive(Default)]
struct EngineState {
    initialized: bool,
    descriptors: HashMap<String, Arc<PluginDescriptor>>,
    records: HashMap<String, PluginRecord>,
    /// Ids absent from this map are `NotLoaded`
    states: HashMap<String, PluginState>,
    /// Recursive initialize/activate calls currently on the stack
    in_progress: HashSet<(String, LifecycleOperation)>,
}

type Cell = RefCell<EngineState>;

/// Dispatch gate plus engine state, released state first
struct EngineGuard<'a> {
    state: ReentrantMutexGuard<'a, Cell>,
    _dispatch: ReentrantMutexGuard<'a, ()>,
}

impl Deref for EngineGuard<'_> {
    type Target = Cell;

    fn deref(&self) -> &Cell {
        &self.state
    }
}

pub struct LifecycleManager {
    options: EngineOptions,
    loader: Box<dyn ModuleLoader>,
    permissions: Arc<PermissionRegistry>,
    bus: Arc<MessageBus>,
    events: Arc<EventDispatcher>,
    state: ReentrantMutex<Cell>,
}

impl LifecycleManager {
    pub fn new(
        options: EngineOptions,
        loader: Box<dyn ModuleLoader>,
        permissions: Arc<PermissionRegistry>,
        bus: Arc<MessageBus>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            options,
            loader,
            permissions,
            bus,
            events,
            state: ReentrantMutex::new(RefCell::new(EngineState::default())),
        }
    }

    fn lock(&self) -> EngineGuard<'_> {
        let dispatch = self.bus.dispatch_gate();
        EngineGuard {
            state: self.state.lock(),
            _dispatch: dispatch,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn framework_version(&self) -> FrameworkVersion {
        self.options.framework_version
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    /// Opens the engine for lifecycle operations.
    pub fn initialize(&self) -> Result<()> {
        let guard = self.lock();
        let mut st = guard.borrow_mut();
        if st.initialized {
            warn!(target: "PluginManager", "Plugin engine already initialized");
            return Ok(());
        }
        st.initialized = true;
        info!(
            target: "PluginManager",
            "Plugin engine initialized (framework {})", self.options.framework_version
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().borrow().initialized
    }

    /// Deactivates and unloads every loaded plugin, dependents first, then
    /// closes the engine. Known descriptors are forgotten.
    pub fn shutdown(&self) -> Result<()> {
        let guard = self.lock();
        let cell: &Cell = &guard;
        if !cell.borrow().initialized {
            return Ok(());
        }
        info!(target: "PluginManager", "Shutting down plugin engine");

        let mut order = match self.loaded_graph(cell).resolve_all() {
            Ok(order) => order,
            Err(e) => {
                warn!(target: "PluginManager", "Falling back to id order for shutdown: {}", e);
                let mut ids: Vec<String> = cell.borrow().records.keys().cloned().collect();
                ids.sort();
                ids
            }
        };
        order.reverse();

        for id in &order {
            if let Err(e) = self.deactivate_locked(cell, id) {
                // Left for the force-release below; unloading would retry the deactivate.
                warn!(target: "PluginManager", "Failed to deactivate {} during shutdown: {}", id, e);
                continue;
            }
            if let Err(e) = self.unload_locked(cell, id) {
                warn!(target: "PluginManager", "Failed to unload {} during shutdown: {}", id, e);
            }
        }

        // Anything that refused to unload is released anyway.
        let leftovers: Vec<(String, PluginRecord)> = cell.borrow_mut().records.drain().collect();
        for (id, record) in leftovers {
            warn!(target: "PluginManager", "Force-releasing plugin {}", id);
            self.release(&id, record);
        }

        let mut st = cell.borrow_mut();
        st.states.clear();
        st.descriptors.clear();
        st.in_progress.clear();
        st.initialized = false;
        info!(target: "PluginManager", "Plugin engine shut down");
        Ok(())
    }

    // --- Descriptors ---

    /// Stores `descriptor`, replacing any previous one for the same id.
    pub fn register_descriptor(&self, descriptor: PluginDescriptor) -> Result<()> {
        let guard = self.lock();
        self.ensure_initialized(&guard)?;
        let id = descriptor.id().to_string();
        debug!(target: "PluginManager", "Registered descriptor for {}", id);
        guard.borrow_mut().descriptors.insert(id, Arc::new(descriptor));
        Ok(())
    }

    /// Reads `<metadata_dir>/<id>.json`, replacing any cached descriptor.
    pub fn load_descriptor(&self, plugin_id: &str) -> Result<Arc<PluginDescriptor>> {
        let guard = self.lock();
        self.ensure_initialized(&guard)?;
        let descriptor = Arc::new(self.read_descriptor_file(plugin_id)?);
        guard
            .borrow_mut()
            .descriptors
            .insert(plugin_id.to_string(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Parses every `*.json` file in the metadata directory and registers the
    /// valid ones. Returns the registered ids, sorted.
    pub fn scan_for_plugins(&self) -> Result<Vec<String>> {
        let guard = self.lock();
        self.ensure_initialized(&guard)?;
        let dir = &self.options.metadata_dir;
        if !dir.is_dir() {
            warn!(target: "PluginManager", "Metadata directory does not exist: {}", dir.display());
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(dir).map_err(|source| PluginSystemError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match PluginDescriptor::from_file(&path) {
                Ok(descriptor) => {
                    debug!(target: "PluginManager", "Found plugin {} at {}", descriptor.id(), path.display());
                    found.push(descriptor.id().to_string());
                    guard
                        .borrow_mut()
                        .descriptors
                        .insert(descriptor.id().to_string(), Arc::new(descriptor));
                }
                Err(e) => warn!(target: "PluginManager", "Skipping {}: {}", path.display(), e),
            }
        }
        found.sort();
        info!(target: "PluginManager", "Found {} plugin descriptor(s)", found.len());
        Ok(found)
    }

    pub fn descriptor(&self, plugin_id: &str) -> Option<Arc<PluginDescriptor>> {
        self.lock().borrow().descriptors.get(plugin_id).cloned()
    }

    /// Ids with a known descriptor, sorted.
    pub fn available_plugins(&self) -> Vec<String> {
        let guard = self.lock();
        let mut ids: Vec<String> = guard.borrow().descriptors.keys().cloned().collect();
        ids.sort();
        ids
    }

    // --- Lifecycle ---

    pub fn load(&self, plugin_id: &str) -> Result<()> {
        let guard = self.lock();
        self.ensure_initialized(&guard)?;
        self.load_locked(&guard, plugin_id)
    }

    pub fn initialize_plugin(&self, plugin_id: &str) -> Result<()> {
        let guard = self.lock();
        self.ensure_initialized(&guard)?;
        self.initialize_locked(&guard, plugin_id)
    }

    pub fn activate(&self, plugin_id: &str) -> Result<()> {
        let guard = self.lock();
        self.ensure_initialized(&guard)?;
        self.activate_locked(&guard, plugin_id)
    }

    pub fn deactivate(&self, plugin_id: &str) -> Result<()> {
        let guard = self.lock();
        self.ensure_initialized(&guard)?;
        self.deactivate_locked(&guard, plugin_id)
    }

    pub fn unload(&self, plugin_id: &str) -> Result<()> {
        let guard = self.lock();
        self.ensure_initialized(&guard)?;
        self.unload_locked(&guard, plugin_id)
    }

    /// Runs `command` on an active plugin. `None` when the plugin is not
    /// active or the command fails.
    pub fn execute_command(&self, plugin_id: &str, command: &str, params: &CommandParams) -> Option<Value> {
        let guard = self.lock();
        let cell: &Cell = &guard;
        let instance = {
            let st = cell.borrow();
            if !st.initialized {
                warn!(target: "PluginManager", "Plugin engine is not initialized");
                return None;
            }
            if st.states.get(plugin_id) != Some(&PluginState::Active) {
                warn!(target: "PluginManager", "Plugin is not active: {}", plugin_id);
                return None;
            }
            Arc::clone(&st.records.get(plugin_id)?.instance)
        };

        match guarded(|| instance.execute_command(command, params)) {
            Ok(value) => Some(value),
            Err(failure) => {
                error!(
                    target: "PluginManager",
                    "Command '{}' on {} failed: {}",
                    command,
                    plugin_id,
                    failure.describe(LifecycleOperation::ExecuteCommand)
                );
                None
            }
        }
    }

    // --- Queries ---

    pub fn state(&self, plugin_id: &str) -> PluginState {
        let guard = self.lock();
        let st = guard.borrow();
        state_in(&st, plugin_id)
    }

    pub fn is_loaded(&self, plugin_id: &str) -> bool {
        self.lock().borrow().records.contains_key(plugin_id)
    }

    pub fn is_active(&self, plugin_id: &str) -> bool {
        self.state(plugin_id) == PluginState::Active
    }

    /// Ids with a live record, sorted.
    pub fn loaded_plugins(&self) -> Vec<String> {
        let guard = self.lock();
        let mut ids: Vec<String> = guard.borrow().records.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn active_plugins(&self) -> Vec<String> {
        let guard = self.lock();
        let st = guard.borrow();
        let mut ids: Vec<String> = st
            .states
            .iter()
            .filter(|(_, s)| **s == PluginState::Active)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Ids of known descriptors that declare a dependency on `plugin_id`.
    pub fn dependents_of(&self, plugin_id: &str) -> Vec<String> {
        let guard = self.lock();
        let st = guard.borrow();
        let mut ids: Vec<String> = st
            .descriptors
            .values()
            .filter(|d| d.id() != plugin_id && d.depends_on(plugin_id))
            .map(|d| d.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Dependency-respecting order covering `plugin_ids` and everything
    /// they depend on, dependencies first.
    pub fn dependency_order(&self, plugin_ids: &[&str]) -> Result<Vec<String>> {
        let guard = self.lock();
        let cell: &Cell = &guard;
        self.ensure_initialized(cell)?;
        let mut graph = DependencyGraph::new();
        let mut pending: Vec<String> = plugin_ids.iter().map(|s| s.to_string()).collect();
        while let Some(id) = pending.pop() {
            if graph.contains(&id) {
                continue;
            }
            let descriptor = self.resolve_descriptor(cell, &id)?;
            pending.extend(descriptor.dependencies().iter().cloned());
            graph.add(&id, descriptor.dependencies().iter().cloned());
        }
        graph
            .resolve_order(plugin_ids.iter().copied())
            .map_err(|source| PluginSystemError::DependencyError {
                plugin_id: plugin_ids.first().map(|s| s.to_string()).unwrap_or_default(),
                source,
            })
    }

    // --- Internals (caller holds the reentrant lock) ---

    fn ensure_initialized(&self, cell: &Cell) -> Result<()> {
        if cell.borrow().initialized {
            Ok(())
        } else {
            error!(target: "PluginManager", "Plugin engine is not initialized");
            Err(PluginSystemError::NotInitialized)
        }
    }

    fn state_of(&self, cell: &Cell, plugin_id: &str) -> PluginState {
        state_in(&cell.borrow(), plugin_id)
    }

    fn set_state(&self, cell: &Cell, plugin_id: &str, state: PluginState) {
        cell.borrow_mut().states.insert(plugin_id.to_string(), state);
    }

    /// Marks `plugin_id` Failed and reports why.
    fn fail(&self, cell: &Cell, plugin_id: &str, message: &str) {
        self.set_state(cell, plugin_id, PluginState::Failed);
        error!(target: "PluginManager", "Plugin {} failed: {}", plugin_id, message);
        self.events.emit(PluginEvent::Failed {
            plugin_id: plugin_id.to_string(),
            message: message.to_string(),
        });
    }

    fn read_descriptor_file(&self, plugin_id: &str) -> Result<PluginDescriptor> {
        let path = self.options.metadata_dir.join(format!("{plugin_id}.json"));
        let descriptor = PluginDescriptor::from_file(&path).map_err(|source| {
            PluginSystemError::MetadataError {
                plugin_id: plugin_id.to_string(),
                source,
            }
        })?;
        if descriptor.id() != plugin_id {
            return Err(PluginSystemError::MetadataError {
                plugin_id: plugin_id.to_string(),
                source: DescriptorError::IdMismatch {
                    expected: plugin_id.to_string(),
                    found: descriptor.id().to_string(),
                },
            });
        }
        Ok(descriptor)
    }

    /// Cached descriptor, or one read on demand from the metadata directory.
    fn resolve_descriptor(&self, cell: &Cell, plugin_id: &str) -> Result<Arc<PluginDescriptor>> {
        if let Some(d) = cell.borrow().descriptors.get(plugin_id) {
            return Ok(Arc::clone(d));
        }
        let descriptor = Arc::new(self.read_descriptor_file(plugin_id)?);
        cell.borrow_mut()
            .descriptors
            .insert(plugin_id.to_string(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Checks that every transitive dependency has a usable descriptor.
    /// Nothing is loaded here.
    fn check_dependencies(
        &self,
        cell: &Cell,
        descriptor: &PluginDescriptor,
        path: &mut Vec<String>,
        checked: &mut HashSet<String>,
    ) -> std::result::Result<(), DependencyError> {
        path.push(descriptor.id().to_string());
        for dep in descriptor.dependencies() {
            if let Some(pos) = path.iter().position(|id| id == dep) {
                let mut cycle = path[pos..].to_vec();
                cycle.push(dep.clone());
                return Err(DependencyError::CyclicDependency(cycle));
            }
            if checked.contains(dep) {
                continue;
            }
            let dep_descriptor = self.resolve_descriptor(cell, dep).map_err(|e| {
                DependencyError::MissingDescriptor {
                    plugin_id: descriptor.id().to_string(),
                    dependency: dep.clone(),
                    reason: e.to_string(),
                }
            })?;
            if !dep_descriptor.is_compatible_with(&self.options.framework_version) {
                return Err(DependencyError::IncompatibleDependency {
                    plugin_id: descriptor.id().to_string(),
                    dependency: dep.clone(),
                    reason: format!(
                        "requires framework {} but {} is running",
                        dep_descriptor.min_framework_version(),
                        self.options.framework_version
                    ),
                });
            }
            self.check_dependencies(cell, &dep_descriptor, path, checked)?;
            checked.insert(dep.clone());
        }
        path.pop();
        Ok(())
    }

    fn load_locked(&self, cell: &Cell, plugin_id: &str) -> Result<()> {
        if cell.borrow().records.contains_key(plugin_id) {
            debug!(target: "PluginManager", "Plugin already loaded: {}", plugin_id);
            return Ok(());
        }
        if self.state_of(cell, plugin_id) == PluginState::Failed {
            return Err(PluginSystemError::InvalidState {
                plugin_id: plugin_id.to_string(),
                state: PluginState::Failed,
                message: "unload the plugin before retrying".to_string(),
            });
        }
        info!(target: "PluginManager", "Loading plugin: {}", plugin_id);

        let descriptor = match self.resolve_descriptor(cell, plugin_id) {
            Ok(d) => d,
            Err(e) => {
                self.fail(cell, plugin_id, &format!("Failed to load metadata: {e}"));
                return Err(e);
            }
        };

        let running = self.options.framework_version;
        if !descriptor.is_compatible_with(&running) {
            self.fail(cell, plugin_id, &format!("Incompatible with framework version {running}"));
            return Err(PluginSystemError::CompatibilityError {
                plugin_id: plugin_id.to_string(),
                required: descriptor.min_framework_version(),
                running,
            });
        }

        let mut path = Vec::new();
        if let Err(source) = self.check_dependencies(cell, &descriptor, &mut path, &mut HashSet::new()) {
            self.fail(cell, plugin_id, &format!("Unsatisfied dependencies: {source}"));
            return Err(PluginSystemError::DependencyError {
                plugin_id: plugin_id.to_string(),
                source,
            });
        }

        let locator = ModuleLocator::new(plugin_id, &self.options.plugin_dir);
        let handle = match self.loader.load(&locator) {
            Ok(h) => h,
            Err(e) => {
                let message = match &e {
                    LoaderError::NotFound { .. } => "Plugin library not found".to_string(),
                    other => format!("Failed to load: {other}"),
                };
                return Err(self.module_failure(cell, plugin_id, message, e));
            }
        };

        let instance: Arc<dyn Plugin> = match self.loader.instantiate(&handle) {
            Ok(p) => Arc::from(p),
            Err(e) => {
                self.release_handle(plugin_id, handle);
                return Err(self.module_failure(cell, plugin_id, format!("Failed to get instance: {e}"), e));
            }
        };

        let reported = instance.id().to_string();
        if reported != plugin_id {
            drop(instance);
            self.release_handle(plugin_id, handle);
            let message = format!("Instance does not match descriptor (reports id '{reported}')");
            self.fail(cell, plugin_id, &message);
            return Err(PluginSystemError::ModuleLoadError {
                plugin_id: plugin_id.to_string(),
                message,
                source: None,
            });
        }

        let context = PluginContext::new(plugin_id, Arc::clone(&self.bus), Arc::clone(&self.permissions));
        {
            let mut st = cell.borrow_mut();
            st.records.insert(
                plugin_id.to_string(),
                PluginRecord {
                    descriptor,
                    instance,
                    handle,
                    context,
                },
            );
            st.states.insert(plugin_id.to_string(), PluginState::Loaded);
        }
        info!(target: "PluginManager", "Plugin loaded: {}", plugin_id);
        self.events.emit(PluginEvent::Loaded {
            plugin_id: plugin_id.to_string(),
        });
        Ok(())
    }

    fn module_failure(&self, cell: &Cell, plugin_id: &str, message: String, source: LoaderError) -> PluginSystemError {
        self.fail(cell, plugin_id, &message);
        PluginSystemError::ModuleLoadError {
            plugin_id: plugin_id.to_string(),
            message,
            source: Some(source),
        }
    }

    fn initialize_locked(&self, cell: &Cell, plugin_id: &str) -> Result<()> {
        match self.state_of(cell, plugin_id) {
            PluginState::Initialized | PluginState::Active => return Ok(()),
            PluginState::Failed => return Err(failed_state(plugin_id, "cannot be initialized")),
            PluginState::NotLoaded => self.load_locked(cell, plugin_id)?,
            PluginState::Loaded | PluginState::Inactive => {}
        }
        self.with_progress(cell, plugin_id, LifecycleOperation::Initialize, || {
            self.initialize_inner(cell, plugin_id)
        })
    }

    fn initialize_inner(&self, cell: &Cell, plugin_id: &str) -> Result<()> {
        let (descriptor, instance, context) = self.record_parts(cell, plugin_id)?;

        for dep in descriptor.dependencies() {
            if self.state_of(cell, dep) == PluginState::NotLoaded && self.load_locked(cell, dep).is_err() {
                return Err(self.dependency_failure(cell, plugin_id, dep, "load"));
            }
            if self.initialize_locked(cell, dep).is_err() {
                return Err(self.dependency_failure(cell, plugin_id, dep, "initialize"));
            }
        }

        info!(target: "PluginManager", "Initializing plugin: {}", plugin_id);
        if let Err(failure) = guarded(|| instance.initialize(&context)) {
            return Err(self.callback_failure(cell, plugin_id, LifecycleOperation::Initialize, failure.describe(LifecycleOperation::Initialize)));
        }

        self.set_state(cell, plugin_id, PluginState::Initialized);
        info!(target: "PluginManager", "Plugin initialized: {}", plugin_id);
        self.events.emit(PluginEvent::Initialized {
            plugin_id: plugin_id.to_string(),
        });
        Ok(())
    }

    fn activate_locked(&self, cell: &Cell, plugin_id: &str) -> Result<()> {
        match self.state_of(cell, plugin_id) {
            PluginState::Active => return Ok(()),
            PluginState::Failed => return Err(failed_state(plugin_id, "cannot be activated")),
            PluginState::Initialized => {}
            _ => self.initialize_locked(cell, plugin_id)?,
        }
        self.with_progress(cell, plugin_id, LifecycleOperation::Activate, || {
            self.activate_inner(cell, plugin_id)
        })
    }

    fn activate_inner(&self, cell: &Cell, plugin_id: &str) -> Result<()> {
        let (descriptor, instance, _) = self.record_parts(cell, plugin_id)?;

        for dep in descriptor.dependencies() {
            if self.activate_locked(cell, dep).is_err() {
                return Err(self.dependency_failure(cell, plugin_id, dep, "activate"));
            }
        }

        info!(target: "PluginManager", "Activating plugin: {}", plugin_id);
        if let Err(failure) = guarded(|| instance.activate()) {
            return Err(self.callback_failure(cell, plugin_id, LifecycleOperation::Activate, failure.describe(LifecycleOperation::Activate)));
        }

        self.set_state(cell, plugin_id, PluginState::Active);
        info!(target: "PluginManager", "Plugin activated: {}", plugin_id);
        self.events.emit(PluginEvent::Activated {
            plugin_id: plugin_id.to_string(),
        });
        Ok(())
    }

    fn deactivate_locked(&self, cell: &Cell, plugin_id: &str) -> Result<()> {
        if self.state_of(cell, plugin_id) != PluginState::Active {
            return Ok(());
        }

        let dependents: Vec<String> = {
            let st = cell.borrow();
            let mut ids: Vec<String> = st
                .records
                .iter()
                .filter(|(id, r)| {
                    id.as_str() != plugin_id
                        && r.descriptor.depends_on(plugin_id)
                        && state_in(&st, id) == PluginState::Active
                })
                .map(|(id, _)| id.clone())
                .collect();
            ids.sort();
            ids
        };
        for dependent in &dependents {
            self.deactivate_locked(cell, dependent)?;
        }

        let (_, instance, _) = self.record_parts(cell, plugin_id)?;
        info!(target: "PluginManager", "Deactivating plugin: {}", plugin_id);
        if let Err(failure) = guarded(|| instance.deactivate()) {
            let message = failure.describe(LifecycleOperation::Deactivate);
            warn!(target: "PluginManager", "Plugin {} stays active: {}", plugin_id, message);
            return Err(PluginSystemError::LifecycleCallbackError {
                plugin_id: plugin_id.to_string(),
                operation: LifecycleOperation::Deactivate,
                message,
            });
        }

        self.set_state(cell, plugin_id, PluginState::Initialized);
        info!(target: "PluginManager", "Plugin deactivated: {}", plugin_id);
        self.events.emit(PluginEvent::Deactivated {
            plugin_id: plugin_id.to_string(),
        });
        Ok(())
    }

    fn unload_locked(&self, cell: &Cell, plugin_id: &str) -> Result<()> {
        let state = self.state_of(cell, plugin_id);
        if state == PluginState::NotLoaded {
            return Ok(());
        }
        if !cell.borrow().records.contains_key(plugin_id) {
            // Failed before a record existed: only the marker is left.
            cell.borrow_mut().states.remove(plugin_id);
            info!(target: "PluginManager", "Cleared failed plugin: {}", plugin_id);
            return Ok(());
        }

        let dependents: Vec<String> = {
            let st = cell.borrow();
            let mut ids: Vec<String> = st
                .records
                .iter()
                .filter(|(id, r)| id.as_str() != plugin_id && r.descriptor.depends_on(plugin_id))
                .map(|(id, _)| id.clone())
                .collect();
            ids.sort();
            ids
        };
        if !dependents.is_empty() {
            warn!(
                target: "PluginManager",
                "Cannot unload {}: required by {}", plugin_id, dependents.join(", ")
            );
            return Err(PluginSystemError::DependencyError {
                plugin_id: plugin_id.to_string(),
                source: DependencyError::HasDependents {
                    plugin_id: plugin_id.to_string(),
                    dependents,
                },
            });
        }

        info!(target: "PluginManager", "Unloading plugin: {}", plugin_id);
        if state == PluginState::Active {
            self.deactivate_locked(cell, plugin_id)?;
        }
        if self.state_of(cell, plugin_id) == PluginState::Initialized {
            let (_, instance, _) = self.record_parts(cell, plugin_id)?;
            if let Err(failure) = guarded(|| instance.shutdown()) {
                let message = failure.describe(LifecycleOperation::Shutdown);
                warn!(target: "PluginManager", "Unload of {} aborted: {}", plugin_id, message);
                return Err(PluginSystemError::LifecycleCallbackError {
                    plugin_id: plugin_id.to_string(),
                    operation: LifecycleOperation::Shutdown,
                    message,
                });
            }
        }

        let record = {
            let mut st = cell.borrow_mut();
            st.states.remove(plugin_id);
            st.records.remove(plugin_id)
        };
        if let Some(record) = record {
            self.release(plugin_id, record);
        }
        info!(target: "PluginManager", "Plugin unloaded: {}", plugin_id);
        self.events.emit(PluginEvent::Unloaded {
            plugin_id: plugin_id.to_string(),
        });
        Ok(())
    }

    /// Drops the instance and its handlers, then hands the module back.
    fn release(&self, plugin_id: &str, record: PluginRecord) {
        self.bus.unregister_all_handlers(plugin_id);
        let PluginRecord {
            instance,
            handle,
            context,
            ..
        } = record;
        drop(context);
        drop(instance);
        self.release_handle(plugin_id, handle);
    }

    fn release_handle(&self, plugin_id: &str, handle: ModuleHandle) {
        if !self.loader.unload(handle) {
            warn!(target: "PluginManager", "Module loader failed to release {}", plugin_id);
        }
    }

    fn record_parts(
        &self,
        cell: &Cell,
        plugin_id: &str,
    ) -> Result<(Arc<PluginDescriptor>, Arc<dyn Plugin>, PluginContext)> {
        let st = cell.borrow();
        let record = st.records.get(plugin_id).ok_or_else(|| PluginSystemError::InvalidState {
            plugin_id: plugin_id.to_string(),
            state: state_in(&st, plugin_id),
            message: "no loaded module".to_string(),
        })?;
        Ok((
            Arc::clone(&record.descriptor),
            Arc::clone(&record.instance),
            record.context.clone(),
        ))
    }

    fn dependency_failure(&self, cell: &Cell, plugin_id: &str, dependency: &str, operation: &'static str) -> PluginSystemError {
        let source = DependencyError::DependencyFailed {
            plugin_id: plugin_id.to_string(),
            dependency: dependency.to_string(),
            operation,
        };
        self.fail(cell, plugin_id, &source.to_string());
        PluginSystemError::DependencyError {
            plugin_id: plugin_id.to_string(),
            source,
        }
    }

    fn callback_failure(&self, cell: &Cell, plugin_id: &str, operation: LifecycleOperation, message: String) -> PluginSystemError {
        self.fail(cell, plugin_id, &message);
        PluginSystemError::LifecycleCallbackError {
            plugin_id: plugin_id.to_string(),
            operation,
            message,
        }
    }

    /// Runs `body` with `(plugin_id, operation)` marked in progress. Re-entry
    /// for the same pair means the dependency chain loops back.
    fn with_progress(
        &self,
        cell: &Cell,
        plugin_id: &str,
        operation: LifecycleOperation,
        body: impl FnOnce() -> Result<()>,
    ) -> Result<()> {
        let key = (plugin_id.to_string(), operation);
        if !cell.borrow_mut().in_progress.insert(key.clone()) {
            return Err(PluginSystemError::DependencyError {
                plugin_id: plugin_id.to_string(),
                source: DependencyError::CyclicDependency(vec![plugin_id.to_string(), plugin_id.to_string()]),
            });
        }
        let result = body();
        cell.borrow_mut().in_progress.remove(&key);
        result
    }

    /// Graph restricted to plugins with a live record.
    fn loaded_graph(&self, cell: &Cell) -> DependencyGraph {
        let st = cell.borrow();
        let mut graph = DependencyGraph::new();
        for (id, record) in &st.records {
            graph.add(id, record.descriptor.dependencies().iter().cloned());
        }
        graph
    }
}

fn state_in(st: &EngineState, plugin_id: &str) -> PluginState {
    st.states.get(plugin_id).copied().unwrap_or_default()
}

fn failed_state(plugin_id: &str, message: &str) -> PluginSystemError {
    PluginSystemError::InvalidState {
        plugin_id: plugin_id.to_string(),
        state: PluginState::Failed,
        message: message.to_string(),
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        if self.is_initialized() {
            if let Err(e) = self.shutdown() {
                error!(target: "PluginManager", "Shutdown on drop failed: {}", e);
            }
        }
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("options", &self.options)
            .field("loaded", &self.loaded_plugins())
            .finish_non_exhaustive()
    }
}
