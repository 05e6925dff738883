// Shared fixtures for plugin system tests
#![cfg(test)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tempfile::TempDir;

use crate::event::{EventDispatcher, HostEvent};
use crate::plugin_system::descriptor::DescriptorBuilder;
use crate::plugin_system::loader::{FactoryLoader, LoaderError, ModuleHandle, ModuleLoader, ModuleLocator};
use crate::plugin_system::manager::{EngineOptions, LifecycleManager};
use crate::plugin_system::messaging::MessageBus;
use crate::plugin_system::permissions::PermissionRegistry;
use crate::plugin_system::traits::{CommandParams, Plugin, PluginContext, PluginError, PluginResult};
use crate::plugin_system::version::FrameworkVersion;

/// Ordered record of callbacks, e.g. "initialize:A"
pub type Journal = Arc<Mutex<Vec<String>>>;

/// What a mock callback does when called
#[derive(Debug, Clone, Default)]
pub enum Outcome {
    #[default]
    Succeed,
    Reject,
    Error(String),
    Panic(String),
}

impl Outcome {
    fn run(&self) -> PluginResult<()> {
        match self {
            Outcome::Succeed => Ok(()),
            Outcome::Reject => Err(PluginError::Rejected),
            Outcome::Error(msg) => Err(PluginError::msg(msg.clone())),
            Outcome::Panic(msg) => panic!("{}", msg),
        }
    }
}

#[derive(Clone)]
pub struct MockPlugin {
    id: String,
    dependencies: Vec<String>,
    journal: Journal,
    initialize: Outcome,
    activate: Outcome,
    deactivate: Outcome,
    shutdown: Outcome,
    /// Registered on the bus during initialize, answering with the payload
    echo_handler: Option<String>,
}

impl MockPlugin {
    pub fn new(id: &str, journal: &Journal) -> Self {
        Self {
            id: id.to_string(),
            dependencies: Vec::new(),
            journal: Arc::clone(journal),
            initialize: Outcome::Succeed,
            activate: Outcome::Succeed,
            deactivate: Outcome::Succeed,
            shutdown: Outcome::Succeed,
            echo_handler: None,
        }
    }

    pub fn with_dependency(mut self, id: &str) -> Self {
        self.dependencies.push(id.to_string());
        self
    }

    pub fn with_initialize(mut self, outcome: Outcome) -> Self {
        self.initialize = outcome;
        self
    }

    pub fn with_activate(mut self, outcome: Outcome) -> Self {
        self.activate = outcome;
        self
    }

    pub fn with_deactivate(mut self, outcome: Outcome) -> Self {
        self.deactivate = outcome;
        self
    }

    pub fn with_shutdown(mut self, outcome: Outcome) -> Self {
        self.shutdown = outcome;
        self
    }

    pub fn with_echo_handler(mut self, message_type: &str) -> Self {
        self.echo_handler = Some(message_type.to_string());
        self
    }

    fn note(&self, what: &str) {
        self.journal.lock().unwrap().push(format!("{}:{}", what, self.id));
    }
}

impl Plugin for MockPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Mock"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn vendor(&self) -> &str {
        "Tests"
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn initialize(&self, context: &PluginContext) -> PluginResult<()> {
        self.note("initialize");
        if let Some(message_type) = &self.echo_handler {
            let id = self.id.clone();
            context.register_handler(message_type, move |sender, payload| {
                json!({ "from": sender, "to": id, "payload": payload })
            })?;
        }
        self.initialize.run()
    }

    fn activate(&self) -> PluginResult<()> {
        self.note("activate");
        self.activate.run()
    }

    fn deactivate(&self) -> PluginResult<()> {
        self.note("deactivate");
        self.deactivate.run()
    }

    fn shutdown(&self) -> PluginResult<()> {
        self.note("shutdown");
        self.shutdown.run()
    }

    fn execute_command(&self, command: &str, params: &CommandParams) -> PluginResult<Value> {
        self.note("command");
        match command {
            "echo" => Ok(Value::Object(params.clone())),
            "fail" => Err(PluginError::msg("command failed")),
            "panic" => panic!("command panicked"),
            other => Err(PluginError::UnknownCommand(other.to_string())),
        }
    }
}

/// Factory loader that counts how often the engine calls it
#[derive(Default)]
pub struct CountingLoader {
    pub inner: FactoryLoader,
    pub loads: AtomicUsize,
    pub unloads: AtomicUsize,
}

impl CountingLoader {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

impl ModuleLoader for CountingLoader {
    fn load(&self, locator: &ModuleLocator) -> Result<ModuleHandle, LoaderError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(locator)
    }

    fn instantiate(&self, handle: &ModuleHandle) -> Result<Box<dyn Plugin>, LoaderError> {
        self.inner.instantiate(handle)
    }

    fn unload(&self, handle: ModuleHandle) -> bool {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        self.inner.unload(handle)
    }
}

/// Engine wired to in-memory services, already initialized
pub struct Fixture {
    pub events: Arc<EventDispatcher>,
    pub permissions: Arc<PermissionRegistry>,
    pub bus: Arc<MessageBus>,
    pub loader: Arc<CountingLoader>,
    pub engine: LifecycleManager,
    pub journal: Journal,
    pub recorded: Arc<Mutex<Vec<HostEvent>>>,
    pub metadata_dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_framework("1.0.0")
    }

    pub fn with_framework(version: &str) -> Self {
        let metadata_dir = tempfile::tempdir().expect("Failed to create temporary directory");
        let events = Arc::new(EventDispatcher::new());
        let permissions = Arc::new(PermissionRegistry::with_builtin(Arc::clone(&events)));
        let bus = Arc::new(MessageBus::new(Arc::clone(&permissions), Arc::clone(&events)));
        let loader = Arc::new(CountingLoader::default());
        let options = EngineOptions {
            framework_version: FrameworkVersion::parse(version).unwrap(),
            plugin_dir: metadata_dir.path().to_path_buf(),
            metadata_dir: metadata_dir.path().to_path_buf(),
        };
        let engine = LifecycleManager::new(
            options,
            Box::new(Arc::clone(&loader)),
            Arc::clone(&permissions),
            Arc::clone(&bus),
            Arc::clone(&events),
        );
        engine.initialize().unwrap();

        let recorded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&recorded);
        events.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

        Self {
            events,
            permissions,
            bus,
            loader,
            engine,
            journal: Arc::new(Mutex::new(Vec::new())),
            recorded,
            metadata_dir,
        }
    }

    /// Registers a descriptor matching `plugin` and a factory producing it.
    pub fn add(&self, plugin: MockPlugin) {
        self.add_with_min_framework(plugin, "1.0.0");
    }

    pub fn add_with_min_framework(&self, plugin: MockPlugin, min_framework: &str) {
        let descriptor = DescriptorBuilder::new(plugin.id(), "Mock", "1.0.0", "Tests")
            .dependencies(plugin.dependencies())
            .min_framework_version(min_framework)
            .build()
            .unwrap();
        self.engine.register_descriptor(descriptor).unwrap();
        let id = plugin.id().to_string();
        self.loader
            .inner
            .register(&id, move || Box::new(plugin.clone()) as Box<dyn Plugin>);
    }

    pub fn mock(&self, id: &str) -> MockPlugin {
        MockPlugin::new(id, &self.journal)
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    /// Event names with their plugin id, e.g. "plugin.activated:A"
    pub fn plugin_events(&self) -> Vec<String> {
        self.recorded
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.plugin_id().map(|id| format!("{}:{}", e.name(), id)))
            .filter(|s| s.starts_with("plugin."))
            .collect()
    }

    pub fn failure_messages(&self, id: &str) -> Vec<String> {
        use crate::event::PluginEvent;
        self.recorded
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                HostEvent::Plugin(PluginEvent::Failed { plugin_id, message }) if plugin_id == id => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn grant_messaging(&self, id: &str) {
        for perm in ["communication.send", "communication.receive", "communication.broadcast"] {
            self.permissions.grant(id, perm).unwrap();
        }
    }
}
