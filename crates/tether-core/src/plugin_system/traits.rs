use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::plugin_system::messaging::{BusError, MessageBus};
use crate::plugin_system::permissions::PermissionRegistry;

/// Key/value parameters passed to [`Plugin::execute_command`]
pub type CommandParams = serde_json::Map<String, Value>;

/// Result type returned by plugin callbacks
pub type PluginResult<T> = Result<T, PluginError>;

/// Lifecycle state of a plugin id inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum PluginState {
    /// Never loaded, or fully unloaded
    #[default]
    NotLoaded,
    Loaded,
    Initialized,
    Active,
    /// Part of the state set but never entered: `deactivate` returns a
    /// plugin to `Initialized`.
    Inactive,
    /// A load, initialize or activate attempt failed. Only `unload` moves
    /// a plugin out of this state.
    Failed,
}

impl PluginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginState::NotLoaded => "not loaded",
            PluginState::Loaded => "loaded",
            PluginState::Initialized => "initialized",
            PluginState::Active => "active",
            PluginState::Inactive => "inactive",
            PluginState::Failed => "failed",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by plugin callbacks.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin declined the operation without a further cause.
    #[error("operation rejected by plugin")]
    Rejected,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl PluginError {
    pub fn msg(message: impl Into<String>) -> Self {
        PluginError::Message(message.into())
    }
}

/// The capability set every hosted plugin implements.
///
/// The engine only calls these methods through its failure guard, so a
/// plugin may return an error or even panic without affecting the host.
/// Methods take `&self`; plugins keep mutable state behind their own locks.
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn vendor(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Ids of the plugins this one needs.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Full metadata as a JSON object.
    fn metadata(&self) -> Value {
        json!({
            "id": self.id(),
            "name": self.name(),
            "version": self.version(),
            "vendor": self.vendor(),
            "description": self.description(),
            "dependencies": self.dependencies(),
        })
    }

    /// Called once, after every dependency is initialized.
    fn initialize(&self, context: &PluginContext) -> PluginResult<()>;

    fn activate(&self) -> PluginResult<()> {
        Ok(())
    }

    fn deactivate(&self) -> PluginResult<()> {
        Ok(())
    }

    fn shutdown(&self) -> PluginResult<()> {
        Ok(())
    }

    fn execute_command(&self, command: &str, _params: &CommandParams) -> PluginResult<Value> {
        Err(PluginError::UnknownCommand(command.to_string()))
    }
}

/// Handle to the host services, scoped to one plugin id.
///
/// Handed to [`Plugin::initialize`]. It is cheap to clone, so a plugin may
/// keep it for later use in its other callbacks.
#[derive(Clone)]
pub struct PluginContext {
    plugin_id: String,
    bus: Arc<MessageBus>,
    permissions: Arc<PermissionRegistry>,
}

impl PluginContext {
    pub fn new(
        plugin_id: impl Into<String>,
        bus: Arc<MessageBus>,
        permissions: Arc<PermissionRegistry>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            bus,
            permissions,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    /// Registers a handler for messages of `message_type` sent to this plugin.
    pub fn register_handler<F>(&self, message_type: &str, handler: F) -> Result<(), BusError>
    where
        F: Fn(&str, &Value) -> Value + Send + Sync + 'static,
    {
        self.bus.register_handler(&self.plugin_id, message_type, handler)
    }

    pub fn unregister_handler(&self, message_type: &str) -> Result<(), BusError> {
        self.bus.unregister_handler(&self.plugin_id, message_type)
    }

    pub fn send(&self, receiver: &str, message_type: &str, payload: Value) -> Result<Value, BusError> {
        self.bus.send(&self.plugin_id, receiver, message_type, payload)
    }

    pub fn broadcast(
        &self,
        message_type: &str,
        payload: Value,
    ) -> Result<BTreeMap<String, Value>, BusError> {
        self.bus.broadcast(&self.plugin_id, message_type, payload)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.has_permission(&self.plugin_id, permission)
    }

    /// Permissions currently granted to this plugin, sorted.
    pub fn permissions(&self) -> Vec<String> {
        self.permissions.permissions_of(&self.plugin_id)
    }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin_id", &self.plugin_id)
            .finish_non_exhaustive()
    }
}
