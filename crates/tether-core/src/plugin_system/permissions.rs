//! Permission catalogue and per-plugin grants.
//!
//! One mutex guards the catalogue and every grant set; reads take it too.
//! Change notifications go out through the [`EventDispatcher`] after the
//! lock is released.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::event::{EventDispatcher, PermissionEvent};

/// Lets a plugin send messages through the bus
pub const COMMUNICATION_SEND: &str = "communication.send";
/// Lets a plugin receive messages through the bus
pub const COMMUNICATION_RECEIVE: &str = "communication.receive";
/// Lets a plugin broadcast to every matching handler
pub const COMMUNICATION_BROADCAST: &str = "communication.broadcast";

/// Permissions the message bus itself enforces.
pub const BUILTIN_PERMISSIONS: &[(&str, &str)] = &[
    (COMMUNICATION_SEND, "Send messages to other plugins"),
    (COMMUNICATION_RECEIVE, "Receive messages from other plugins"),
    (COMMUNICATION_BROADCAST, "Broadcast messages to all plugins"),
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("Permission already registered: {0}")]
    AlreadyRegistered(String),
    #[error("Permission not registered: {0}")]
    UnknownPermission(String),
    #[error("Plugin '{plugin_id}' does not have permission '{permission}'")]
    NotGranted {
        plugin_id: String,
        permission: String,
    },
    #[error("Plugin '{plugin_id}' lacks '{permission}'")]
    Denied {
        plugin_id: String,
        permission: String,
    },
}

#[derive(Debug, Default)]
struct Catalogue {
    /// name -> description
    permissions: BTreeMap<String, String>,
    /// plugin id -> granted names
    grants: HashMap<String, BTreeSet<String>>,
}

pub struct PermissionRegistry {
    inner: Mutex<Catalogue>,
    events: Arc<EventDispatcher>,
}

impl PermissionRegistry {
    /// Empty registry.
    pub fn new(events: Arc<EventDispatcher>) -> Self {
        Self {
            inner: Mutex::new(Catalogue::default()),
            events,
        }
    }

    /// Registry with the `communication.*` permissions already registered.
    pub fn with_builtin(events: Arc<EventDispatcher>) -> Self {
        let registry = Self::new(events);
        registry.register_builtin();
        registry
    }

    /// Registers whichever `communication.*` permissions are missing.
    pub fn register_builtin(&self) {
        for (name, description) in BUILTIN_PERMISSIONS {
            if !self.is_registered(name) {
                // Cannot collide: checked above and names are static.
                let _ = self.register(name, description);
            }
        }
    }

    pub fn register(&self, name: &str, description: &str) -> Result<(), PermissionError> {
        {
            let mut cat = self.inner.lock();
            if cat.permissions.contains_key(name) {
                warn!(target: "PermissionRegistry", "Permission already registered: {}", name);
                return Err(PermissionError::AlreadyRegistered(name.to_string()));
            }
            cat.permissions.insert(name.to_string(), description.to_string());
        }
        info!(target: "PermissionRegistry", "Registered permission: {}", name);
        self.events.emit(PermissionEvent::Registered {
            permission: name.to_string(),
        });
        Ok(())
    }

    /// Removes `name` from the catalogue and from every plugin's grants.
    pub fn unregister(&self, name: &str) -> Result<(), PermissionError> {
        {
            let mut cat = self.inner.lock();
            if cat.permissions.remove(name).is_none() {
                warn!(target: "PermissionRegistry", "Permission not registered: {}", name);
                return Err(PermissionError::UnknownPermission(name.to_string()));
            }
            for granted in cat.grants.values_mut() {
                granted.remove(name);
            }
        }
        info!(target: "PermissionRegistry", "Unregistered permission: {}", name);
        self.events.emit(PermissionEvent::Unregistered {
            permission: name.to_string(),
        });
        Ok(())
    }

    /// Grants `name` to `plugin_id`. Granting twice is not an error and
    /// produces a single event.
    pub fn grant(&self, plugin_id: &str, name: &str) -> Result<(), PermissionError> {
        {
            let mut cat = self.inner.lock();
            if !cat.permissions.contains_key(name) {
                warn!(target: "PermissionRegistry", "Permission not registered: {}", name);
                return Err(PermissionError::UnknownPermission(name.to_string()));
            }
            let granted = cat.grants.entry(plugin_id.to_string()).or_default();
            if !granted.insert(name.to_string()) {
                warn!(
                    target: "PermissionRegistry",
                    "Plugin {} already has permission: {}", plugin_id, name
                );
                return Ok(());
            }
        }
        info!(target: "PermissionRegistry", "Granted permission {} to plugin {}", name, plugin_id);
        self.events.emit(PermissionEvent::Granted {
            plugin_id: plugin_id.to_string(),
            permission: name.to_string(),
        });
        Ok(())
    }

    pub fn revoke(&self, plugin_id: &str, name: &str) -> Result<(), PermissionError> {
        {
            let mut cat = self.inner.lock();
            let removed = cat
                .grants
                .get_mut(plugin_id)
                .is_some_and(|granted| granted.remove(name));
            if !removed {
                warn!(
                    target: "PermissionRegistry",
                    "Plugin {} does not have permission: {}", plugin_id, name
                );
                return Err(PermissionError::NotGranted {
                    plugin_id: plugin_id.to_string(),
                    permission: name.to_string(),
                });
            }
        }
        info!(target: "PermissionRegistry", "Revoked permission {} from plugin {}", name, plugin_id);
        self.events.emit(PermissionEvent::Revoked {
            plugin_id: plugin_id.to_string(),
            permission: name.to_string(),
        });
        Ok(())
    }

    /// False for unknown plugins and unknown permissions.
    pub fn has_permission(&self, plugin_id: &str, name: &str) -> bool {
        let cat = self.inner.lock();
        cat.permissions.contains_key(name)
            && cat.grants.get(plugin_id).is_some_and(|g| g.contains(name))
    }

    /// `Ok` when granted, [`PermissionError::Denied`] otherwise.
    pub fn require(&self, plugin_id: &str, name: &str) -> Result<(), PermissionError> {
        if self.has_permission(plugin_id, name) {
            Ok(())
        } else {
            Err(PermissionError::Denied {
                plugin_id: plugin_id.to_string(),
                permission: name.to_string(),
            })
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.lock().permissions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn registered_permissions(&self) -> Vec<String> {
        self.inner.lock().permissions.keys().cloned().collect()
    }

    pub fn description(&self, name: &str) -> Option<String> {
        self.inner.lock().permissions.get(name).cloned()
    }

    /// Names granted to `plugin_id`, sorted.
    pub fn permissions_of(&self, plugin_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .grants
            .get(plugin_id)
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Plugin ids holding `name`, sorted.
    pub fn plugins_with(&self, name: &str) -> Vec<String> {
        let cat = self.inner.lock();
        let mut ids: Vec<String> = cat
            .grants
            .iter()
            .filter(|(_, g)| g.contains(name))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drops the whole catalogue and all grants without emitting events.
    pub fn clear(&self) {
        let mut cat = self.inner.lock();
        cat.permissions.clear();
        cat.grants.clear();
    }
}

impl fmt::Debug for PermissionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cat = self.inner.lock();
        f.debug_struct("PermissionRegistry")
            .field("permissions", &cat.permissions.len())
            .field("plugins_with_grants", &cat.grants.len())
            .finish()
    }
}
