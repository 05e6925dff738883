use serde::Serialize;
use serde_json::Value;

/// Lifecycle notifications for a single plugin id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PluginEvent {
    Loaded { plugin_id: String },
    Unloaded { plugin_id: String },
    Initialized { plugin_id: String },
    Activated { plugin_id: String },
    Deactivated { plugin_id: String },
    /// A load, initialize or activate attempt failed
    Failed { plugin_id: String, message: String },
}

/// Changes to the permission catalogue or to a plugin's grants
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PermissionEvent {
    Registered { permission: String },
    Unregistered { permission: String },
    Granted { plugin_id: String, permission: String },
    Revoked { plugin_id: String, permission: String },
}

/// Message bus traffic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MessageEvent {
    Sent {
        sender: String,
        receiver: String,
        message_type: String,
        payload: Value,
    },
    Received {
        receiver: String,
        sender: String,
        message_type: String,
        payload: Value,
        response: Value,
    },
    Broadcast {
        sender: String,
        message_type: String,
        payload: Value,
    },
}

/// Every event the host produces
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum HostEvent {
    Plugin(PluginEvent),
    Permission(PermissionEvent),
    Message(MessageEvent),
}

impl HostEvent {
    pub fn name(&self) -> &'static str {
        match self {
            HostEvent::Plugin(e) => match e {
                PluginEvent::Loaded { .. } => "plugin.loaded",
                PluginEvent::Unloaded { .. } => "plugin.unloaded",
                PluginEvent::Initialized { .. } => "plugin.initialized",
                PluginEvent::Activated { .. } => "plugin.activated",
                PluginEvent::Deactivated { .. } => "plugin.deactivated",
                PluginEvent::Failed { .. } => "plugin.failed",
            },
            HostEvent::Permission(e) => match e {
                PermissionEvent::Registered { .. } => "permission.registered",
                PermissionEvent::Unregistered { .. } => "permission.unregistered",
                PermissionEvent::Granted { .. } => "permission.granted",
                PermissionEvent::Revoked { .. } => "permission.revoked",
            },
            HostEvent::Message(e) => match e {
                MessageEvent::Sent { .. } => "message.sent",
                MessageEvent::Received { .. } => "message.received",
                MessageEvent::Broadcast { .. } => "message.broadcast",
            },
        }
    }

    /// The plugin id the event concerns, if any.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            HostEvent::Plugin(
                PluginEvent::Loaded { plugin_id }
                | PluginEvent::Unloaded { plugin_id }
                | PluginEvent::Initialized { plugin_id }
                | PluginEvent::Activated { plugin_id }
                | PluginEvent::Deactivated { plugin_id }
                | PluginEvent::Failed { plugin_id, .. },
            ) => Some(plugin_id),
            HostEvent::Permission(
                PermissionEvent::Granted { plugin_id, .. } | PermissionEvent::Revoked { plugin_id, .. },
            ) => Some(plugin_id),
            _ => None,
        }
    }
}

impl From<PluginEvent> for HostEvent {
    fn from(event: PluginEvent) -> Self {
        HostEvent::Plugin(event)
    }
}

impl From<PermissionEvent> for HostEvent {
    fn from(event: PermissionEvent) -> Self {
        HostEvent::Permission(event)
    }
}

impl From<MessageEvent> for HostEvent {
    fn from(event: MessageEvent) -> Self {
        HostEvent::Message(event)
    }
}
