#![cfg(test)]

use serde_json::json;

use crate::event::{HostEvent, MessageEvent, PermissionEvent, PluginEvent};

fn plugin(id: &str) -> String {
    id.to_string()
}

#[test]
fn test_plugin_event_names() {
    let events = vec![
        (PluginEvent::Loaded { plugin_id: plugin("a") }, "plugin.loaded"),
        (PluginEvent::Unloaded { plugin_id: plugin("a") }, "plugin.unloaded"),
        (PluginEvent::Initialized { plugin_id: plugin("a") }, "plugin.initialized"),
        (PluginEvent::Activated { plugin_id: plugin("a") }, "plugin.activated"),
        (PluginEvent::Deactivated { plugin_id: plugin("a") }, "plugin.deactivated"),
        (
            PluginEvent::Failed {
                plugin_id: plugin("a"),
                message: "boom".into(),
            },
            "plugin.failed",
        ),
    ];

    for (event, name) in events {
        let event = HostEvent::from(event);
        assert_eq!(event.name(), name);
        assert_eq!(event.plugin_id(), Some("a"));
    }
}

#[test]
fn test_permission_event_names_and_ids() {
    let registered: HostEvent = PermissionEvent::Registered {
        permission: "file.read".into(),
    }
    .into();
    assert_eq!(registered.name(), "permission.registered");
    assert_eq!(registered.plugin_id(), None);

    let unregistered: HostEvent = PermissionEvent::Unregistered {
        permission: "file.read".into(),
    }
    .into();
    assert_eq!(unregistered.name(), "permission.unregistered");

    let granted: HostEvent = PermissionEvent::Granted {
        plugin_id: "p".into(),
        permission: "file.read".into(),
    }
    .into();
    assert_eq!(granted.name(), "permission.granted");
    assert_eq!(granted.plugin_id(), Some("p"));

    let revoked: HostEvent = PermissionEvent::Revoked {
        plugin_id: "p".into(),
        permission: "file.read".into(),
    }
    .into();
    assert_eq!(revoked.name(), "permission.revoked");
    assert_eq!(revoked.plugin_id(), Some("p"));
}

#[test]
fn test_message_event_names() {
    let sent: HostEvent = MessageEvent::Sent {
        sender: "a".into(),
        receiver: "b".into(),
        message_type: "ping".into(),
        payload: json!(1),
    }
    .into();
    assert_eq!(sent.name(), "message.sent");
    // Message events are not tied to a single plugin
    assert_eq!(sent.plugin_id(), None);

    let received: HostEvent = MessageEvent::Received {
        receiver: "b".into(),
        sender: "a".into(),
        message_type: "ping".into(),
        payload: json!(1),
        response: json!("pong"),
    }
    .into();
    assert_eq!(received.name(), "message.received");

    let broadcast: HostEvent = MessageEvent::Broadcast {
        sender: "a".into(),
        message_type: "hello".into(),
        payload: json!(null),
    }
    .into();
    assert_eq!(broadcast.name(), "message.broadcast");
}

#[test]
fn test_events_serialize_for_observers() {
    let event: HostEvent = PluginEvent::Failed {
        plugin_id: "p".into(),
        message: "Failed to activate".into(),
    }
    .into();
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(
        value,
        json!({ "Plugin": { "Failed": { "plugin_id": "p", "message": "Failed to activate" } } })
    );
}
