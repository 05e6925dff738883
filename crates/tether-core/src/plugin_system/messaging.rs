//! Synchronous, permission-gated messaging between plugins.
//!
//! Handlers are keyed by `(plugin id, message type)`. A send needs
//! `communication.send` on the sender and `communication.receive` on the
//! receiver; a broadcast needs `communication.broadcast` on the sender and
//! reaches only receivers holding `communication.receive`.
//!
//! Sends and broadcasts run under the dispatch gate, a reentrant lock the
//! lifecycle engine also takes before touching plugin state. A handler may
//! send messages, register handlers or call into the engine from its own
//! thread, while an unload on another thread waits for it to return. The
//! handler table itself sits behind a separate lock that is released before
//! a handler runs.
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use serde_json::Value;
use thiserror::Error;

use crate::event::{EventDispatcher, MessageEvent};
use crate::plugin_system::guard::panic_message;
use crate::plugin_system::permissions::{
    COMMUNICATION_BROADCAST, COMMUNICATION_RECEIVE, COMMUNICATION_SEND, PermissionError,
    PermissionRegistry,
};

/// Callback receiving `(sender id, payload)` and returning a response
pub type MessageHandler = Arc<dyn Fn(&str, &Value) -> Value + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error(transparent)]
    PermissionDenied(#[from] PermissionError),
    #[error("No handler for message type '{message_type}' on plugin '{receiver}'")]
    NoHandler {
        receiver: String,
        message_type: String,
    },
    #[error("Handler on plugin '{receiver}' panicked: {message}")]
    HandlerFailed { receiver: String, message: String },
    #[error("Handler already registered for '{plugin_id}:{message_type}'")]
    DuplicateHandler {
        plugin_id: String,
        message_type: String,
    },
    #[error("No handler registered for '{plugin_id}:{message_type}'")]
    UnknownHandler {
        plugin_id: String,
        message_type: String,
    },
}

/// Identifies one registered handler
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandlerKey {
    pub plugin_id: String,
    pub message_type: String,
}

impl HandlerKey {
    pub fn new(plugin_id: &str, message_type: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            message_type: message_type.to_string(),
        }
    }
}

impl fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plugin_id, self.message_type)
    }
}

pub struct MessageBus {
    permissions: Arc<PermissionRegistry>,
    events: Arc<EventDispatcher>,
    handlers: RwLock<BTreeMap<HandlerKey, MessageHandler>>,
    dispatch: ReentrantMutex<()>,
}

impl MessageBus {
    pub fn new(permissions: Arc<PermissionRegistry>, events: Arc<EventDispatcher>) -> Self {
        Self {
            permissions,
            events,
            handlers: RwLock::new(BTreeMap::new()),
            dispatch: ReentrantMutex::new(()),
        }
    }

    /// Held for the whole of a send or broadcast. Whoever holds it knows no
    /// handler is running on another thread.
    pub fn dispatch_gate(&self) -> ReentrantMutexGuard<'_, ()> {
        self.dispatch.lock()
    }

    pub fn register_handler<F>(&self, plugin_id: &str, message_type: &str, handler: F) -> Result<(), BusError>
    where
        F: Fn(&str, &Value) -> Value + Send + Sync + 'static,
    {
        let key = HandlerKey::new(plugin_id, message_type);
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&key) {
            warn!(target: "MessageBus", "Message handler already registered: {}", key);
            return Err(BusError::DuplicateHandler {
                plugin_id: key.plugin_id,
                message_type: key.message_type,
            });
        }
        info!(target: "MessageBus", "Registered message handler: {}", key);
        handlers.insert(key, Arc::new(handler));
        Ok(())
    }

    pub fn unregister_handler(&self, plugin_id: &str, message_type: &str) -> Result<(), BusError> {
        let key = HandlerKey::new(plugin_id, message_type);
        if self.handlers.write().remove(&key).is_none() {
            warn!(target: "MessageBus", "Message handler not registered: {}", key);
            return Err(BusError::UnknownHandler {
                plugin_id: key.plugin_id,
                message_type: key.message_type,
            });
        }
        info!(target: "MessageBus", "Unregistered message handler: {}", key);
        Ok(())
    }

    /// Removes every handler owned by `plugin_id`; returns how many.
    pub fn unregister_all_handlers(&self, plugin_id: &str) -> usize {
        let _dispatch = self.dispatch_gate();
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|key, _| key.plugin_id != plugin_id);
        let removed = before - handlers.len();
        if removed > 0 {
            info!(
                target: "MessageBus",
                "Unregistered {} message handler(s) for plugin {}", removed, plugin_id
            );
        }
        removed
    }

    pub fn has_handler(&self, plugin_id: &str, message_type: &str) -> bool {
        self.handlers
            .read()
            .contains_key(&HandlerKey::new(plugin_id, message_type))
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Registered handler keys, sorted.
    pub fn handler_keys(&self) -> Vec<HandlerKey> {
        self.handlers.read().keys().cloned().collect()
    }

    pub fn clear(&self) {
        let _dispatch = self.dispatch_gate();
        self.handlers.write().clear();
    }

    /// Delivers `payload` to the `(receiver, message_type)` handler and
    /// returns its response.
    pub fn send(
        &self,
        sender: &str,
        receiver: &str,
        message_type: &str,
        payload: Value,
    ) -> Result<Value, BusError> {
        let _dispatch = self.dispatch_gate();
        self.permissions.require(sender, COMMUNICATION_SEND)?;
        self.permissions.require(receiver, COMMUNICATION_RECEIVE)?;

        let handler = self
            .handlers
            .read()
            .get(&HandlerKey::new(receiver, message_type))
            .cloned()
            .ok_or_else(|| BusError::NoHandler {
                receiver: receiver.to_string(),
                message_type: message_type.to_string(),
            })?;

        debug!(
            target: "MessageBus",
            "Sending message from {} to {}: {}", sender, receiver, message_type
        );
        self.events.emit(MessageEvent::Sent {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            message_type: message_type.to_string(),
            payload: payload.clone(),
        });

        let response = invoke(&handler, receiver, sender, &payload)?;

        self.events.emit(MessageEvent::Received {
            receiver: receiver.to_string(),
            sender: sender.to_string(),
            message_type: message_type.to_string(),
            payload,
            response: response.clone(),
        });
        Ok(response)
    }

    /// Like [`send`](Self::send), with every failure collapsed to `None`.
    pub fn send_message(
        &self,
        sender: &str,
        receiver: &str,
        message_type: &str,
        payload: Value,
    ) -> Option<Value> {
        match self.send(sender, receiver, message_type, payload) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(target: "MessageBus", "Message from {} to {} not delivered: {}", sender, receiver, e);
                None
            }
        }
    }

    /// Delivers `payload` to every `message_type` handler whose owner may
    /// receive messages. Responses are keyed by receiving plugin id.
    pub fn broadcast(
        &self,
        sender: &str,
        message_type: &str,
        payload: Value,
    ) -> Result<BTreeMap<String, Value>, BusError> {
        let _dispatch = self.dispatch_gate();
        self.permissions.require(sender, COMMUNICATION_BROADCAST)?;

        let targets: Vec<(String, MessageHandler)> = self
            .handlers
            .read()
            .iter()
            .filter(|(key, _)| key.message_type == message_type)
            .map(|(key, handler)| (key.plugin_id.clone(), Arc::clone(handler)))
            .collect();

        debug!(target: "MessageBus", "Broadcasting message from {}: {}", sender, message_type);
        self.events.emit(MessageEvent::Broadcast {
            sender: sender.to_string(),
            message_type: message_type.to_string(),
            payload: payload.clone(),
        });

        let mut responses = BTreeMap::new();
        for (receiver, handler) in targets {
            if !self.permissions.has_permission(&receiver, COMMUNICATION_RECEIVE) {
                warn!(
                    target: "MessageBus",
                    "Plugin {} does not have permission to receive messages", receiver
                );
                continue;
            }
            match invoke(&handler, &receiver, sender, &payload) {
                Ok(response) => {
                    self.events.emit(MessageEvent::Received {
                        receiver: receiver.clone(),
                        sender: sender.to_string(),
                        message_type: message_type.to_string(),
                        payload: payload.clone(),
                        response: response.clone(),
                    });
                    responses.insert(receiver, response);
                }
                Err(e) => warn!(target: "MessageBus", "Broadcast skipped {}: {}", receiver, e),
            }
        }
        Ok(responses)
    }

    /// Like [`broadcast`](Self::broadcast); a denied sender gets an empty map.
    pub fn broadcast_message(&self, sender: &str, message_type: &str, payload: Value) -> BTreeMap<String, Value> {
        self.broadcast(sender, message_type, payload).unwrap_or_else(|e| {
            warn!(target: "MessageBus", "Broadcast from {} refused: {}", sender, e);
            BTreeMap::new()
        })
    }
}

fn invoke(handler: &MessageHandler, receiver: &str, sender: &str, payload: &Value) -> Result<Value, BusError> {
    panic::catch_unwind(AssertUnwindSafe(|| handler(sender, payload))).map_err(|p| BusError::HandlerFailed {
        receiver: receiver.to_string(),
        message: panic_message(p.as_ref()),
    })
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("handlers", &self.handler_count())
            .finish_non_exhaustive()
    }
}
