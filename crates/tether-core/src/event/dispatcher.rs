use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::warn;
use parking_lot::Mutex;

use crate::event::HostEvent;
use crate::plugin_system::guard::panic_message;

/// Identifier returned by [`EventDispatcher::subscribe`]
pub type EventId = u64;

type Handler = Arc<dyn Fn(&HostEvent) + Send + Sync>;

struct Subscription {
    id: EventId,
    /// `None` receives every event
    filter: Option<&'static str>,
    handler: Handler,
}

/// Delivers [`HostEvent`]s to subscribers, synchronously and in
/// subscription order.
///
/// The subscriber list is locked only to take a snapshot; handlers run
/// without it, so a handler may subscribe, unsubscribe or dispatch itself.
pub struct EventDispatcher {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Receives every event.
    pub fn subscribe<F>(&self, handler: F) -> EventId
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        self.add(None, Arc::new(handler))
    }

    /// Receives only events whose [`HostEvent::name`] equals `event_name`.
    pub fn subscribe_to<F>(&self, event_name: &'static str, handler: F) -> EventId
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        self.add(Some(event_name), Arc::new(handler))
    }

    fn add(&self, filter: Option<&'static str>, handler: Handler) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().push(Subscription { id, filter, handler });
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: EventId) -> bool {
        let mut subs = self.subscriptions.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    pub fn dispatch(&self, event: &HostEvent) {
        let name = event.name();
        let handlers: Vec<Handler> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.filter.is_none_or(|f| f == name))
            .map(|s| Arc::clone(&s.handler))
            .collect();

        for handler in handlers {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                warn!(
                    target: "EventDispatcher",
                    "Observer panicked while handling '{}': {}",
                    name,
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    /// Convenience for `dispatch(&event.into())`.
    pub fn emit(&self, event: impl Into<HostEvent>) {
        self.dispatch(&event.into());
    }

    pub fn handler_count(&self) -> usize {
        self.subscriptions.lock().len()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers_count", &self.handler_count())
            .finish()
    }
}
