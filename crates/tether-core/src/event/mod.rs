//! # Tether Event System
//!
//! Synchronous notifications produced by the plugin system. Observers (a
//! GUI, a log sink, tests) subscribe to an [`EventDispatcher`] and receive
//! every [`HostEvent`] on the thread that produced it.
//!
//! - **[`types`]**: [`HostEvent`] and its plugin, permission and message
//!   families, each with a stable dotted name such as `plugin.activated`.
//! - **[`dispatcher`]**: [`EventDispatcher`], a thread-safe subscriber list.
pub mod dispatcher;
pub mod types;

pub use dispatcher::{EventDispatcher, EventId};
pub use types::{HostEvent, MessageEvent, PermissionEvent, PluginEvent};

#[cfg(test)]
mod tests;
