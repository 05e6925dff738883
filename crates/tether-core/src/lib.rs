//! # Tether Core
//!
//! Hosts third-party plugins inside a long-lived process. The crate is split
//! into three subsystems:
//!
//! - [`kernel`]: top-level errors, constants, host configuration and the
//!   [`Host`] that wires the services together.
//! - [`event`]: synchronous notifications ([`HostEvent`]) for observers such
//!   as a GUI or a log sink.
//! - [`plugin_system`]: descriptors, versions, dependency ordering, the
//!   permission registry, the message bus, module loaders and the
//!   [`LifecycleManager`] engine.
pub mod event;
pub mod kernel;
pub mod plugin_system;

pub use event::{EventDispatcher, HostEvent};
pub use kernel::Host;
pub use kernel::error::Error as KernelError;
pub use plugin_system::{
    LifecycleManager, MessageBus, PermissionRegistry, Plugin, PluginContext, PluginDescriptor,
    PluginState,
};
