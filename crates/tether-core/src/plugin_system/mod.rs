//! # Tether Plugin System
//!
//! Everything needed to host third-party plugins: their declared metadata,
//! the order they must start in, what they are allowed to do, how they talk
//! to each other and the engine that moves them through their lifecycle.
//!
//! ## Key Submodules and Responsibilities:
//!
//! - **[`descriptor`]**: [`PluginDescriptor`], the immutable metadata record
//!   parsed from `<id>.json`, plus [`DescriptorBuilder`](descriptor::DescriptorBuilder).
//! - **[`version`]**: [`FrameworkVersion`], the ordered version triple used
//!   for compatibility checks.
//! - **[`dependency`]**: [`DependencyGraph`] ordering and [`DependencyError`].
//! - **[`permissions`]**: [`PermissionRegistry`], the capability catalogue and
//!   per-plugin grants.
//! - **[`messaging`]**: [`MessageBus`], synchronous permission-gated messages
//!   between plugins.
//! - **[`loader`]**: the [`ModuleLoader`] seam with its factory and dynamic
//!   library backends.
//! - **[`traits`]**: the [`Plugin`] trait, [`PluginState`] and
//!   [`PluginContext`].
//! - **[`guard`]**: containment of errors and panics raised by plugin code.
//! - **[`manager`]**: [`LifecycleManager`], the engine itself.
//! - **[`error`]**: [`PluginSystemError`](error::PluginSystemError).
pub mod dependency;
pub mod descriptor;
pub mod error;
pub mod guard;
pub mod loader;
pub mod manager;
pub mod messaging;
pub mod permissions;
pub mod traits;
pub mod version;

pub use dependency::{DependencyError, DependencyGraph};
pub use descriptor::{DescriptorBuilder, PluginDescriptor};
pub use error::PluginSystemError;
pub use guard::LifecycleOperation;
pub use loader::{FactoryLoader, LibraryLoader, ModuleHandle, ModuleLoader, ModuleLocator};
pub use manager::{EngineOptions, LifecycleManager};
pub use messaging::{BusError, HandlerKey, MessageBus};
pub use permissions::{PermissionError, PermissionRegistry};
pub use traits::{CommandParams, Plugin, PluginContext, PluginError, PluginResult, PluginState};
pub use version::FrameworkVersion;

// Test module declaration
#[cfg(test)]
mod tests;
