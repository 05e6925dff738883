//! # Tether Plugin System Errors
//!
//! [`PluginSystemError`] is what every public [`LifecycleManager`](super::LifecycleManager)
//! operation returns on failure. Its variants follow the failure kinds of the
//! engine: descriptor problems, framework incompatibility, dependency
//! resolution, module loading, plugin callbacks and permissions. The
//! narrower error types of each submodule convert into it.
use std::path::PathBuf;

use crate::plugin_system::dependency::DependencyError;
use crate::plugin_system::descriptor::DescriptorError;
use crate::plugin_system::guard::LifecycleOperation;
use crate::plugin_system::loader::LoaderError;
use crate::plugin_system::messaging::BusError;
use crate::plugin_system::permissions::PermissionError;
use crate::plugin_system::traits::PluginState;
use crate::plugin_system::version::FrameworkVersion;

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Invalid descriptor for '{plugin_id}': {source}")]
    MetadataError {
        plugin_id: String,
        #[source]
        source: DescriptorError,
    },

    #[error("Plugin '{plugin_id}' requires framework {required} but {running} is running")]
    CompatibilityError {
        plugin_id: String,
        required: FrameworkVersion,
        running: FrameworkVersion,
    },

    #[error("Dependency error for '{plugin_id}': {source}")]
    DependencyError {
        plugin_id: String,
        #[source]
        source: DependencyError,
    },

    #[error("Module load failed for '{plugin_id}': {message}")]
    ModuleLoadError {
        plugin_id: String,
        message: String,
        #[source]
        source: Option<LoaderError>,
    },

    #[error("Plugin '{plugin_id}' failed during {operation}: {message}")]
    LifecycleCallbackError {
        plugin_id: String,
        operation: LifecycleOperation,
        message: String,
    },

    #[error("Permission error: {0}")]
    PermissionError(#[from] PermissionError),

    #[error("Message bus error: {0}")]
    Messaging(#[from] BusError),

    #[error("Plugin '{plugin_id}' is {state}: {message}")]
    InvalidState {
        plugin_id: String,
        state: PluginState,
        message: String,
    },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Plugin engine is not initialized")]
    NotInitialized,
}

impl PluginSystemError {
    /// Id of the plugin the error is about, when there is one.
    pub fn plugin_id(&self) -> Option<&str> {
        match self {
            Self::MetadataError { plugin_id, .. }
            | Self::CompatibilityError { plugin_id, .. }
            | Self::DependencyError { plugin_id, .. }
            | Self::ModuleLoadError { plugin_id, .. }
            | Self::LifecycleCallbackError { plugin_id, .. }
            | Self::InvalidState { plugin_id, .. } => Some(plugin_id),
            _ => None,
        }
    }
}
