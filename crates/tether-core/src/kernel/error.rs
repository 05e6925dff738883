//! # Tether Kernel Errors
//!
//! [`Error`] aggregates the subsystem errors and adds the failures that
//! belong to the host itself: configuration and file access.
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error as ThisError;

use crate::plugin_system::error::PluginSystemError;
use crate::plugin_system::messaging::BusError;
use crate::plugin_system::permissions::PermissionError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("Plugin system error: {0}")]
    PluginSystem(#[from] PluginSystemError),

    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("Message bus error: {0}")]
    Messaging(#[from] BusError),

    #[error("Configuration error{}: {message}", path.as_ref().map(|p| format!(" in '{}'", p.display())).unwrap_or_default())]
    Config {
        path: Option<PathBuf>,
        message: String,
    },

    #[error("Unsupported configuration format: {}", path.display())]
    UnsupportedConfigFormat { path: PathBuf },

    #[error("I/O error during '{operation}' on '{}': {source}", path.display())]
    Io {
        operation: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn config(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Error::Config {
            path,
            message: message.into(),
        }
    }
}

/// Result type for kernel operations
pub type Result<T> = StdResult<T, Error>;
