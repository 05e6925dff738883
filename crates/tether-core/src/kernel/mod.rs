//! # Tether Kernel
//!
//! Process-level glue around the plugin system.
//!
//! - **[`bootstrap`]**: [`Host`], which owns the event dispatcher, permission
//!   registry, message bus and lifecycle engine and brackets their lifetime
//!   with `start`/`stop`.
//! - **[`config`]**: [`HostConfig`], read from JSON, TOML or YAML files.
//! - **[`constants`]**: framework version, default directories and the
//!   host-defined permission catalogue.
//! - **[`error`]**: the aggregate [`Error`](error::Error) type.
pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod error;

pub use bootstrap::Host;
pub use config::{ConfigFormat, HostConfig, PermissionSettings};
