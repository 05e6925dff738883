//! Host configuration.
//!
//! A [`HostConfig`] is read from a JSON, TOML or YAML file chosen by
//! extension. Relative directories are resolved against the directory of the
//! file they were read from.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::kernel::constants::{DEFAULT_METADATA_DIR, DEFAULT_PLUGIN_DIR, FRAMEWORK_VERSION};
use crate::kernel::error::{Error, Result};
use crate::plugin_system::manager::EngineOptions;
use crate::plugin_system::version::FrameworkVersion;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }
}

/// Permission catalogue additions and initial grants
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionSettings {
    /// Extra permissions to register, name -> description
    pub catalogue: BTreeMap<String, String>,
    /// Permissions granted at startup, plugin id -> names
    pub grants: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub framework_version: FrameworkVersion,
    pub plugin_dir: PathBuf,
    pub metadata_dir: PathBuf,
    /// Plugins activated when the host starts
    pub autostart: Vec<String>,
    pub permissions: PermissionSettings,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            framework_version: FrameworkVersion::parse(FRAMEWORK_VERSION)
                .unwrap_or(FrameworkVersion::new(1, 0, 0)),
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            metadata_dir: PathBuf::from(DEFAULT_METADATA_DIR),
            autostart: Vec::new(),
            permissions: PermissionSettings::default(),
        }
    }
}

impl HostConfig {
    /// Reads a config file; relative directories become relative to it.
    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| Error::UnsupportedConfigFormat {
            path: path.to_path_buf(),
        })?;
        let text = fs::read_to_string(path).map_err(|source| Error::Io {
            operation: "read config".to_string(),
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text, format).map_err(|e| match e {
            Error::Config { message, .. } => Error::config(Some(path.to_path_buf()), message),
            other => other,
        })?;

        if let Some(base) = path.parent() {
            config.plugin_dir = rebase(base, &config.plugin_dir);
            config.metadata_dir = rebase(base, &config.metadata_dir);
        }
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("Config file {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn parse(text: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Json => serde_json::from_str(text).map_err(|e| Error::config(None, e.to_string())),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(text).map_err(|e| Error::config(None, e.to_string())),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(text).map_err(|e| Error::config(None, e.to_string())),
        }
    }

    pub fn serialize(&self, format: ConfigFormat) -> Result<String> {
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self).map_err(|e| Error::config(None, e.to_string())),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(self).map_err(|e| Error::config(None, e.to_string())),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|e| Error::config(None, e.to_string())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| Error::UnsupportedConfigFormat {
            path: path.to_path_buf(),
        })?;
        let text = self.serialize(format)?;
        fs::write(path, text).map_err(|source| Error::Io {
            operation: "write config".to_string(),
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            framework_version: self.framework_version,
            plugin_dir: self.plugin_dir.clone(),
            metadata_dir: self.metadata_dir.clone(),
        }
    }
}

fn rebase(base: &Path, dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        base.join(dir)
    }
}
