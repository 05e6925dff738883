//! Plugin descriptors.
//!
//! A descriptor is the declarative record that backs a plugin id: identity,
//! dependencies, minimum framework version and required permissions. It is
//! read from a JSON object with camelCase keys:
//!
//! ```json
//! {
//!   "id": "backup",
//!   "name": "Backup",
//!   "version": "1.2.0",
//!   "vendor": "Example",
//!   "dependencies": ["storage"],
//!   "minFrameworkVersion": "1.0.0",
//!   "requiredPermissions": ["file.write"]
//! }
//! ```
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::kernel::constants::DEFAULT_MIN_FRAMEWORK_VERSION;
use crate::plugin_system::version::{FrameworkVersion, VersionError};

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed descriptor: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Descriptor must be a JSON object")]
    NotAnObject,
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),
    #[error("Invalid {field}: {source}")]
    InvalidVersion {
        field: &'static str,
        #[source]
        source: VersionError,
    },
    #[error("Descriptor id '{found}' does not match expected id '{expected}'")]
    IdMismatch { expected: String, found: String },
}

// --- Intermediate struct for deserialization ---

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawDescriptor {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    vendor: Option<String>,
    description: String,
    dependencies: Vec<String>,
    min_framework_version: Option<String>,
    category: String,
    icon_path: String,
    required_permissions: Vec<String>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, DescriptorError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(DescriptorError::MissingField(field)),
    }
}

/// Immutable plugin metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginDescriptor {
    id: String,
    name: String,
    /// Free-form; only the framework minimum is parsed.
    version: String,
    vendor: String,
    description: String,
    dependencies: Vec<String>,
    min_framework_version: FrameworkVersion,
    category: String,
    icon_path: String,
    required_permissions: BTreeSet<String>,
    metadata: Value,
}

impl PluginDescriptor {
    /// Parses a descriptor from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, DescriptorError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Builds a descriptor from an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, DescriptorError> {
        if !value.is_object() {
            return Err(DescriptorError::NotAnObject);
        }
        let raw: RawDescriptor = serde_json::from_value(value.clone())?;
        Self::from_raw(raw, value)
    }

    /// Reads and parses a descriptor file.
    pub fn from_file(path: &Path) -> Result<Self, DescriptorError> {
        let text = fs::read_to_string(path).map_err(|source| DescriptorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    fn from_raw(raw: RawDescriptor, metadata: Value) -> Result<Self, DescriptorError> {
        let id = required(raw.id, "id")?;
        let name = required(raw.name, "name")?;
        let version = required(raw.version, "version")?;
        let vendor = required(raw.vendor, "vendor")?;

        let min_text = raw
            .min_framework_version
            .unwrap_or_else(|| DEFAULT_MIN_FRAMEWORK_VERSION.to_string());
        let min_framework_version = FrameworkVersion::parse(&min_text).map_err(|source| {
            DescriptorError::InvalidVersion { field: "minFrameworkVersion", source }
        })?;

        Ok(Self {
            id,
            name,
            version,
            vendor,
            description: raw.description,
            dependencies: raw.dependencies,
            min_framework_version,
            category: raw.category,
            icon_path: raw.icon_path,
            required_permissions: raw.required_permissions.into_iter().collect(),
            metadata,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Dependency ids in declaration order.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn min_framework_version(&self) -> FrameworkVersion {
        self.min_framework_version
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn icon_path(&self) -> &str {
        &self.icon_path
    }

    pub fn required_permissions(&self) -> &BTreeSet<String> {
        &self.required_permissions
    }

    /// The JSON object this descriptor was built from.
    pub fn metadata_json(&self) -> &Value {
        &self.metadata
    }

    /// True when the running framework is at least the declared minimum.
    pub fn is_compatible_with(&self, framework: &FrameworkVersion) -> bool {
        framework.satisfies_minimum(&self.min_framework_version)
    }

    pub fn depends_on(&self, plugin_id: &str) -> bool {
        self.dependencies.iter().any(|d| d == plugin_id)
    }
}

/// Builder for descriptors created in code rather than read from disk.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    id: String,
    name: String,
    version: String,
    vendor: String,
    description: String,
    dependencies: Vec<String>,
    min_framework_version: String,
    category: String,
    icon_path: String,
    required_permissions: Vec<String>,
}

impl DescriptorBuilder {
    pub fn new(id: &str, name: &str, version: &str, vendor: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            vendor: vendor.to_string(),
            description: String::new(),
            dependencies: Vec::new(),
            min_framework_version: DEFAULT_MIN_FRAMEWORK_VERSION.to_string(),
            category: String::new(),
            icon_path: String::new(),
            required_permissions: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn dependency(mut self, plugin_id: &str) -> Self {
        self.dependencies.push(plugin_id.to_string());
        self
    }

    pub fn dependencies<I, S>(mut self, plugin_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(plugin_ids.into_iter().map(Into::into));
        self
    }

    pub fn min_framework_version(mut self, version: &str) -> Self {
        self.min_framework_version = version.to_string();
        self
    }

    pub fn category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn icon_path(mut self, icon_path: &str) -> Self {
        self.icon_path = icon_path.to_string();
        self
    }

    pub fn required_permission(mut self, permission: &str) -> Self {
        self.required_permissions.push(permission.to_string());
        self
    }

    /// Validates the collected fields exactly like a parsed descriptor.
    pub fn build(self) -> Result<PluginDescriptor, DescriptorError> {
        let value = json!({
            "id": self.id,
            "name": self.name,
            "version": self.version,
            "vendor": self.vendor,
            "description": self.description,
            "dependencies": self.dependencies,
            "minFrameworkVersion": self.min_framework_version,
            "category": self.category,
            "iconPath": self.icon_path,
            "requiredPermissions": self.required_permissions,
        });
        PluginDescriptor::from_value(value)
    }
}
