use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Error type for version parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("Version string is empty")]
    Empty,
    #[error("Invalid version format: '{0}'")]
    InvalidFormat(String),
}

/// Ordered (major, minor, patch) triple used for plugin and framework versions.
///
/// Ordering is component-wise, so `1.10.0` sorts after `1.9.0`. Strict
/// semantic versions go through `semver`; pre-release and build metadata are
/// accepted but ignored for ordering. Shortened forms such as `"2"` or
/// `"1.4"` fill the missing components with zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameworkVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl FrameworkVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self { major, minor, patch }
    }

    /// Parses `1.2.3`, `1.2.3-beta+build`, `1.2` or `1`.
    pub fn parse(version: &str) -> Result<Self, VersionError> {
        let trimmed = version.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }
        if let Ok(v) = Version::parse(trimmed) {
            return Ok(Self::new(v.major, v.minor, v.patch));
        }

        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() > 2 {
            return Err(VersionError::InvalidFormat(trimmed.to_string()));
        }
        let mut numbers = [0u64; 2];
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part
                .parse::<u64>()
                .map_err(|_| VersionError::InvalidFormat(trimmed.to_string()))?;
        }
        Ok(Self::new(numbers[0], numbers[1], 0))
    }

    /// True when `self` is at least `minimum`.
    pub fn satisfies_minimum(&self, minimum: &FrameworkVersion) -> bool {
        self >= minimum
    }
}

impl FromStr for FrameworkVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FrameworkVersion::parse(s)
    }
}

impl fmt::Display for FrameworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for FrameworkVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FrameworkVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        FrameworkVersion::parse(&raw).map_err(serde::de::Error::custom)
    }
}
