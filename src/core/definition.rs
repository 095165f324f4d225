//! TOML package definitions.
//!
//! One catalog entry per package, loaded through [`load`] and validated
//! against the invariants the rest of the pipeline relies on.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::core::catalog::Catalog;

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("package not found: {0}")]
    NotFound(String),

    #[error("invalid package definition: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the source artifact is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    #[default]
    Tarball,
    Git,
}

/// Build system driving the configure/compile phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystem {
    #[default]
    Autotools,
    Cmake,
    Make,
    Custom,
}

impl fmt::Display for BuildSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildSystem::Autotools => "autotools",
            BuildSystem::Cmake => "cmake",
            BuildSystem::Make => "make",
            BuildSystem::Custom => "custom",
        };
        f.write_str(s)
    }
}

impl<'de> Deserialize<'de> for BuildSystem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.to_ascii_lowercase().as_str() {
            "autotools" => BuildSystem::Autotools,
            "cmake" => BuildSystem::Cmake,
            "make" => BuildSystem::Make,
            "custom" => BuildSystem::Custom,
            other => {
                tracing::warn!(build_system = other, "unknown build system, assuming autotools");
                BuildSystem::Autotools
            }
        })
    }
}

/// Declarative package record, one per catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageDefinition {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub maintainer: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub category: String,
    pub source_url: String,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub build_system: BuildSystem,
    #[serde(default)]
    pub build_cmd: String,
    #[serde(default)]
    pub install_cmd: String,
    #[serde(default)]
    pub configure_args: String,
    #[serde(default)]
    pub pre_build_cmd: String,
    #[serde(default)]
    pub post_install_cmd: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Host prerequisites checked before a build, never resolved.
    #[serde(default)]
    pub build_dependencies: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub size_estimate: Option<u64>,
    #[serde(default)]
    pub build_time_estimate: Option<u64>,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
}

impl PackageDefinition {
    /// Parse a definition from TOML text without touching the catalog.
    pub fn from_toml(text: &str) -> Result<Self, DefinitionError> {
        let def: PackageDefinition =
            toml::from_str(text).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        def.validate()?;
        Ok(def)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Enforce the record invariants.
    ///
    /// Name and version later flow into paths and argument vectors, so both
    /// reject control characters outright.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if !valid_name(&self.name) {
            return Err(DefinitionError::Parse(format!(
                "invalid package name '{}'",
                self.name
            )));
        }
        if self.version.is_empty() || self.version.chars().any(|c| c.is_control() || c == '/') {
            return Err(DefinitionError::Parse(format!(
                "invalid version '{}' for package '{}'",
                self.version, self.name
            )));
        }
        if self.source_url.is_empty() {
            return Err(DefinitionError::Parse(format!(
                "package '{}' has no source URL",
                self.name
            )));
        }
        let scheme_ok = ["http://", "https://", "ftp://"]
            .iter()
            .any(|s| self.source_url.starts_with(s));
        if !scheme_ok {
            return Err(DefinitionError::Parse(format!(
                "unsupported source URL scheme: {}",
                self.source_url
            )));
        }
        for (field, values) in [
            ("dependencies", &self.dependencies),
            ("build_dependencies", &self.build_dependencies),
            ("conflicts", &self.conflicts),
            ("provides", &self.provides),
        ] {
            if values.iter().any(|v| v.is_empty()) {
                return Err(DefinitionError::Parse(format!(
                    "package '{}' has an empty entry in {field}",
                    self.name
                )));
            }
        }
        if let Some(checksum) = &self.checksum {
            if checksum.is_empty() || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(DefinitionError::Parse(format!(
                    "package '{}' has a non-hex checksum",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// File name component of the source URL, used as the cache key.
    pub fn source_basename(&self) -> Result<&str, DefinitionError> {
        self.source_url
            .rsplit('/')
            .next()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                DefinitionError::Parse(format!(
                    "cannot determine file name from URL: {}",
                    self.source_url
                ))
            })
    }
}

/// Load and validate the catalog entry for `name`.
pub fn load(catalog: &Catalog, name: &str) -> Result<PackageDefinition, DefinitionError> {
    let path = catalog
        .locate(name)
        .ok_or_else(|| DefinitionError::NotFound(name.to_string()))?;
    load_path(&path)
}

/// Load and validate a definition from a specific file.
pub fn load_path(path: &Path) -> Result<PackageDefinition, DefinitionError> {
    let text = std::fs::read_to_string(path)?;
    PackageDefinition::from_toml(&text)
}
