//! Plugin manifest model and parsing.
//!
//! Every plugin directory carries a `plugin.toml` describing identity,
//! declared dependencies, requested permissions, and capability tags. The
//! manifest is the source of truth for *who a plugin is*; the registered
//! entry point (see [`crate::plugin::traits`]) is the source of its code.

use crate::plugin::security::Capability;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// File name of the manifest inside each plugin directory.
pub const MANIFEST_FILE: &str = "plugin.toml";

/// Maximum length of a plugin name slug.
const MAX_NAME_LEN: usize = 64;

/// Static plugin description loaded from `plugin.toml`.
///
/// Immutable once read; discovery re-reads it from disk on every
/// (non-cached) scan pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin name slug (`[a-z0-9][a-z0-9_-]*`)
    pub name: String,

    /// Plugin version
    pub version: Version,

    /// Short human-readable description
    #[serde(default)]
    pub description: String,

    /// Plugin author
    #[serde(default)]
    pub author: String,

    /// Names of plugins that must be installed before this one
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Capabilities the plugin requests from the security policy
    #[serde(default)]
    pub permissions: HashSet<Capability>,

    /// Free-form capability markers used by peer subsystems to discover
    /// providers (e.g. `sms_channel`)
    #[serde(default)]
    pub tags: HashSet<String>,

    /// Constraints the host must satisfy before the plugin can be enabled
    #[serde(default)]
    pub requirements: HostRequirements,
}

/// Minimum host runtime constraints declared by a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRequirements {
    /// Host version requirement, checked at enable time
    #[serde(default = "any_version")]
    pub min_host_version: VersionReq,
}

fn any_version() -> VersionReq {
    VersionReq::STAR
}

impl Default for HostRequirements {
    fn default() -> Self {
        Self { min_host_version: any_version() }
    }
}

/// Manifest loading and validation errors.
#[derive(Error, Debug, Clone)]
pub enum ManifestError {
    /// The TOML document failed to deserialize
    #[error("Manifest parse error: {0}")]
    Parse(String),

    /// The plugin name is not a valid slug
    #[error("Invalid plugin name {name:?}: {reason}")]
    InvalidName {
        /// The rejected name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// The plugin lists itself as a dependency
    #[error("Plugin cannot depend on itself: {name}")]
    SelfDependency {
        /// The offending plugin name
        name: String,
    },
}

/// Wrapper matching the `[plugin]` table of a manifest file.
#[derive(Debug, Deserialize)]
struct ManifestFile {
    plugin: PluginManifest,
}

impl PluginManifest {
    /// Parse and validate a manifest from TOML text.
    pub fn load_str(text: &str) -> Result<Self, ManifestError> {
        let file: ManifestFile =
            toml::from_str(text).map_err(|e| ManifestError::Parse(e.to_string()))?;
        file.plugin.validate()?;
        Ok(file.plugin)
    }

    /// Validate name slug and dependency sanity.
    pub fn validate(&self) -> Result<(), ManifestError> {
        validate_slug(&self.name)?;
        if self.dependencies.iter().any(|d| d == &self.name) {
            return Err(ManifestError::SelfDependency { name: self.name.clone() });
        }
        Ok(())
    }

    /// Whether the manifest carries the given capability tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Check that a name is a valid plugin slug.
fn validate_slug(name: &str) -> Result<(), ManifestError> {
    if name.is_empty() {
        return Err(ManifestError::InvalidName { name: name.into(), reason: "empty" });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ManifestError::InvalidName { name: name.into(), reason: "too long" });
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or('-');
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return Err(ManifestError::InvalidName {
            name: name.into(),
            reason: "must start with a lowercase letter or digit",
        });
    }
    if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_') {
        return Err(ManifestError::InvalidName {
            name: name.into(),
            reason: "only lowercase letters, digits, '-' and '_' are allowed",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_MANIFEST: &str = r#"
        [plugin]
        name = "sms-aliyun"
        version = "1.2.0"
        description = "Aliyun SMS channel provider"
        author = "Trellis Team"
        dependencies = ["wallet"]
        permissions = ["network_client"]
        tags = ["sms_channel"]

        [plugin.requirements]
        min_host_version = ">=1.4.0"
    "#;

    #[test]
    fn parses_full_manifest() {
        let manifest = PluginManifest::load_str(FULL_MANIFEST).unwrap();
        assert_eq!(manifest.name, "sms-aliyun");
        assert_eq!(manifest.version, Version::new(1, 2, 0));
        assert_eq!(manifest.dependencies, vec!["wallet".to_string()]);
        assert!(manifest.permissions.contains(&Capability::NetworkClient));
        assert!(manifest.has_tag("sms_channel"));
        assert!(manifest.requirements.min_host_version.matches(&Version::new(1, 4, 2)));
        assert!(!manifest.requirements.min_host_version.matches(&Version::new(1, 3, 0)));
    }

    #[test]
    fn minimal_manifest_defaults() {
        let manifest = PluginManifest::load_str(
            r#"
            [plugin]
            name = "hello"
            version = "0.1.0"
        "#,
        )
        .unwrap();
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.tags.is_empty());
        // No requirement means any host version is fine.
        assert!(manifest.requirements.min_host_version.matches(&Version::new(0, 0, 1)));
    }

    #[test]
    fn missing_name_is_a_parse_error() {
        let result = PluginManifest::load_str(
            r#"
            [plugin]
            version = "0.1.0"
        "#,
        );
        assert!(matches!(result, Err(ManifestError::Parse(_))));
    }

    #[test]
    fn rejects_bad_slugs() {
        for bad in ["", "Uppercase", "has space", "-leading-dash", "日本語"] {
            let result = PluginManifest::load_str(&format!(
                "[plugin]\nname = {bad:?}\nversion = \"0.1.0\"\n"
            ));
            assert!(result.is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn rejects_self_dependency() {
        let result = PluginManifest::load_str(
            r#"
            [plugin]
            name = "loop"
            version = "0.1.0"
            dependencies = ["loop"]
        "#,
        );
        assert!(matches!(result, Err(ManifestError::SelfDependency { .. })));
    }
}
