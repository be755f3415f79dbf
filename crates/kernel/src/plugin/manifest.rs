//! Parser for plugin `<name>.info.toml` manifest files.
//!
//! The manifest is a package's entry file. Its presence marks a directory as
//! a plugin root, and it names the factory the host resolves to build the
//! plugin instance:
//! - name (must match the directory name)
//! - description, informational version
//! - factory (catalog key, defaults to the name)
//! - dependencies (plugins autoload brings up first)

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::error::PluginError;

/// Suffix of the manifest file inside each plugin directory.
pub const MANIFEST_SUFFIX: &str = ".info.toml";

/// Plugin metadata parsed from `<name>.info.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    /// Plugin machine name (must match the directory name).
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Package version. The plugin's own `version()` is authoritative.
    #[serde(default)]
    pub version: Option<String>,

    /// Catalog key of the factory that builds this plugin.
    #[serde(default)]
    pub factory: Option<String>,

    /// Other plugins this one expects to be loaded first.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Path of the manifest for a plugin directory named `name`.
pub fn manifest_path(plugin_dir: &Path, name: &str) -> PathBuf {
    plugin_dir.join(format!("{name}{MANIFEST_SUFFIX}"))
}

/// Whether `dir` is a plugin root: a directory holding `<dirname>.info.toml`.
pub fn is_plugin_root(dir: &Path) -> bool {
    let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    dir.is_dir() && manifest_path(dir, name).is_file()
}

impl PluginManifest {
    /// Load the manifest of the plugin directory `plugin_dir`.
    pub fn load(plugin_dir: &Path) -> Result<Self, PluginError> {
        let name = plugin_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let path = manifest_path(plugin_dir, &name);

        if !path.is_file() {
            return Err(PluginError::MissingManifest {
                plugin: name,
                path: plugin_dir.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(&path)?;
        Self::parse_str(&content, &name)
    }

    /// Parse a manifest for the directory named `dir_name`.
    pub fn parse_str(content: &str, dir_name: &str) -> Result<Self, PluginError> {
        let manifest: PluginManifest =
            toml::from_str(content).map_err(|e| PluginError::InvalidManifest {
                plugin: dir_name.to_string(),
                details: e.to_string(),
            })?;

        manifest.validate(dir_name)?;
        Ok(manifest)
    }

    /// Catalog key for this plugin's factory.
    pub fn factory_key(&self) -> &str {
        self.factory.as_deref().unwrap_or(&self.name)
    }

    fn validate(&self, dir_name: &str) -> Result<(), PluginError> {
        let invalid = |details: String| PluginError::InvalidManifest {
            plugin: dir_name.to_string(),
            details,
        };

        if self.name.is_empty() {
            return Err(invalid("empty 'name' field".to_string()));
        }

        if self.name != dir_name {
            return Err(invalid(format!(
                "name '{}' does not match directory '{dir_name}'",
                self.name
            )));
        }

        if !is_valid_plugin_name(&self.name) {
            return Err(invalid(format!(
                "name '{}' may only contain ASCII letters, digits, and underscores",
                self.name
            )));
        }

        if self.dependencies.iter().any(|d| d == &self.name) {
            return Err(invalid("plugin lists itself as a dependency".to_string()));
        }

        Ok(())
    }
}

/// Plugin names double as directory names and URL segments.
pub fn is_valid_plugin_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_manifest() {
        let toml = r#"
name = "reports"
description = "Reports plugin"
version = "0.1.0"
factory = "reports_v2"
dependencies = ["powertable"]
"#;

        let manifest = PluginManifest::parse_str(toml, "reports").unwrap();
        assert_eq!(manifest.name, "reports");
        assert_eq!(manifest.version.as_deref(), Some("0.1.0"));
        assert_eq!(manifest.factory_key(), "reports_v2");
        assert_eq!(manifest.dependencies, vec!["powertable"]);
    }

    #[test]
    fn parse_minimal_manifest() {
        let manifest = PluginManifest::parse_str(r#"name = "alpha""#, "alpha").unwrap();
        assert_eq!(manifest.factory_key(), "alpha");
        assert!(manifest.description.is_empty());
        assert!(manifest.dependencies.is_empty());
    }

    #[test]
    fn reject_name_not_matching_directory() {
        let err = PluginManifest::parse_str(r#"name = "alpha""#, "beta").unwrap_err();
        assert!(err.to_string().contains("does not match directory"));
    }

    #[test]
    fn reject_empty_name() {
        let err = PluginManifest::parse_str(r#"name = """#, "").unwrap_err();
        assert!(err.to_string().contains("empty 'name'"));
    }

    #[test]
    fn reject_self_dependency() {
        let toml = r#"
name = "alpha"
dependencies = ["alpha"]
"#;
        let err = PluginManifest::parse_str(toml, "alpha").unwrap_err();
        assert!(err.to_string().contains("itself"));
    }

    #[test]
    fn reject_malformed_toml() {
        let err = PluginManifest::parse_str("name = ", "alpha").unwrap_err();
        assert!(matches!(err, PluginError::InvalidManifest { .. }));
    }

    #[test]
    fn plugin_name_charset() {
        assert!(is_valid_plugin_name("sample_reports2"));
        assert!(!is_valid_plugin_name("../etc"));
        assert!(!is_valid_plugin_name("has-dash"));
        assert!(!is_valid_plugin_name(""));
    }

    #[test]
    fn load_reports_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("alpha");
        std::fs::create_dir_all(&plugin_dir).unwrap();

        assert!(!is_plugin_root(&plugin_dir));
        let err = PluginManifest::load(&plugin_dir).unwrap_err();
        assert!(matches!(err, PluginError::MissingManifest { .. }));

        std::fs::write(manifest_path(&plugin_dir, "alpha"), r#"name = "alpha""#).unwrap();
        assert!(is_plugin_root(&plugin_dir));
        assert_eq!(PluginManifest::load(&plugin_dir).unwrap().name, "alpha");
    }
}
