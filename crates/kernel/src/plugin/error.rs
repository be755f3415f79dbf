//! Plugin system error types with clear, actionable messages.
//!
//! All errors include the plugin name and relevant context to help
//! operators quickly identify and fix issues.

use thiserror::Error;

/// Errors that can occur while discovering, loading, migrating, or
/// installing plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No package directory with an entry file exists for this name.
    #[error("plugin '{plugin}': not found in plugins directory {path}")]
    NotFound { plugin: String, path: String },

    /// Plugin directory is missing its `<name>.info.toml` entry file.
    #[error("plugin '{plugin}': no {plugin}.info.toml manifest found in {path}")]
    MissingManifest { plugin: String, path: String },

    /// The manifest could not be parsed or failed validation.
    #[error("plugin '{plugin}': invalid manifest: {details}")]
    InvalidManifest { plugin: String, details: String },

    /// The manifest names a factory the host was not built with.
    #[error(
        "plugin '{plugin}': missing plugin factory '{factory}'. Known factories: {known}"
    )]
    FactoryNotFound {
        plugin: String,
        factory: String,
        known: String,
    },

    /// The constructed plugin reports a different name than its package.
    #[error("plugin '{plugin}': factory built a plugin named '{reported}'")]
    NameMismatch { plugin: String, reported: String },

    /// An applied migration file changed on disk.
    #[error(
        "plugin '{plugin}': checksum mismatch for migration '{migration}' (drift detected): recorded {recorded}, found {actual}"
    )]
    ChecksumDrift {
        plugin: String,
        migration: String,
        recorded: String,
        actual: String,
    },

    /// Migration SQL could not be read or executed.
    #[error("plugin '{plugin}': migration '{migration}' failed: {details}")]
    MigrationFailed {
        plugin: String,
        migration: String,
        details: String,
    },

    /// Rollback was requested for a migration without a `.down.sql` file.
    #[error("plugin '{plugin}': down migration not found for '{migration}': expected {path}")]
    MissingDownMigration {
        plugin: String,
        migration: String,
        path: String,
    },

    /// A required lifecycle hook returned an error or panicked.
    #[error("plugin '{plugin}': {hook} hook failed: {details}")]
    HookFailed {
        plugin: String,
        hook: &'static str,
        details: String,
    },

    /// The uploaded archive is not a supported format.
    #[error("unsupported plugin archive '{file_name}': only .zip uploads are supported")]
    UnsupportedArchive { file_name: String },

    /// An archive entry would land outside the staging directory.
    #[error("invalid archive path: {entry}")]
    UnsafeArchivePath { entry: String },

    /// The archive could not be read.
    #[error("invalid plugin archive: {details}")]
    InvalidArchive { details: String },

    /// Archives must contain exactly one plugin root.
    #[error("archive must contain exactly one plugin root with a <name>.info.toml, found {found}")]
    PluginRootCount { found: usize },

    /// Disable was requested for a plugin with no durable record.
    #[error("plugin '{plugin}' has never been loaded, so there is nothing to disable")]
    NeverLoaded { plugin: String },

    /// The destination plugin directory already exists.
    #[error("plugin '{plugin}' already exists")]
    AlreadyExists { plugin: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Create a missing factory error listing what the catalog does contain.
    pub fn factory_not_found(
        plugin: impl Into<String>,
        factory: impl Into<String>,
        known: &[&str],
    ) -> Self {
        Self::FactoryNotFound {
            plugin: plugin.into(),
            factory: factory.into(),
            known: if known.is_empty() {
                "(none)".to_string()
            } else {
                known.join(", ")
            },
        }
    }

    /// Create a hook failure error.
    pub fn hook_failed(
        plugin: impl Into<String>,
        hook: &'static str,
        details: impl Into<String>,
    ) -> Self {
        Self::HookFailed {
            plugin: plugin.into(),
            hook,
            details: details.into(),
        }
    }

    /// Whether the error stems from caller input rather than host failure.
    ///
    /// Used by the admin API to choose between 4xx and 5xx responses.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::MissingManifest { .. }
                | Self::InvalidManifest { .. }
                | Self::FactoryNotFound { .. }
                | Self::NameMismatch { .. }
                | Self::UnsupportedArchive { .. }
                | Self::UnsafeArchivePath { .. }
                | Self::InvalidArchive { .. }
                | Self::PluginRootCount { .. }
                | Self::AlreadyExists { .. }
                | Self::NeverLoaded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_error_lists_known_factories() {
        let err = PluginError::factory_not_found("ghost", "ghost", &["powertable", "reports"]);
        let msg = err.to_string();
        assert!(msg.contains("missing plugin factory 'ghost'"));
        assert!(msg.contains("powertable, reports"));
    }

    #[test]
    fn drift_error_names_plugin_and_migration() {
        let err = PluginError::ChecksumDrift {
            plugin: "alpha".to_string(),
            migration: "0001_init".to_string(),
            recorded: "aaa".to_string(),
            actual: "bbb".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("alpha"));
        assert!(msg.contains("0001_init"));
        assert!(msg.contains("drift detected"));
    }

    #[test]
    fn archive_errors_are_client_errors() {
        assert!(
            PluginError::UnsafeArchivePath {
                entry: "../../etc/passthrough".to_string()
            }
            .is_client_error()
        );
        assert!(PluginError::PluginRootCount { found: 2 }.is_client_error());
        assert!(
            !PluginError::MigrationFailed {
                plugin: "a".to_string(),
                migration: "0001".to_string(),
                details: "syntax".to_string(),
            }
            .is_client_error()
        );
    }
}
