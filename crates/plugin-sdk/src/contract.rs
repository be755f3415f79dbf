//! The plugin contract.
//!
//! A plugin is any type implementing [`Plugin`]. The host learns nothing
//! about a plugin beyond these entry points: it asks for metadata, runs the
//! plugin's migrations, calls the lifecycle hooks, and mounts the routes the
//! plugin registers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgConnection;

use crate::permissions::{Permission, PermissionRegistry};
use crate::routes::RouteTable;
use crate::services::ServiceRegistry;

/// Zero-argument constructor the host resolves for each plugin package.
///
/// Every call must return a fresh instance.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Capabilities injected into lifecycle hooks.
///
/// Plugins only reach the registries they are handed here; there is no
/// global lookup.
#[derive(Debug, Clone)]
pub struct PluginContext {
    plugin: String,
    services: Arc<ServiceRegistry>,
    permissions: Arc<PermissionRegistry>,
}

impl PluginContext {
    pub fn new(
        plugin: impl Into<String>,
        services: Arc<ServiceRegistry>,
        permissions: Arc<PermissionRegistry>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            services,
            permissions,
        }
    }

    /// Name of the plugin this context was built for.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn permissions(&self) -> &PermissionRegistry {
        &self.permissions
    }
}

/// The capability set every plugin implements.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Machine name. Must match the package directory name.
    fn name(&self) -> &str;

    /// Version string recorded in the plugin table on every load.
    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Core plugins are flagged in the plugin table.
    fn is_core(&self) -> bool {
        false
    }

    /// Locate the migrations directory given the installed package root.
    fn migrations_dir(&self, plugin_root: &Path) -> PathBuf;

    /// Called after migrations, before routes are collected.
    fn on_load(&self, ctx: &PluginContext) -> anyhow::Result<()>;

    /// Populate the plugin's route table.
    fn register_routes(&self, routes: &mut RouteTable);

    /// Permissions this plugin declares.
    fn permissions(&self) -> Vec<Permission> {
        Vec::new()
    }

    /// Optional seed writes. Runs inside a transaction the host rolls back
    /// on error; a failing seed never blocks the load.
    async fn seed(&self, _conn: &mut PgConnection) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the plugin is unloaded. Errors are logged, never fatal.
    fn on_unload(&self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }
}
