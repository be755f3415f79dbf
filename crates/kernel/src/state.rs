//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use benana_sdk::{PermissionRegistry, ServiceRegistry};
use sqlx::PgPool;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::plugin::{MountTable, PluginCatalog, PluginManager};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// PostgreSQL connection pool.
    db: PgPool,

    /// Plugin lifecycle manager. Owns the registries and mount table.
    plugins: Arc<PluginManager>,

    /// Bearer token required on admin routes, if any.
    admin_token: Option<String>,
}

impl AppState {
    /// Connect to the database, prepare the schema, and build the plugin
    /// manager with the compiled-in catalog. No plugin is loaded yet.
    pub async fn new(config: &Config) -> Result<Self> {
        let pool = db::create_pool(config).await?;
        info!("connected to PostgreSQL");

        db::prepare_schema(&pool).await?;
        info!("host migrations applied and plugin tables ready");

        let manager = build_manager(pool.clone(), config);
        Ok(Self::from_parts(pool, Arc::new(manager), config.admin_token.clone()))
    }

    /// Assemble state from already-built parts.
    pub fn from_parts(
        db: PgPool,
        plugins: Arc<PluginManager>,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                db,
                plugins,
                admin_token,
            }),
        }
    }

    pub fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.inner.plugins
    }

    pub fn mounts(&self) -> Arc<MountTable> {
        self.inner.plugins.mounts().clone()
    }

    pub fn admin_token(&self) -> Option<&str> {
        self.inner.admin_token.as_deref()
    }

    /// Check if PostgreSQL is reachable.
    pub async fn postgres_healthy(&self) -> bool {
        db::check_health(&self.inner.db).await
    }
}

/// Build a plugin manager with fresh registries and the builtin catalog.
pub fn build_manager(pool: PgPool, config: &Config) -> PluginManager {
    PluginManager::new(
        pool,
        config.plugins_dir.clone(),
        PluginCatalog::builtin(),
        Arc::new(ServiceRegistry::new()),
        Arc::new(PermissionRegistry::new()),
        Arc::new(MountTable::new()),
    )
}

/// Connect and prepare the schema for CLI commands.
pub async fn connect_for_cli(config: &Config) -> Result<PluginManager> {
    let pool = db::create_pool(config)
        .await
        .context("failed to connect for plugin command")?;
    db::prepare_schema(&pool).await?;
    Ok(build_manager(pool, config))
}
