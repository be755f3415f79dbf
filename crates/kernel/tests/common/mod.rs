#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Tests drive the real plugin manager against PostgreSQL. Fixture plugins
//! are built by closures registered in a per-test catalog, so every test
//! uses plugin names of its own and tests can run in parallel against one
//! database.
//!
//! Database-backed tests call [`TestHost::setup`] and return early when
//! `DATABASE_URL` is not set.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::routing::get;
use benana_kernel::plugin::{MountTable, PluginCatalog, PluginManager, status};
use benana_sdk::{
    Permission, PermissionRegistry, Plugin, PluginContext, RouteTable, ServiceRegistry,
};
use benana_test_utils::PluginsDir;
use sqlx::{Executor, PgConnection, PgPool};

/// Knobs for a fixture plugin's behaviour.
#[derive(Debug, Clone, Default)]
pub struct FixtureSpec {
    /// Permission actions; each becomes `<name>:<action>`.
    pub permissions: Vec<&'static str>,
    /// SQL run by the seed hook before it decides whether to fail.
    pub seed_sql: Option<String>,
    pub seed_fails: bool,
    pub seed_panics: bool,
    pub on_load_fails: bool,
    pub unload_panics: bool,
    pub routes_panic: bool,
    /// Service registered under this key on load, unregistered on unload.
    pub service: Option<String>,
}

/// A configurable plugin used throughout the integration tests.
pub struct FixturePlugin {
    name: String,
    spec: FixtureSpec,
}

#[async_trait]
impl Plugin for FixturePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "integration test fixture"
    }

    fn migrations_dir(&self, plugin_root: &Path) -> PathBuf {
        plugin_root.join("migrations")
    }

    fn on_load(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        if self.spec.on_load_fails {
            anyhow::bail!("fixture refused to load");
        }
        if let Some(key) = &self.spec.service {
            ctx.services().register(key.clone(), self.name.clone());
        }
        Ok(())
    }

    fn register_routes(&self, routes: &mut RouteTable) {
        if self.spec.routes_panic {
            panic!("fixture route table is broken");
        }
        routes.route("/ping", get(|| async { "pong" }));
    }

    fn permissions(&self) -> Vec<Permission> {
        self.spec
            .permissions
            .iter()
            .map(|action| Permission::new(format!("{}:{action}", self.name)))
            .collect()
    }

    async fn seed(&self, conn: &mut PgConnection) -> anyhow::Result<()> {
        if let Some(sql) = &self.spec.seed_sql {
            (&mut *conn).execute(sqlx::raw_sql(sql)).await?;
        }
        if self.spec.seed_fails {
            anyhow::bail!("fixture seed exploded");
        }
        if self.spec.seed_panics {
            panic!("fixture seed panicked");
        }
        Ok(())
    }

    fn on_unload(&self, ctx: &PluginContext) -> anyhow::Result<()> {
        if let Some(key) = &self.spec.service {
            ctx.services().unregister(key);
        }
        if self.spec.unload_panics {
            panic!("fixture panicked while unloading");
        }
        Ok(())
    }
}

/// A plugins directory, a catalog of fixture factories, and a database.
pub struct TestHost {
    pub pool: PgPool,
    pub dir: PluginsDir,
    pub catalog: PluginCatalog,
}

impl TestHost {
    /// Connect and bootstrap, or `None` without `DATABASE_URL`.
    pub async fn setup() -> Option<Self> {
        let pool = benana_test_utils::test_pool().await?;
        status::bootstrap(&pool).await.unwrap();
        Some(Self {
            pool,
            dir: PluginsDir::new(),
            catalog: PluginCatalog::new(),
        })
    }

    /// Add a package on disk and a matching factory in the catalog.
    ///
    /// Returns a counter of how many instances the factory has built.
    pub fn add_fixture(&mut self, name: &str, spec: FixtureSpec) -> Arc<AtomicUsize> {
        self.dir.add_plugin(name);
        self.register_fixture(name, spec)
    }

    /// Register a factory without creating a package.
    pub fn register_fixture(&mut self, name: &str, spec: FixtureSpec) -> Arc<AtomicUsize> {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let name = name.to_string();
        self.catalog.register(name.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(FixturePlugin {
                name: name.clone(),
                spec: spec.clone(),
            }) as Box<dyn Plugin>
        });
        built
    }

    /// A fresh manager with empty registries, as after a process restart.
    pub fn manager(&self) -> PluginManager {
        PluginManager::new(
            self.pool.clone(),
            self.dir.path(),
            self.catalog.clone(),
            Arc::new(ServiceRegistry::new()),
            Arc::new(PermissionRegistry::new()),
            Arc::new(MountTable::new()),
        )
    }

    /// Whether a relation exists in the current database.
    pub async fn table_exists(&self, table: &str) -> bool {
        sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub async fn count_rows(&self, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

/// A pool that never connects, for tests that must not reach the database.
pub fn lazy_pool() -> PgPool {
    sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://nobody@localhost:1/none")
        .unwrap()
}
