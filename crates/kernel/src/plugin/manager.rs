//! Plugin lifecycle manager.
//!
//! Owns the in-memory table of loaded plugins and drives every state
//! change: discovery, load, unload, disable, reload, and startup autoload.
//! Durable state lives in the `plugins` and `plugin_migrations` tables.
//!
//! Lifecycle operations are serialized by one async mutex, which also
//! guards the cache of resolved factories. Request handling only reads the
//! loaded table and the mount table and never waits on that mutex.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use benana_sdk::{Plugin, PluginContext, PluginFactory, PermissionRegistry, RouteTable, ServiceRegistry};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::catalog::PluginCatalog;
use super::dependency::plan_load_order;
use super::error::PluginError;
use super::install;
use super::manifest::{PluginManifest, is_plugin_root, is_valid_plugin_name};
use super::migration::{MigrationEngine, MigrationRecord};
use super::mount::MountTable;
use super::status::{self, PluginMetadata, PluginRecord, PluginStatus};

/// A plugin currently loaded in this process.
#[derive(Clone)]
pub struct LoadedPlugin {
    pub plugin: Arc<dyn Plugin>,
    /// Catalog key the instance was built from.
    pub factory: String,
    /// Installed package directory.
    pub root: PathBuf,
    /// Paths registered in the plugin's route table.
    pub routes: Vec<String>,
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("name", &self.plugin.name())
            .field("version", &self.plugin.version())
            .field("factory", &self.factory)
            .field("root", &self.root)
            .field("routes", &self.routes)
            .finish()
    }
}

/// Outcome of [`PluginManager::autoload_active`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct AutoloadReport {
    pub loaded: Vec<String>,
    pub skipped_disabled: Vec<String>,
    pub missing: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Plugins attempted although a declared dependency was not loaded.
    pub unmet_dependencies: Vec<(String, String)>,
}

/// A package resolved to its manifest and compiled factory.
#[derive(Clone)]
struct Resolution {
    manifest: PluginManifest,
    factory: PluginFactory,
    root: PathBuf,
}

/// State guarded by the lifecycle lock.
#[derive(Default)]
struct Lifecycle {
    resolved: HashMap<String, Resolution>,
}

/// Orchestrates plugin discovery and lifecycle.
pub struct PluginManager {
    pool: PgPool,
    plugins_dir: PathBuf,
    catalog: PluginCatalog,
    migrations: MigrationEngine,
    services: Arc<ServiceRegistry>,
    permissions: Arc<PermissionRegistry>,
    mounts: Arc<MountTable>,
    loaded: RwLock<BTreeMap<String, LoadedPlugin>>,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins_dir", &self.plugins_dir)
            .field("catalog", &self.catalog.keys())
            .field("loaded", &self.loaded_names())
            .finish()
    }
}

impl PluginManager {
    pub fn new(
        pool: PgPool,
        plugins_dir: impl Into<PathBuf>,
        catalog: PluginCatalog,
        services: Arc<ServiceRegistry>,
        permissions: Arc<PermissionRegistry>,
        mounts: Arc<MountTable>,
    ) -> Self {
        Self {
            migrations: MigrationEngine::new(pool.clone()),
            pool,
            plugins_dir: plugins_dir.into(),
            catalog,
            services,
            permissions,
            mounts,
            loaded: RwLock::new(BTreeMap::new()),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn permissions(&self) -> &Arc<PermissionRegistry> {
        &self.permissions
    }

    pub fn mounts(&self) -> &Arc<MountTable> {
        &self.mounts
    }

    pub fn migrations(&self) -> &MigrationEngine {
        &self.migrations
    }

    /// Names of installed plugin packages, sorted.
    ///
    /// A package is a subdirectory of the plugins directory holding its
    /// `<name>.info.toml`. A missing plugins directory yields no plugins.
    pub fn discover(&self) -> Vec<String> {
        if !self.plugins_dir.is_dir() {
            debug!(dir = %self.plugins_dir.display(), "plugins directory does not exist");
            return Vec::new();
        }

        let entries = match std::fs::read_dir(&self.plugins_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.plugins_dir.display(), error = %e, "failed to read plugins directory");
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|path| is_plugin_root(path))
            .filter_map(|path| path.file_name().and_then(|n| n.to_str()).map(String::from))
            .collect();
        names.sort();
        names
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.read().contains_key(name)
    }

    /// Loaded plugin names, sorted.
    pub fn loaded_names(&self) -> Vec<String> {
        self.loaded.read().keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<LoadedPlugin> {
        self.loaded.read().get(name).cloned()
    }

    /// Load a plugin. Loading an already loaded plugin is a no-op.
    pub async fn load(&self, name: &str) -> Result<(), PluginError> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.load_locked(&mut lifecycle, name).await
    }

    /// Unload a plugin. Durable status is left as it is.
    pub async fn unload(&self, name: &str) {
        let _lifecycle = self.lifecycle.lock().await;
        self.unload_locked(name);
    }

    /// Mark a plugin disabled so autoload skips it, then unload it.
    ///
    /// A plugin that has never loaded has no record to mark, so nothing
    /// durable changes and [`PluginError::NeverLoaded`] is returned.
    pub async fn disable(&self, name: &str) -> Result<(), PluginError> {
        let _lifecycle = self.lifecycle.lock().await;
        if !status::set_status(&self.pool, name, PluginStatus::Disabled).await? {
            warn!(plugin = %name, "disable requested for plugin that has never loaded");
            self.unload_locked(name);
            return Err(PluginError::NeverLoaded {
                plugin: name.to_string(),
            });
        }
        self.unload_locked(name);
        info!(plugin = %name, "plugin disabled");
        Ok(())
    }

    /// Unload, forget the resolved factory, and load from scratch.
    pub async fn reload(&self, name: &str) -> Result<(), PluginError> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.unload_locked(name);
        lifecycle.resolved.remove(name);
        self.load_locked(&mut lifecycle, name).await?;
        info!(plugin = %name, "plugin reloaded");
        Ok(())
    }

    /// Load every installed plugin that is not durably disabled.
    ///
    /// Plugin failures never abort the batch: each is logged and reported,
    /// and the remaining plugins still load. Only a failure to read the
    /// plugin table is returned as an error.
    pub async fn autoload_active(&self) -> Result<AutoloadReport, PluginError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let mut report = AutoloadReport::default();

        let discovered = self.discover();
        let records: HashMap<String, PluginRecord> = status::get_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();

        for record in records.values() {
            if record.status() == PluginStatus::Active && !discovered.contains(&record.name) {
                warn!(plugin = %record.name, "active plugin has no package directory, skipping");
                report.missing.push(record.name.clone());
            }
        }
        report.missing.sort();

        let already_loaded: BTreeSet<String> = self.loaded_names().into_iter().collect();
        let mut candidates: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for name in discovered {
            if already_loaded.contains(&name) {
                continue;
            }
            if records
                .get(&name)
                .is_some_and(|r| r.status() == PluginStatus::Disabled)
            {
                debug!(plugin = %name, "plugin is disabled, skipping");
                report.skipped_disabled.push(name);
                continue;
            }
            match self.resolve(&mut lifecycle, &name) {
                Ok(resolution) => {
                    candidates.insert(name, resolution.manifest.dependencies);
                }
                Err(e) => {
                    warn!(plugin = %name, error = %e, "failed to resolve plugin, skipping");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        let plan = plan_load_order(&candidates, &already_loaded);
        for (name, reason) in plan.unmet {
            warn!(plugin = %name, reason = %reason, "dependency unmet, loading anyway");
            report.unmet_dependencies.push((name, reason.to_string()));
        }

        for name in plan.order {
            match self.load_locked(&mut lifecycle, &name).await {
                Ok(()) => report.loaded.push(name),
                Err(e) => {
                    warn!(plugin = %name, error = %e, "failed to load plugin, skipping");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            disabled = report.skipped_disabled.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            "autoload complete"
        );
        Ok(report)
    }

    /// Unload every loaded plugin, for process shutdown.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let names = self.loaded_names();
        for name in names.iter().rev() {
            self.unload_locked(name);
        }
        info!(count = names.len(), "all plugins unloaded");
    }

    /// Extract an uploaded archive into the plugins directory and load the
    /// plugin it contains.
    pub async fn install(&self, file_name: &str, data: Vec<u8>) -> Result<String, PluginError> {
        let plugins_dir = self.plugins_dir.clone();
        let file_name_owned = file_name.to_string();
        let name = tokio::task::spawn_blocking(move || {
            install::install_archive(&plugins_dir, &file_name_owned, &data)
        })
        .await
        .map_err(|e| PluginError::Io(std::io::Error::other(e)))??;

        self.load(&name).await?;
        Ok(name)
    }

    /// Apply pending migrations without loading the plugin.
    pub async fn migrate(&self, name: &str) -> Result<Vec<String>, PluginError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let dir = self.migrations_dir_for(&mut lifecycle, name)?;
        self.migrations.apply_pending(name, &dir).await
    }

    /// Migration ids that would run on the next load, after drift checks.
    pub async fn pending_migrations(&self, name: &str) -> Result<Vec<String>, PluginError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let dir = self.migrations_dir_for(&mut lifecycle, name)?;
        self.migrations.pending(name, &dir).await
    }

    /// Revert the plugin's `steps` most recent migrations.
    pub async fn rollback(&self, name: &str, steps: usize) -> Result<Vec<String>, PluginError> {
        let mut lifecycle = self.lifecycle.lock().await;
        let dir = self.migrations_dir_for(&mut lifecycle, name)?;
        self.migrations.rollback_last(name, &dir, steps).await
    }

    /// Applied migrations for the plugin, newest first.
    pub async fn applied_migrations(&self, name: &str) -> Result<Vec<MigrationRecord>, PluginError> {
        self.migrations.list_applied(name).await
    }

    /// Durable records of every plugin ever loaded.
    pub async fn records(&self) -> Result<Vec<PluginRecord>, PluginError> {
        Ok(status::get_all(&self.pool).await?)
    }

    pub async fn record(&self, name: &str) -> Result<Option<PluginRecord>, PluginError> {
        Ok(status::get(&self.pool, name).await?)
    }

    async fn load_locked(&self, lifecycle: &mut Lifecycle, name: &str) -> Result<(), PluginError> {
        if self.is_loaded(name) {
            debug!(plugin = %name, "plugin already loaded");
            return Ok(());
        }

        let resolution = self.resolve(lifecycle, name)?;
        let plugin: Arc<dyn Plugin> = Arc::from((resolution.factory)());
        if plugin.name() != name {
            return Err(PluginError::NameMismatch {
                plugin: name.to_string(),
                reported: plugin.name().to_string(),
            });
        }

        for dep in &resolution.manifest.dependencies {
            if !self.is_loaded(dep) {
                warn!(plugin = %name, dependency = %dep, "declared dependency is not loaded");
            }
        }

        let migrations_dir = plugin.migrations_dir(&resolution.root);
        self.migrations.apply_pending(name, &migrations_dir).await?;

        status::upsert_active(
            &self.pool,
            &PluginMetadata {
                name,
                version: plugin.version(),
                description: plugin.description(),
                is_core: plugin.is_core(),
            },
        )
        .await?;

        let ctx = self.context(name);
        guarded(name, "on_load", || plugin.on_load(&ctx))?;

        let routes = match self.activate(name, plugin.as_ref()) {
            Ok(routes) => routes,
            Err(e) => {
                self.deactivate(name, plugin.as_ref());
                return Err(e);
            }
        };

        self.run_seed(name, plugin.as_ref()).await;

        self.loaded.write().insert(
            name.to_string(),
            LoadedPlugin {
                plugin: plugin.clone(),
                factory: resolution.manifest.factory_key().to_string(),
                root: resolution.root,
                routes,
            },
        );

        info!(plugin = %name, version = %plugin.version(), "plugin loaded");
        Ok(())
    }

    /// Mount the plugin's routes and register its permissions. Returns the
    /// registered route paths.
    fn activate(&self, name: &str, plugin: &dyn Plugin) -> Result<Vec<String>, PluginError> {
        let mut table = RouteTable::new();
        guarded(name, "register_routes", || {
            plugin.register_routes(&mut table);
            Ok(())
        })?;
        let routes = table.paths().to_vec();
        self.mounts.mount(name, table.into_router());

        self.permissions.register(name, plugin.permissions());
        Ok(routes)
    }

    /// Undo everything a successful on-load may have left in shared state.
    /// The on-unload hook is best-effort.
    fn deactivate(&self, name: &str, plugin: &dyn Plugin) {
        self.mounts.unmount(name);
        self.permissions.unregister(name);

        let ctx = self.context(name);
        if let Err(e) = guarded(name, "on_unload", || plugin.on_unload(&ctx)) {
            warn!(plugin = %name, hook = "on_unload", error = %e, "unload hook failed, plugin removed anyway");
        }
    }

    /// Remove a plugin from the process. Never fails: the entry is removed
    /// whatever the on-unload hook does.
    fn unload_locked(&self, name: &str) {
        let Some(entry) = self.loaded.write().remove(name) else {
            debug!(plugin = %name, "plugin not loaded");
            return;
        };

        self.deactivate(name, entry.plugin.as_ref());
        info!(plugin = %name, "plugin unloaded");
    }

    /// Run the seed hook in its own transaction. Errors and panics roll
    /// back and are logged; they never fail the load.
    async fn run_seed(&self, name: &str, plugin: &dyn Plugin) {
        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                warn!(plugin = %name, hook = "seed", error = %e, "could not start seed transaction");
                return;
            }
        };

        let outcome = AssertUnwindSafe(plugin.seed(&mut *tx))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(anyhow::anyhow!(
                    "panicked: {}",
                    panic_message(payload.as_ref())
                ))
            });

        match outcome {
            Ok(()) => {
                if let Err(e) = tx.commit().await {
                    warn!(plugin = %name, hook = "seed", error = %e, "failed to commit seed data");
                }
            }
            Err(e) => {
                let details = format!("{e:#}");
                warn!(plugin = %name, hook = "seed", error = %details, "seed failed, rolled back");
                if let Err(e) = tx.rollback().await {
                    warn!(plugin = %name, hook = "seed", error = %e, "failed to roll back seed transaction");
                }
            }
        }
    }

    fn context(&self, name: &str) -> PluginContext {
        PluginContext::new(name, self.services.clone(), self.permissions.clone())
    }

    /// Resolve a package name to its manifest and factory, caching the
    /// result until the next reload.
    fn resolve(&self, lifecycle: &mut Lifecycle, name: &str) -> Result<Resolution, PluginError> {
        if let Some(resolution) = lifecycle.resolved.get(name) {
            return Ok(resolution.clone());
        }

        let root = self.plugins_dir.join(name);
        if !is_valid_plugin_name(name) || !root.is_dir() {
            return Err(PluginError::NotFound {
                plugin: name.to_string(),
                path: self.plugins_dir.display().to_string(),
            });
        }

        let manifest = PluginManifest::load(&root)?;
        let factory = self
            .catalog
            .factory(manifest.factory_key())
            .ok_or_else(|| {
                PluginError::factory_not_found(name, manifest.factory_key(), &self.catalog.keys())
            })?;

        let resolution = Resolution {
            manifest,
            factory,
            root,
        };
        lifecycle
            .resolved
            .insert(name.to_string(), resolution.clone());
        Ok(resolution)
    }

    /// Migrations directory of a plugin, from the loaded instance if there
    /// is one, otherwise from a fresh instance.
    fn migrations_dir_for(&self, lifecycle: &mut Lifecycle, name: &str) -> Result<PathBuf, PluginError> {
        if let Some(entry) = self.get(name) {
            return Ok(entry.plugin.migrations_dir(&entry.root));
        }
        let resolution = self.resolve(lifecycle, name)?;
        let plugin = (resolution.factory)();
        Ok(plugin.migrations_dir(&resolution.root))
    }
}

/// Run a synchronous plugin hook, turning errors and panics into
/// [`PluginError::HookFailed`].
fn guarded<F>(plugin: &str, hook: &'static str, f: F) -> Result<(), PluginError>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PluginError::hook_failed(plugin, hook, format!("{e:#}"))),
        Err(payload) => Err(PluginError::hook_failed(
            plugin,
            hook,
            format!("panicked: {}", panic_message(payload.as_ref())),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
