//! Plugin migration engine.
//!
//! Reads `<id>_<label>.sql` files from a plugin's migrations directory,
//! tracks which have been applied (with a SHA-256 checksum) in the
//! `plugin_migrations` table, and runs pending migrations inside a single
//! per-plugin transaction. Reverts use the matching `<id>.down.sql` file.
//!
//! File names are the only sequencing mechanism: ids are applied in
//! lexicographic order, so they must be chosen to sort in execution order.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{Executor, FromRow, PgPool};
use tracing::{debug, info};

use super::error::PluginError;

const SQL_SUFFIX: &str = ".sql";
const DOWN_SUFFIX: &str = ".down";

/// A row from the `plugin_migrations` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MigrationRecord {
    pub id: i64,
    pub plugin: String,
    pub migration_id: String,
    pub checksum: String,
    pub applied_at: i64,
}

/// A forward migration file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub id: String,
    pub path: PathBuf,
}

/// Applies, verifies, and reverts per-plugin schema changes.
#[derive(Debug, Clone)]
pub struct MigrationEngine {
    pool: PgPool,
}

impl MigrationEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply every migration in `migrations_dir` not yet recorded for
    /// `plugin`.
    ///
    /// All files are checksummed against the tracking table first; any
    /// mismatch aborts with [`PluginError::ChecksumDrift`] before a single
    /// statement runs. Pending files and their tracking rows then commit in
    /// one transaction, or not at all.
    ///
    /// Returns the ids applied by this call.
    pub async fn apply_pending(
        &self,
        plugin: &str,
        migrations_dir: &Path,
    ) -> Result<Vec<String>, PluginError> {
        let pending = self.verify(plugin, migrations_dir).await?;

        if pending.is_empty() {
            debug!(plugin, "no pending migrations");
            return Ok(Vec::new());
        }

        info!(plugin, count = pending.len(), "running pending migrations");

        let mut tx = self.pool.begin().await?;
        let now = chrono::Utc::now().timestamp();
        let mut newly_applied = Vec::with_capacity(pending.len());

        for migration in &pending {
            debug!(plugin, migration = %migration.file.id, "executing migration");

            // raw_sql, not query(): migration files hold multiple statements
            // and prepared statements only accept one.
            (&mut *tx)
                .execute(sqlx::raw_sql(&migration.sql))
                .await
                .map_err(|e| PluginError::MigrationFailed {
                    plugin: plugin.to_string(),
                    migration: migration.file.id.clone(),
                    details: e.to_string(),
                })?;

            sqlx::query(
                "INSERT INTO plugin_migrations (plugin, migration_id, checksum, applied_at) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(plugin)
            .bind(&migration.file.id)
            .bind(&migration.checksum)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            newly_applied.push(migration.file.id.clone());
        }

        tx.commit().await?;

        info!(plugin, applied = newly_applied.len(), "migrations complete");
        Ok(newly_applied)
    }

    /// Ids that [`MigrationEngine::apply_pending`] would run, after drift
    /// verification. Executes nothing.
    pub async fn pending(
        &self,
        plugin: &str,
        migrations_dir: &Path,
    ) -> Result<Vec<String>, PluginError> {
        Ok(self
            .verify(plugin, migrations_dir)
            .await?
            .into_iter()
            .map(|m| m.file.id)
            .collect())
    }

    /// Revert the `steps` most recently applied migrations, newest first.
    ///
    /// Each step runs its `.down.sql` and deletes its tracking row in its own
    /// transaction. A missing down file stops the call; steps already
    /// reverted stay reverted.
    pub async fn rollback_last(
        &self,
        plugin: &str,
        migrations_dir: &Path,
        steps: usize,
    ) -> Result<Vec<String>, PluginError> {
        if steps == 0 {
            return Ok(Vec::new());
        }

        let applied = self.list_applied(plugin).await?;
        let mut rolled_back = Vec::new();

        for record in applied.into_iter().take(steps) {
            let Some(down_path) = find_down_file(migrations_dir, &record.migration_id) else {
                return Err(PluginError::MissingDownMigration {
                    plugin: plugin.to_string(),
                    path: down_file_path(migrations_dir, &record.migration_id)
                        .display()
                        .to_string(),
                    migration: record.migration_id,
                });
            };

            let sql = std::fs::read_to_string(&down_path).map_err(|e| {
                PluginError::MigrationFailed {
                    plugin: plugin.to_string(),
                    migration: record.migration_id.clone(),
                    details: format!("failed to read {}: {e}", down_path.display()),
                }
            })?;

            let mut tx = self.pool.begin().await?;

            (&mut *tx)
                .execute(sqlx::raw_sql(&sql))
                .await
                .map_err(|e| PluginError::MigrationFailed {
                    plugin: plugin.to_string(),
                    migration: record.migration_id.clone(),
                    details: e.to_string(),
                })?;

            sqlx::query("DELETE FROM plugin_migrations WHERE id = $1")
                .bind(record.id)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            info!(plugin, migration = %record.migration_id, "rolled back migration");
            rolled_back.push(record.migration_id);
        }

        Ok(rolled_back)
    }

    /// Applied migrations for `plugin`, newest first.
    pub async fn list_applied(&self, plugin: &str) -> Result<Vec<MigrationRecord>, PluginError> {
        // Migrations applied in one batch share `applied_at`; the serial id
        // preserves their insertion order.
        let rows = sqlx::query_as::<_, MigrationRecord>(
            "SELECT id, plugin, migration_id, checksum, applied_at FROM plugin_migrations \
             WHERE plugin = $1 ORDER BY applied_at DESC, id DESC",
        )
        .bind(plugin)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Read every forward file, compare against recorded checksums, and
    /// return the ones not yet applied.
    async fn verify(
        &self,
        plugin: &str,
        migrations_dir: &Path,
    ) -> Result<Vec<PendingMigration>, PluginError> {
        let files = list_migration_files(migrations_dir)?;
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let applied = self.list_applied(plugin).await?;
        let mut pending = Vec::new();

        for file in files {
            let bytes = std::fs::read(&file.path).map_err(|e| PluginError::MigrationFailed {
                plugin: plugin.to_string(),
                migration: file.id.clone(),
                details: format!("failed to read file: {e}"),
            })?;
            let checksum = checksum(&bytes);

            if let Some(record) = applied.iter().find(|r| r.migration_id == file.id) {
                if record.checksum != checksum {
                    return Err(PluginError::ChecksumDrift {
                        plugin: plugin.to_string(),
                        migration: file.id,
                        recorded: record.checksum.clone(),
                        actual: checksum,
                    });
                }
                continue;
            }

            let sql = String::from_utf8(bytes).map_err(|e| PluginError::MigrationFailed {
                plugin: plugin.to_string(),
                migration: file.id.clone(),
                details: format!("file is not valid UTF-8: {e}"),
            })?;

            pending.push(PendingMigration {
                file,
                checksum,
                sql,
            });
        }

        Ok(pending)
    }
}

struct PendingMigration {
    file: MigrationFile,
    checksum: String,
    sql: String,
}

/// Hex-encoded SHA-256 of a migration file's bytes.
pub fn checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Whether `file_name` is a revert file (`<id>.down.sql`, any case).
pub fn is_down_file(file_name: &str) -> bool {
    strip_sql_suffix(file_name).and_then(strip_down_suffix).is_some()
}

/// Migration id for a file name: the name without `.sql` and `.down`.
pub fn migration_id(file_name: &str) -> Option<&str> {
    let stem = strip_sql_suffix(file_name)?;
    Some(strip_down_suffix(stem).unwrap_or(stem))
}

/// Expected path of the revert file for `id`, used when none exists.
pub fn down_file_path(migrations_dir: &Path, id: &str) -> PathBuf {
    migrations_dir.join(format!("{id}{DOWN_SUFFIX}{SQL_SUFFIX}"))
}

/// Locate the revert file for `id`, matching suffixes case-insensitively.
pub fn find_down_file(migrations_dir: &Path, id: &str) -> Option<PathBuf> {
    let exact = down_file_path(migrations_dir, id);
    if exact.is_file() {
        return Some(exact);
    }

    std::fs::read_dir(migrations_dir)
        .ok()?
        .filter_map(Result::ok)
        .find(|entry| {
            entry.file_type().is_ok_and(|t| t.is_file())
                && entry.file_name().to_str().is_some_and(|name| {
                    is_down_file(name) && migration_id(name) == Some(id)
                })
        })
        .map(|entry| entry.path())
}

/// Forward migration files in `dir`, sorted by id.
///
/// A missing directory means the plugin has no migrations.
pub fn list_migration_files(dir: &Path) -> Result<Vec<MigrationFile>, PluginError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if is_down_file(file_name) {
            continue;
        }
        let Some(id) = migration_id(file_name) else {
            continue;
        };

        files.push(MigrationFile {
            id: id.to_string(),
            path: entry.path(),
        });
    }

    files.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(files)
}

fn strip_sql_suffix(file_name: &str) -> Option<&str> {
    let split = file_name.len().checked_sub(SQL_SUFFIX.len())?;
    let (stem, suffix) = (file_name.get(..split)?, file_name.get(split..)?);
    (suffix.eq_ignore_ascii_case(SQL_SUFFIX) && !stem.is_empty()).then_some(stem)
}

fn strip_down_suffix(stem: &str) -> Option<&str> {
    let split = stem.len().checked_sub(DOWN_SUFFIX.len())?;
    let (id, suffix) = (stem.get(..split)?, stem.get(split..)?);
    (suffix.eq_ignore_ascii_case(DOWN_SUFFIX) && !id.is_empty()).then_some(id)
}
