//! Plugin status tracking.
//!
//! Manages the `plugins` table, which records every plugin that has been
//! loaded at least once, its reported metadata, and whether it is durably
//! active or disabled. Also owns the bootstrap of both plugin tables.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Advisory lock key held while creating the plugin tables.
const BOOTSTRAP_LOCK_KEY: i64 = 0x6265_6e61_6e61;

const BOOTSTRAP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS plugins (
    id UUID PRIMARY KEY,
    name VARCHAR(255) NOT NULL UNIQUE,
    version VARCHAR(100) NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    is_core BOOLEAN NOT NULL DEFAULT FALSE,
    status VARCHAR(20) NOT NULL DEFAULT 'active',
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS plugin_migrations (
    id BIGSERIAL PRIMARY KEY,
    plugin VARCHAR(255) NOT NULL,
    migration_id VARCHAR(255) NOT NULL,
    checksum VARCHAR(128) NOT NULL,
    applied_at BIGINT NOT NULL,
    CONSTRAINT uq_plugin_migration UNIQUE (plugin, migration_id)
);
"#;

/// Durable plugin status, independent of whether the plugin is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Active,
    Disabled,
}

impl PluginStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown plugin status '{other}'")),
        }
    }
}

/// A row from the `plugins` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PluginRecord {
    pub id: Uuid,
    pub name: String,
    pub version: String,
    pub description: String,
    pub is_core: bool,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PluginRecord {
    /// Parsed status. Unknown values are treated as disabled so a corrupt
    /// row never causes an unexpected load.
    pub fn status(&self) -> PluginStatus {
        self.status.parse().unwrap_or(PluginStatus::Disabled)
    }
}

/// Metadata written on every successful load.
#[derive(Debug, Clone)]
pub struct PluginMetadata<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub description: &'a str,
    pub is_core: bool,
}

/// Create the `plugins` and `plugin_migrations` tables if missing.
///
/// Serialized with an advisory lock so processes starting together do not
/// race on the catalog.
pub async fn bootstrap(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(BOOTSTRAP_LOCK_KEY)
        .execute(&mut *tx)
        .await?;
    sqlx::raw_sql(BOOTSTRAP_SQL).execute(&mut *tx).await?;
    tx.commit().await
}

/// Get all plugin records, sorted by name.
pub async fn get_all(pool: &PgPool) -> Result<Vec<PluginRecord>, sqlx::Error> {
    sqlx::query_as::<_, PluginRecord>(
        "SELECT id, name, version, description, is_core, status, created_at, updated_at \
         FROM plugins ORDER BY name",
    )
    .fetch_all(pool)
    .await
}

/// Get a single plugin record.
pub async fn get(pool: &PgPool, name: &str) -> Result<Option<PluginRecord>, sqlx::Error> {
    sqlx::query_as::<_, PluginRecord>(
        "SELECT id, name, version, description, is_core, status, created_at, updated_at \
         FROM plugins WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await
}

/// Insert a new record as active, or refresh an existing one and force it
/// back to active.
pub async fn upsert_active(pool: &PgPool, meta: &PluginMetadata<'_>) -> Result<(), sqlx::Error> {
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        "INSERT INTO plugins (id, name, version, description, is_core, status, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
         ON CONFLICT (name) DO UPDATE SET \
             version = EXCLUDED.version, \
             description = EXCLUDED.description, \
             is_core = EXCLUDED.is_core, \
             status = EXCLUDED.status, \
             updated_at = EXCLUDED.updated_at",
    )
    .bind(Uuid::now_v7())
    .bind(meta.name)
    .bind(meta.version)
    .bind(meta.description)
    .bind(meta.is_core)
    .bind(PluginStatus::Active.as_str())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Set a plugin's durable status.
///
/// Returns `false` when the plugin has never been loaded (no record).
pub async fn set_status(
    pool: &PgPool,
    name: &str,
    status: PluginStatus,
) -> Result<bool, sqlx::Error> {
    let now = chrono::Utc::now().timestamp();

    let result = sqlx::query("UPDATE plugins SET status = $1, updated_at = $2 WHERE name = $3")
        .bind(status.as_str())
        .bind(now)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        assert_eq!("active".parse(), Ok(PluginStatus::Active));
        assert_eq!("disabled".parse(), Ok(PluginStatus::Disabled));
        assert!("inactive".parse::<PluginStatus>().is_err());
        assert_eq!(PluginStatus::Disabled.to_string(), "disabled");
    }

    #[test]
    fn unknown_stored_status_reads_as_disabled() {
        let record = PluginRecord {
            id: Uuid::nil(),
            name: "alpha".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
            is_core: false,
            status: "inactive".to_string(),
            created_at: 0,
            updated_at: 0,
        };
        assert_eq!(record.status(), PluginStatus::Disabled);
    }
}
