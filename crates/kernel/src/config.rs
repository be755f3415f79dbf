//! Configuration loaded from environment variables.
//!
//! Every setting is read from a `BENANA_`-prefixed variable. `DATABASE_URL`
//! is also honoured unprefixed so sqlx tooling and the server share one
//! setting.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const ENV_PREFIX: &str = "BENANA_";

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 3000).
    pub port: u16,

    /// PostgreSQL connection URL. Built from the `DB_*` parts when not
    /// given directly.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Path to plugins directory (default: plugins).
    pub plugins_dir: PathBuf,

    /// Bearer token required on `/admin` routes. Unset leaves them open.
    pub admin_token: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let exe_dir = env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf));

        Self::from_lookup(|key| env::var(key).ok(), &cwd, exe_dir.as_deref())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F, cwd: &Path, exe_dir: Option<&Path>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        let port = var("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .context("BENANA_PORT must be a valid u16")?;

        let database_url = match var("DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            Some(url) => url,
            None => {
                let host = var("DB_HOST").unwrap_or_else(|| "localhost".to_string());
                let db_port: u16 = var("DB_PORT")
                    .unwrap_or_else(|| "5432".to_string())
                    .parse()
                    .context("BENANA_DB_PORT must be a valid u16")?;
                let user = var("DB_USER").unwrap_or_else(|| "benana_user".to_string());
                let password = var("DB_PASSWORD").unwrap_or_else(|| "benana_password".to_string());
                let name = var("DB_NAME").unwrap_or_else(|| "benana".to_string());
                format!("postgres://{user}:{password}@{host}:{db_port}/{name}")
            }
        };

        let database_max_connections = var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .context("BENANA_DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let raw_plugins_dir = var("PLUGINS_DIR").unwrap_or_else(|| "plugins".to_string());
        let plugins_dir = resolve_plugins_dir(Path::new(&raw_plugins_dir), cwd, exe_dir);

        let admin_token = var("ADMIN_TOKEN");

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            plugins_dir,
            admin_token,
        })
    }
}

/// Resolve a configured plugins directory to an absolute path.
///
/// Relative paths are tried against the working directory, the
/// executable's directory, then the working directory's parent; the first
/// that exists wins. When none exists the working directory is used, so
/// installs create the directory where the operator expects it.
pub fn resolve_plugins_dir(raw: &Path, cwd: &Path, exe_dir: Option<&Path>) -> PathBuf {
    if raw.is_absolute() {
        return raw.to_path_buf();
    }

    let mut candidates = vec![cwd.join(raw)];
    if let Some(exe_dir) = exe_dir {
        candidates.push(exe_dir.join(raw));
    }
    if let Some(parent) = cwd.parent() {
        candidates.push(parent.join(raw));
    }

    candidates
        .into_iter()
        .find(|c| c.is_dir())
        .unwrap_or_else(|| cwd.join(raw))
}
