//! Benana test utilities.
//!
//! Helpers for integration testing: on-disk plugin package fixtures,
//! archive builders, unique plugin names, and an optional database pool.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::path::{Path, PathBuf};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tempfile::TempDir;
use uuid::Uuid;

/// A plugin name no other test run will use.
///
/// Plugin rows and tables outlive a test, so database-backed tests never
/// share names.
pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7().simple())
}

/// Connect to `DATABASE_URL`, or `None` when it is not set.
///
/// Database-backed tests return early on `None` so the suite still runs
/// without PostgreSQL.
pub async fn test_pool() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("DATABASE_URL is set but the database is unreachable");
    Some(pool)
}

/// A temporary plugins directory populated with package fixtures.
#[derive(Debug)]
pub struct PluginsDir {
    dir: TempDir,
}

impl Default for PluginsDir {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginsDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create plugins dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create a package whose manifest holds only its name.
    pub fn add_plugin(&self, name: &str) -> PathBuf {
        self.add_plugin_with_manifest(name, &format!("name = \"{name}\"\n"))
    }

    /// Create a package with a custom manifest body.
    pub fn add_plugin_with_manifest(&self, name: &str, manifest: &str) -> PathBuf {
        let root = self.dir.path().join(name);
        std::fs::create_dir_all(root.join("migrations")).unwrap();
        std::fs::write(root.join(format!("{name}.info.toml")), manifest).unwrap();
        root
    }

    /// Write (or overwrite) `migrations/<file_name>` in a package.
    pub fn write_migration(&self, plugin: &str, file_name: &str, sql: &str) -> PathBuf {
        let path = self.dir.path().join(plugin).join("migrations").join(file_name);
        std::fs::write(&path, sql).unwrap();
        path
    }

    /// Delete a package directory.
    pub fn remove_plugin(&self, name: &str) {
        std::fs::remove_dir_all(self.dir.path().join(name)).unwrap();
    }
}

/// Build an in-memory zip archive from `(path, content)` entries.
pub fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Encode a single-file `multipart/form-data` body.
///
/// Returns the content type header value and the body bytes.
pub fn multipart_file(field: &str, file_name: &str, data: &[u8]) -> (String, Vec<u8>) {
    let boundary = format!("benana-{}", Uuid::now_v7().simple());
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/zip\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

/// Assertion helpers for JSON responses.
pub mod assert {
    use serde_json::Value;

    /// Assert that a JSON value has a specific key.
    pub fn has_key(value: &Value, key: &str) {
        assert!(
            value.get(key).is_some(),
            "Expected JSON to have key '{key}', got: {value}"
        );
    }

    /// Assert that a JSON array of strings contains `needle`.
    pub fn array_contains(value: &Value, needle: &str) {
        let found = value
            .as_array()
            .is_some_and(|items| items.iter().any(|v| v == needle));
        assert!(found, "Expected {value} to contain \"{needle}\"");
    }

    /// Assert that a string contains a substring.
    pub fn contains(haystack: &str, needle: &str) {
        assert!(
            haystack.contains(needle),
            "Expected string to contain '{needle}'\nActual: {haystack}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names_are_valid_and_distinct() {
        let a = unique_name("alpha");
        let b = unique_name("alpha");
        assert_ne!(a, b);
        assert!(a.starts_with("alpha_"));
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn plugins_dir_builds_packages() {
        let dir = PluginsDir::new();
        let root = dir.add_plugin("alpha");
        dir.write_migration("alpha", "0001_init.sql", "SELECT 1;");

        assert!(root.join("alpha.info.toml").is_file());
        assert!(root.join("migrations/0001_init.sql").is_file());

        dir.remove_plugin("alpha");
        assert!(!root.exists());
    }

    #[test]
    fn multipart_body_wraps_file() {
        let (content_type, body) = multipart_file("file", "alpha.zip", b"PK");
        assert!(content_type.starts_with("multipart/form-data; boundary=benana-"));
        let text = String::from_utf8_lossy(&body);
        assert::contains(&text, "name=\"file\"; filename=\"alpha.zip\"");
    }

    #[test]
    fn json_assertions() {
        let value = serde_json::json!({"loaded": ["alpha", "beta"]});
        assert::has_key(&value, "loaded");
        assert::array_contains(&value["loaded"], "beta");
    }
}
