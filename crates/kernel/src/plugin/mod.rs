//! Plugin system for Benana.
//!
//! This module handles:
//! - Parsing plugin manifests from `.info.toml` files
//! - Resolving compiled plugin factories from the catalog
//! - Per-plugin schema migrations with drift detection and rollback
//! - The load/unload/disable/reload lifecycle and startup autoload
//! - Mounting plugin routes and installing uploaded packages

pub mod catalog;
pub mod cli;
pub mod dependency;
mod error;
pub mod install;
pub mod manager;
pub mod manifest;
pub mod migration;
pub mod mount;
pub mod status;

pub use catalog::PluginCatalog;
pub use dependency::{LoadPlan, UnmetDependency, plan_load_order};
pub use error::PluginError;
pub use manager::{AutoloadReport, LoadedPlugin, PluginManager};
pub use manifest::PluginManifest;
pub use migration::{MigrationEngine, MigrationRecord};
pub use mount::MountTable;
pub use status::{PluginRecord, PluginStatus};
