//! Benana host runtime library.
//!
//! Exposes the plugin runtime, configuration, and HTTP surface so the
//! `benana` binary and integration tests share one implementation.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod plugin;
pub mod routes;
pub mod state;
