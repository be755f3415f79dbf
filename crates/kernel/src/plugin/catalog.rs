//! Catalog of plugin factories compiled into the host.
//!
//! A package's manifest names a factory key; the catalog maps that key to
//! the zero-argument constructor that builds a fresh plugin instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use benana_sdk::{Plugin, PluginFactory};

/// Factory key → constructor.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: BTreeMap<String, PluginFactory>,
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("factories", &self.keys())
            .finish()
    }
}

impl PluginCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The plugins shipped with this host build.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register("powertable", powertable::plugin);
        catalog.register("reports", reports::plugin);
        catalog
    }

    /// Add or replace a factory.
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
        self
    }

    /// Look up a factory by key.
    pub fn factory(&self, key: &str) -> Option<PluginFactory> {
        self.factories.get(key).cloned()
    }

    /// Build a fresh instance through the factory registered under `key`.
    pub fn instantiate(&self, key: &str) -> Option<Box<dyn Plugin>> {
        self.factory(key).map(|factory| factory())
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_builds_shipped_plugins() {
        let catalog = PluginCatalog::builtin();
        assert_eq!(catalog.keys(), vec!["powertable", "reports"]);

        let plugin = catalog.instantiate("powertable").unwrap();
        assert_eq!(plugin.name(), "powertable");
        assert!(catalog.instantiate("ghost").is_none());
    }

    #[test]
    fn register_replaces_existing_key() {
        let mut catalog = PluginCatalog::new();
        catalog.register("reports", powertable::plugin);
        catalog.register("reports", reports::plugin);

        let plugin = catalog.instantiate("reports").unwrap();
        assert_eq!(plugin.name(), "reports");
        assert_eq!(catalog.keys(), vec!["reports"]);
    }
}
