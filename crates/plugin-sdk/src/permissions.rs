//! Permission declarations and the registry that collects them.

use dashmap::DashMap;
use serde::Serialize;

/// A plugin-owned capability flag, e.g. `reports:view`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Permission {
    /// Globally namespaced key, conventionally `"<plugin>:<action>"`.
    pub key: String,
    /// Human-readable description.
    pub description: Option<String>,
}

impl Permission {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Plugin name → declared permissions.
///
/// Each plugin's list is replaced wholesale when it loads.
#[derive(Debug, Default)]
pub struct PermissionRegistry {
    permissions: DashMap<String, Vec<Permission>>,
}

impl PermissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the permission list for `plugin`.
    pub fn register(&self, plugin: impl Into<String>, permissions: Vec<Permission>) {
        self.permissions.insert(plugin.into(), permissions);
    }

    /// Drop everything `plugin` declared.
    pub fn unregister(&self, plugin: &str) {
        self.permissions.remove(plugin);
    }

    /// Permissions declared by `plugin`, or an empty list.
    pub fn list_for_plugin(&self, plugin: &str) -> Vec<Permission> {
        self.permissions
            .get(plugin)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Every `(plugin, permission)` pair across all plugins.
    ///
    /// Order follows map iteration and is not stable.
    pub fn list_all(&self) -> Vec<(String, Permission)> {
        self.permissions
            .iter()
            .flat_map(|entry| {
                let plugin = entry.key().clone();
                entry
                    .value()
                    .iter()
                    .map(move |perm| (plugin.clone(), perm.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn register_replaces_previous_list() {
        let registry = PermissionRegistry::new();
        registry.register(
            "powertable",
            vec![
                Permission::new("powertable:view"),
                Permission::new("powertable:edit"),
            ],
        );
        registry.register("powertable", vec![Permission::new("powertable:view")]);

        let perms = registry.list_for_plugin("powertable");
        assert_eq!(perms, vec![Permission::new("powertable:view")]);
    }

    #[test]
    fn unknown_plugin_has_no_permissions() {
        let registry = PermissionRegistry::new();
        assert!(registry.list_for_plugin("ghost").is_empty());
    }

    #[test]
    fn list_all_flattens_every_plugin() {
        let registry = PermissionRegistry::new();
        registry.register(
            "reports",
            vec![Permission::new("reports:view").with_description("View reports")],
        );
        registry.register(
            "powertable",
            vec![
                Permission::new("powertable:view"),
                Permission::new("powertable:edit"),
            ],
        );

        let mut all: Vec<(String, String)> = registry
            .list_all()
            .into_iter()
            .map(|(plugin, perm)| (plugin, perm.key))
            .collect();
        all.sort();

        assert_eq!(
            all,
            vec![
                ("powertable".to_string(), "powertable:edit".to_string()),
                ("powertable".to_string(), "powertable:view".to_string()),
                ("reports".to_string(), "reports:view".to_string()),
            ]
        );
    }

    #[test]
    fn unregister_removes_plugin_list() {
        let registry = PermissionRegistry::new();
        registry.register("reports", vec![Permission::new("reports:view")]);
        registry.unregister("reports");
        assert!(registry.list_all().is_empty());
    }
}
