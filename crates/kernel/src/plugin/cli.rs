//! CLI command implementations for plugin management.
//!
//! These commands build a plugin manager over the database pool without
//! starting the HTTP server. Nothing is loaded unless a command says so.

use std::collections::HashMap;

use anyhow::{Context, Result, bail};

use super::manager::PluginManager;
use super::status::PluginRecord;

/// List discovered plugins and their durable status.
pub async fn cmd_plugin_list(manager: &PluginManager) -> Result<()> {
    let discovered = manager.discover();
    let records = manager.records().await?;
    let record_map: HashMap<&str, &PluginRecord> =
        records.iter().map(|r| (r.name.as_str(), r)).collect();

    if discovered.is_empty() && records.is_empty() {
        println!("No plugins found in {}.", manager.plugins_dir().display());
        return Ok(());
    }

    println!(
        "{:<24} {:<12} {:<14} {:<10}",
        "PLUGIN", "VERSION", "STATUS", "MIGRATIONS"
    );
    println!("{}", "-".repeat(62));

    for name in &discovered {
        let applied = manager.applied_migrations(name).await?.len();
        match record_map.get(name.as_str()) {
            Some(record) => println!(
                "{:<24} {:<12} {:<14} {}",
                name, record.version, record.status, applied
            ),
            None => println!("{:<24} {:<12} {:<14} {}", name, "-", "never loaded", applied),
        }
    }

    for record in &records {
        if !discovered.contains(&record.name) {
            println!(
                "{:<24} {:<12} {:<14} ? (not on disk)",
                record.name, record.version, record.status
            );
        }
    }

    Ok(())
}

/// Apply pending migrations for one plugin without loading it.
pub async fn cmd_plugin_migrate(manager: &PluginManager, name: &str) -> Result<()> {
    let applied = manager
        .migrate(name)
        .await
        .with_context(|| format!("failed to migrate plugin '{name}'"))?;

    if applied.is_empty() {
        println!("No pending migrations for '{name}'.");
    } else {
        for id in &applied {
            println!("  applied: {id}");
        }
        println!("Applied {} migration(s) for '{name}'.", applied.len());
    }
    Ok(())
}

/// Revert the most recent migrations of one plugin.
pub async fn cmd_plugin_rollback(manager: &PluginManager, name: &str, steps: usize) -> Result<()> {
    if steps == 0 {
        bail!("--steps must be at least 1");
    }

    let reverted = manager
        .rollback(name, steps)
        .await
        .with_context(|| format!("failed to roll back plugin '{name}'"))?;

    if reverted.is_empty() {
        println!("No applied migrations for '{name}'.");
    } else {
        for id in &reverted {
            println!("  reverted: {id}");
        }
    }
    Ok(())
}

/// Show durable status and migration state of one plugin.
pub async fn cmd_plugin_status(manager: &PluginManager, name: &str) -> Result<()> {
    let on_disk = manager.discover().iter().any(|n| n == name);
    let record = manager.record(name).await?;

    if !on_disk && record.is_none() {
        bail!(
            "plugin '{name}' not found in {} and has never been loaded",
            manager.plugins_dir().display()
        );
    }

    println!("Plugin:   {name}");
    println!("On disk:  {}", if on_disk { "yes" } else { "no" });
    match &record {
        Some(r) => {
            println!("Version:  {}", r.version);
            println!("Status:   {}", r.status);
            if !r.description.is_empty() {
                println!("About:    {}", r.description);
            }
        }
        None => println!("Status:   never loaded"),
    }

    let applied = manager.applied_migrations(name).await?;
    println!("Applied migrations ({}):", applied.len());
    for m in applied.iter().rev() {
        println!("  {}  {}", m.migration_id, &m.checksum[..m.checksum.len().min(12)]);
    }

    if on_disk {
        let pending = manager
            .pending_migrations(name)
            .await
            .with_context(|| format!("failed to check migrations for '{name}'"))?;
        println!("Pending migrations ({}):", pending.len());
        for id in &pending {
            println!("  {id}");
        }
    }

    Ok(())
}

/// Durably disable a plugin so the next server start skips it.
pub async fn cmd_plugin_disable(manager: &PluginManager, name: &str) -> Result<()> {
    if manager.record(name).await?.is_none() {
        bail!("plugin '{name}' has never been loaded");
    }
    manager.disable(name).await?;
    println!("Plugin '{name}' disabled.");
    Ok(())
}
