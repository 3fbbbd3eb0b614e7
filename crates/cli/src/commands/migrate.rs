use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tablet_orm::migrations::{MigrationStatus, MigrationStatusEntry};
use tablet_orm::{
    DatabasePool, MigrateTarget, MigrationManager, MigrationRunner, MigrationVersion, RollbackTarget,
};
use tracing::warn;

use crate::context::{connect, load_config};
use crate::GlobalArgs;

pub fn create(global: &GlobalArgs, name: &str) -> anyhow::Result<()> {
    let config = load_config(global)?;
    let manager = MigrationManager::with_config(config.migration_config());

    let path = manager.create_migration(name)?;
    println!("Created migration: {}", path.display());
    Ok(())
}

pub async fn run(global: &GlobalArgs, to: Option<MigrationVersion>) -> anyhow::Result<()> {
    let (runner, pool) = open_runner(global).await?;
    let target = to.map_or(MigrateTarget::Latest, MigrateTarget::Version);

    let outcome = runner.migrate(target).await;
    close(pool).await;
    let result = outcome?;

    if result.applied.is_empty() {
        println!("Nothing to migrate ({} already applied)", result.skipped_count);
    } else {
        for version in &result.applied {
            println!("Applied {} {}", version, unit_name(&runner, *version));
        }
        println!(
            "Applied {} migration(s) in {}ms",
            result.applied.len(),
            result.execution_time_ms
        );
    }
    Ok(())
}

pub async fn rollback(global: &GlobalArgs, to: Option<MigrationVersion>, all: bool) -> anyhow::Result<()> {
    let (runner, pool) = open_runner(global).await?;
    let target = match (to, all) {
        (_, true) => RollbackTarget::All,
        (Some(version), false) => RollbackTarget::Version(version),
        (None, false) => RollbackTarget::Previous,
    };

    let outcome = runner.rollback(target).await;
    close(pool).await;
    let result = outcome?;

    if result.reverted.is_empty() {
        println!("Nothing to roll back");
    } else {
        for version in &result.reverted {
            println!("Reverted {} {}", version, unit_name(&runner, *version));
        }
        println!(
            "Reverted {} migration(s) in {}ms",
            result.reverted.len(),
            result.execution_time_ms
        );
    }
    Ok(())
}

pub async fn status(global: &GlobalArgs, as_json: bool) -> anyhow::Result<()> {
    let (runner, pool) = open_runner(global).await?;
    let outcome = runner.status().await;
    close(pool).await;
    let entries = outcome?;

    if as_json {
        let rows: Vec<_> = entries.iter().map(status_json).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No migrations found");
        return Ok(());
    }

    println!("{:<16} {:<9} {:<25} NAME", "VERSION", "STATUS", "APPLIED AT");
    for entry in &entries {
        let (label, applied_at) = match &entry.status {
            MigrationStatus::Pending => ("pending", String::new()),
            MigrationStatus::Applied { applied_at } => ("applied", applied_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        };
        let name = if entry.definition_missing {
            format!("{} (file missing)", entry.name)
        } else {
            entry.name.clone()
        };
        println!("{:<16} {:<9} {:<25} {}", entry.version, label, applied_at, name);
    }
    Ok(())
}

async fn open_runner(global: &GlobalArgs) -> anyhow::Result<(MigrationRunner, Arc<dyn DatabasePool>)> {
    let config = load_config(global)?;
    let migration_config = config.migration_config();
    let pool = connect(&config).await?;

    let runner = MigrationRunner::from_directory(pool.clone(), &migration_config)
        .with_context(|| format!("loading migrations from {}", migration_config.migrations_dir.display()))?;
    Ok((runner, pool))
}

async fn close(pool: Arc<dyn DatabasePool>) {
    if let Err(e) = pool.close().await {
        warn!("Failed to close database pool: {}", e);
    }
}

fn unit_name(runner: &MigrationRunner, version: MigrationVersion) -> String {
    runner
        .units()
        .get(version)
        .map(|unit| unit.name().to_string())
        .unwrap_or_default()
}

fn status_json(entry: &MigrationStatusEntry) -> serde_json::Value {
    let applied_at = match &entry.status {
        MigrationStatus::Pending => None,
        MigrationStatus::Applied { applied_at } => Some(applied_at.to_rfc3339()),
    };
    json!({
        "version": entry.version.0,
        "name": entry.name,
        "applied": applied_at.is_some(),
        "applied_at": applied_at,
        "definition_missing": entry.definition_missing,
    })
}
