//! Migration Rollback - Reverts applied migrations
//!
//! Reverts applied units above a floor version in descending order, running
//! each unit's inverse operations and removing its ledger entry.

use std::time::Instant;
use tracing::info;

use crate::error::{OrmError, OrmResult};
use super::definitions::{MigrationDirection, MigrationVersion, RollbackResult, RollbackTarget};
use super::runner::MigrationRunner;

impl MigrationRunner {
    /// Revert applied units down to `target`.
    ///
    /// Stops at the first failure; units reverted before it stay reverted.
    pub async fn rollback(&self, target: RollbackTarget) -> OrmResult<RollbackResult> {
        let start_time = Instant::now();

        self.ledger().ensure().await?;
        let applied = self.ledger().applied().await?;

        // Units strictly above the floor are reverted
        let floor: Option<MigrationVersion> = match target {
            RollbackTarget::All => None,
            RollbackTarget::Version(version) => Some(version),
            RollbackTarget::Previous => applied.iter().rev().nth(1).map(|entry| entry.version),
        };

        let mut reverted = Vec::new();
        for entry in applied
            .iter()
            .rev()
            .filter(|entry| floor.map_or(true, |f| entry.version > f))
        {
            let revert_error = |cause: OrmError| OrmError::MigrationRevert {
                version: entry.version,
                name: entry.name.clone(),
                cause: Box::new(cause),
            };

            let unit = self.units().get(entry.version).ok_or_else(|| {
                revert_error(OrmError::Configuration(format!(
                    "definition of applied migration {} is no longer loaded",
                    entry.version
                )))
            })?;
            let operations = unit.reverse_operations().map_err(revert_error)?;

            info!(version = %entry.version, name = unit.name(), "reverting migration");

            let ledger_statement = self.ledger().remove_statement(entry.version);
            self.run_unit(unit, MigrationDirection::Down, &operations, ledger_statement)
                .await
                .map_err(revert_error)?;

            reverted.push(entry.version);
        }

        if reverted.is_empty() {
            info!("no migrations to revert");
        }

        Ok(RollbackResult {
            reverted,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DatabaseBackend, DatabasePoolConfig, SqliteBackend};
    use crate::migrations::{MigrateTarget, MigrationConfig, MigrationSet, MigrationUnit};

    async fn runner(units: Vec<MigrationUnit>) -> MigrationRunner {
        let pool = SqliteBackend::new()
            .create_pool("sqlite::memory:", DatabasePoolConfig::single_connection())
            .await
            .unwrap();
        MigrationRunner::new(pool, MigrationSet::new(units).unwrap(), &MigrationConfig::default())
    }

    fn table_unit(version: i64, table: &str) -> MigrationUnit {
        MigrationUnit::change(version, format!("create {}", table), |schema| {
            schema.create_table(table, |t| {
                t.id("id");
            });
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_previous_reverts_only_latest() {
        let runner = runner(vec![table_unit(1, "artists"), table_unit(2, "albums")]).await;
        runner.migrate(MigrateTarget::Latest).await.unwrap();

        let result = runner.rollback(RollbackTarget::Previous).await.unwrap();
        assert_eq!(result.reverted, vec![MigrationVersion(2)]);
        assert_eq!(runner.current_version().await.unwrap(), Some(MigrationVersion(1)));
    }

    #[tokio::test]
    async fn test_rollback_on_empty_ledger_is_noop() {
        let runner = runner(vec![table_unit(1, "artists")]).await;

        let result = runner.rollback(RollbackTarget::All).await.unwrap();
        assert!(result.reverted.is_empty());
    }

    #[tokio::test]
    async fn test_missing_definition_fails_revert() {
        let pool = SqliteBackend::new()
            .create_pool("sqlite::memory:", DatabasePoolConfig::single_connection())
            .await
            .unwrap();
        let config = MigrationConfig::default();

        let full = MigrationRunner::new(
            pool.clone(),
            MigrationSet::new(vec![table_unit(1, "artists"), table_unit(2, "albums")]).unwrap(),
            &config,
        );
        full.migrate(MigrateTarget::Latest).await.unwrap();

        let partial = MigrationRunner::new(pool, MigrationSet::new(vec![table_unit(1, "artists")]).unwrap(), &config);
        let error = partial.rollback(RollbackTarget::Previous).await.unwrap_err();

        assert!(matches!(error, OrmError::MigrationRevert { version: MigrationVersion(2), .. }));
        assert_eq!(partial.current_version().await.unwrap(), Some(MigrationVersion(2)));
    }
}
