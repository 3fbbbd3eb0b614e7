//! Migration Runner - Executes migrations against the database
//!
//! Applies pending units in ascending order, one at a time. Each unit's DDL
//! and its ledger write share one transaction when the dialect allows it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::backends::{DatabasePool, DatabaseTransaction, DatabaseValue, SqlDialect};
use crate::error::{OrmError, OrmResult};
use super::definitions::{
    MigrateTarget, MigrationConfig, MigrationDirection, MigrationRunResult, MigrationSet, MigrationStatus,
    MigrationStatusEntry, MigrationUnit, MigrationVersion,
};
use super::ledger::MigrationLedger;
use super::manager::MigrationManager;
use super::operations::SchemaOperation;

/// Migration runner that executes migrations against a database
pub struct MigrationRunner {
    pool: Arc<dyn DatabasePool>,
    units: MigrationSet,
    ledger: MigrationLedger,
    transactional: bool,
}

impl MigrationRunner {
    /// Create a runner over an already loaded set of units
    pub fn new(pool: Arc<dyn DatabasePool>, units: MigrationSet, config: &MigrationConfig) -> Self {
        let dialect = pool.dialect();
        let transactional = config
            .transactional_ddl
            .unwrap_or_else(|| dialect.supports_transactional_ddl())
            && dialect.supports_transactional_ddl();
        let ledger = MigrationLedger::new(pool.clone(), config.ledger_table.clone());

        Self {
            pool,
            units,
            ledger,
            transactional,
        }
    }

    /// Create a runner over the units found in `config.migrations_dir`
    pub fn from_directory(pool: Arc<dyn DatabasePool>, config: &MigrationConfig) -> OrmResult<Self> {
        let units = MigrationManager::with_config(config.clone())
            .with_dialect(pool.dialect())
            .load_migrations()?;
        Ok(Self::new(pool, units, config))
    }

    /// Get the database pool
    pub fn pool(&self) -> &Arc<dyn DatabasePool> {
        &self.pool
    }

    pub fn units(&self) -> &MigrationSet {
        &self.units
    }

    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    /// Highest applied sequence key
    pub async fn current_version(&self) -> OrmResult<Option<MigrationVersion>> {
        self.ledger.ensure().await?;
        self.ledger.current_version().await
    }

    /// Apply pending units up to `target`.
    ///
    /// Stops at the first failure; units applied before it stay applied.
    pub async fn migrate(&self, target: MigrateTarget) -> OrmResult<MigrationRunResult> {
        let start_time = Instant::now();

        let target = match target {
            MigrateTarget::Latest => self.units.latest(),
            MigrateTarget::Version(version) if self.units.contains(version) => Some(version),
            MigrateTarget::Version(version) => return Err(OrmError::UnknownVersion(version)),
        };

        self.ledger.ensure().await?;
        let applied = self.ledger.applied().await?;
        let applied_versions: HashSet<MigrationVersion> = applied.iter().map(|entry| entry.version).collect();
        let current = applied.last().map(|entry| entry.version);

        for unit in self.units.iter() {
            if !applied_versions.contains(&unit.version()) && current.map_or(false, |c| unit.version() < c) {
                warn!(
                    version = %unit.version(),
                    name = unit.name(),
                    "migration is older than the current version and was never applied; skipping"
                );
            }
        }

        let pending: Vec<&MigrationUnit> = self
            .units
            .iter()
            .filter(|unit| current.map_or(true, |c| unit.version() > c))
            .filter(|unit| target.map_or(false, |t| unit.version() <= t))
            .collect();

        let mut applied_now = Vec::with_capacity(pending.len());
        for unit in pending {
            info!(version = %unit.version(), name = unit.name(), "applying migration");

            let (sql, params) = self.ledger.record_statement(unit);
            self.run_unit(unit, MigrationDirection::Up, unit.forward_operations(), (sql, params))
                .await
                .map_err(|cause| OrmError::MigrationApply {
                    version: unit.version(),
                    name: unit.name().to_string(),
                    cause: Box::new(cause),
                })?;

            applied_now.push(unit.version());
        }

        if applied_now.is_empty() {
            info!("no pending migrations");
        }

        Ok(MigrationRunResult {
            applied: applied_now,
            skipped_count: applied_versions.len(),
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    /// Every loaded unit with its ledger state, plus applied units whose
    /// definition is no longer loaded
    pub async fn status(&self) -> OrmResult<Vec<MigrationStatusEntry>> {
        self.ledger.ensure().await?;
        let applied = self.ledger.applied().await?;

        let mut entries: Vec<MigrationStatusEntry> = self
            .units
            .iter()
            .map(|unit| {
                let status = applied
                    .iter()
                    .find(|entry| entry.version == unit.version())
                    .map_or(MigrationStatus::Pending, |entry| MigrationStatus::Applied {
                        applied_at: entry.applied_at,
                    });

                MigrationStatusEntry {
                    version: unit.version(),
                    name: unit.name().to_string(),
                    status,
                    definition_missing: false,
                }
            })
            .collect();

        entries.extend(
            applied
                .iter()
                .filter(|entry| !self.units.contains(entry.version))
                .map(|entry| MigrationStatusEntry {
                    version: entry.version,
                    name: entry.name.clone(),
                    status: MigrationStatus::Applied {
                        applied_at: entry.applied_at,
                    },
                    definition_missing: true,
                }),
        );
        entries.sort_by_key(|entry| entry.version);

        Ok(entries)
    }

    /// Run one unit's operations followed by its ledger statement
    pub(crate) async fn run_unit(
        &self,
        unit: &MigrationUnit,
        direction: MigrationDirection,
        operations: &[SchemaOperation],
        ledger_statement: (String, Vec<DatabaseValue>),
    ) -> OrmResult<()> {
        let dialect = self.pool.dialect();
        let mut scope = self.begin_scope().await?;

        match Self::execute_in_scope(&mut scope, &dialect, operations, &ledger_statement).await {
            Ok(()) => scope.commit().await,
            Err(error) => {
                if let Err(rollback_error) = scope.abort(unit).await {
                    warn!(
                        version = %unit.version(),
                        direction = direction_label(direction),
                        error = %rollback_error,
                        "transaction rollback after failed migration step failed"
                    );
                }
                Err(error)
            }
        }
    }

    async fn begin_scope(&self) -> OrmResult<UnitScope> {
        if self.transactional {
            Ok(UnitScope::Transactional(self.pool.begin_transaction().await?))
        } else {
            Ok(UnitScope::Direct(self.pool.clone()))
        }
    }

    async fn execute_in_scope(
        scope: &mut UnitScope,
        dialect: &SqlDialect,
        operations: &[SchemaOperation],
        ledger_statement: &(String, Vec<DatabaseValue>),
    ) -> OrmResult<()> {
        for operation in operations {
            scope.execute(&operation.to_sql(dialect), &[]).await?;
        }

        let (sql, params) = ledger_statement;
        scope.execute(sql, params).await?;
        Ok(())
    }
}

fn direction_label(direction: MigrationDirection) -> &'static str {
    match direction {
        MigrationDirection::Up => "apply",
        MigrationDirection::Down => "revert",
    }
}

/// Where a unit's statements run
enum UnitScope {
    Transactional(Box<dyn DatabaseTransaction>),
    Direct(Arc<dyn DatabasePool>),
}

impl UnitScope {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        match self {
            UnitScope::Transactional(tx) => tx.execute(sql, params).await,
            UnitScope::Direct(pool) => pool.execute(sql, params).await,
        }
    }

    async fn commit(self) -> OrmResult<()> {
        match self {
            UnitScope::Transactional(tx) => tx.commit().await,
            UnitScope::Direct(_) => Ok(()),
        }
    }

    async fn abort(self, unit: &MigrationUnit) -> OrmResult<()> {
        match self {
            UnitScope::Transactional(tx) => tx.rollback().await,
            UnitScope::Direct(_) => {
                warn!(
                    version = %unit.version(),
                    name = unit.name(),
                    "migration ran without a transaction; statements executed before the failure were not undone"
                );
                Ok(())
            }
        }
    }
}
