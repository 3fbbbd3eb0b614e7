//! Migration Ledger - persistent record of applied migration units
//!
//! One row per applied unit, keyed by sequence key. The ledger is the sole
//! source of truth for which units are applied.

use chrono::Utc;
use std::sync::Arc;

use crate::backends::{DatabasePool, DatabaseRow, DatabaseValue, QueryParams};
use crate::error::{OrmError, OrmResult};
use super::definitions::{LedgerEntry, MigrationUnit, MigrationVersion};

/// Reads and writes the ledger table
#[derive(Clone)]
pub struct MigrationLedger {
    pool: Arc<dyn DatabasePool>,
    table: String,
}

impl MigrationLedger {
    pub fn new(pool: Arc<dyn DatabasePool>, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it does not exist yet
    pub async fn ensure(&self) -> OrmResult<()> {
        let dialect = self.pool.dialect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                sequence_key BIGINT PRIMARY KEY,\n    \
                name VARCHAR(255) NOT NULL,\n    \
                applied_at {} NOT NULL\n\
            )",
            dialect.quote_identifier(&self.table),
            dialect.timestamp_type()
        );

        self.pool.execute_ddl(&sql).await
    }

    /// Applied entries in ascending sequence-key order
    pub async fn applied(&self) -> OrmResult<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT sequence_key, name, applied_at FROM {} ORDER BY sequence_key ASC",
            self.pool.dialect().quote_identifier(&self.table)
        );

        let rows = self.pool.fetch_all(&sql, &[]).await?;
        rows.iter().map(|row| self.entry_from_row(row.as_ref())).collect()
    }

    /// Highest applied sequence key, `None` on an empty ledger
    pub async fn current_version(&self) -> OrmResult<Option<MigrationVersion>> {
        Ok(self.applied().await?.last().map(|entry| entry.version))
    }

    pub async fn is_applied(&self, version: MigrationVersion) -> OrmResult<bool> {
        let dialect = self.pool.dialect();
        let mut params = QueryParams::new(dialect);
        let sql = format!(
            "SELECT sequence_key FROM {} WHERE sequence_key = {}",
            dialect.quote_identifier(&self.table),
            params.push(DatabaseValue::Int64(version.0))
        );

        Ok(self.pool.fetch_optional(&sql, params.values()).await?.is_some())
    }

    /// Insert statement recording `unit` as applied now
    pub(crate) fn record_statement(&self, unit: &MigrationUnit) -> (String, Vec<DatabaseValue>) {
        let dialect = self.pool.dialect();
        let mut params = QueryParams::new(dialect);
        let sql = format!(
            "INSERT INTO {} (sequence_key, name, applied_at) VALUES ({}, {}, {})",
            dialect.quote_identifier(&self.table),
            params.push(DatabaseValue::Int64(unit.version().0)),
            params.push(DatabaseValue::String(unit.name().to_string())),
            params.push(DatabaseValue::DateTime(Utc::now()))
        );

        (sql, params.into_values())
    }

    /// Delete statement removing the entry of `version`
    pub(crate) fn remove_statement(&self, version: MigrationVersion) -> (String, Vec<DatabaseValue>) {
        let dialect = self.pool.dialect();
        let mut params = QueryParams::new(dialect);
        let sql = format!(
            "DELETE FROM {} WHERE sequence_key = {}",
            dialect.quote_identifier(&self.table),
            params.push(DatabaseValue::Int64(version.0))
        );

        (sql, params.into_values())
    }

    fn entry_from_row(&self, row: &dyn DatabaseRow) -> OrmResult<LedgerEntry> {
        let malformed = |column: &str| {
            OrmError::Query(format!("Malformed '{}' value in ledger table '{}'", column, self.table))
        };

        let version = row
            .get_by_name("sequence_key")?
            .as_i64()
            .ok_or_else(|| malformed("sequence_key"))?;
        let name = row
            .get_by_name("name")?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| malformed("name"))?;
        let applied_at = row
            .get_by_name("applied_at")?
            .as_datetime()
            .ok_or_else(|| malformed("applied_at"))?;

        Ok(LedgerEntry {
            version: MigrationVersion(version),
            name,
            applied_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DatabaseBackend, DatabasePoolConfig, SqliteBackend};

    async fn ledger() -> MigrationLedger {
        let pool = SqliteBackend::new()
            .create_pool("sqlite::memory:", DatabasePoolConfig::single_connection())
            .await
            .unwrap();
        MigrationLedger::new(pool, "schema_migrations")
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let ledger = ledger().await;
        ledger.ensure().await.unwrap();
        ledger.ensure().await.unwrap();

        assert!(ledger.applied().await.unwrap().is_empty());
        assert_eq!(ledger.current_version().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_record_and_remove() {
        let ledger = ledger().await;
        ledger.ensure().await.unwrap();

        for version in [2, 1] {
            let unit = MigrationUnit::up_down(version, format!("unit {}", version), |_| {}, |_| {});
            let (sql, params) = ledger.record_statement(&unit);
            ledger.pool.execute(&sql, &params).await.unwrap();
        }

        let applied = ledger.applied().await.unwrap();
        let versions: Vec<i64> = applied.iter().map(|entry| entry.version.0).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(applied[1].name, "unit 2");
        assert_eq!(ledger.current_version().await.unwrap(), Some(MigrationVersion(2)));
        assert!(ledger.is_applied(MigrationVersion(1)).await.unwrap());

        let (sql, params) = ledger.remove_statement(MigrationVersion(2));
        ledger.pool.execute(&sql, &params).await.unwrap();
        assert_eq!(ledger.current_version().await.unwrap(), Some(MigrationVersion(1)));
        assert!(!ledger.is_applied(MigrationVersion(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_record_is_rejected() {
        let ledger = ledger().await;
        ledger.ensure().await.unwrap();

        let unit = MigrationUnit::up_down(7, "seed", |_| {}, |_| {});
        let (sql, params) = ledger.record_statement(&unit);
        ledger.pool.execute(&sql, &params).await.unwrap();

        let (sql, params) = ledger.record_statement(&unit);
        assert!(ledger.pool.execute(&sql, &params).await.is_err());
    }
}
