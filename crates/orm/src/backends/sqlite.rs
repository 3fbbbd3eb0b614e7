//! SQLite Backend Implementation
//!
//! SQLite support through sqlx. SQLite runs DDL inside transactions and is
//! what the test suites use through `sqlite::memory:`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Pool, Row, Sqlite, TypeInfo, ValueRef};
use tracing::debug;
use crate::error::{OrmError, OrmResult};
use super::core::*;

/// SQLite database backend implementation
#[derive(Debug)]
pub struct SqliteBackend;

impl SqliteBackend {
    /// Create a new SQLite backend instance
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
    async fn create_pool(&self, database_url: &str, config: DatabasePoolConfig) -> OrmResult<Arc<dyn DatabasePool>> {
        let connect_options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| OrmError::Configuration(format!("Invalid SQLite URL '{}': {}", database_url, e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let mut options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .test_before_acquire(config.test_before_acquire)
            .idle_timeout(config.idle_timeout_seconds.map(Duration::from_secs))
            .max_lifetime(config.max_lifetime_seconds.map(Duration::from_secs));

        if database_url.contains(":memory:") && config.max_connections > 1 {
            // Each in-memory connection would see its own empty database
            options = options.max_connections(1);
        }

        let sqlx_pool = options.connect_with(connect_options)
            .await
            .map_err(|e| OrmError::Connection(format!("Failed to create SQLite pool: {}", e)))?;

        Ok(Arc::new(SqlitePool::new(sqlx_pool)))
    }

    fn sql_dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn backend_type(&self) -> crate::backends::DatabaseBackendType {
        crate::backends::DatabaseBackendType::SQLite
    }

    fn validate_database_url(&self, url: &str) -> OrmResult<()> {
        if !url.starts_with("sqlite:") {
            return Err(OrmError::Configuration("Invalid SQLite URL scheme".to_string()));
        }
        Ok(())
    }
}

/// SQLite connection pool implementation
pub struct SqlitePool {
    pool: Pool<Sqlite>,
}

impl SqlitePool {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabasePool for SqlitePool {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self.pool.begin()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(SqliteTransaction { tx: Some(tx) }))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        debug!(sql, "execute");
        // Parameterless statements take the simple protocol so that a raw
        // migration section may hold several statements
        let result = if params.is_empty() {
            sqlx::raw_sql(sql).execute(&self.pool).await?
        } else {
            bind_all(sqlx::query(sql), params)
                .execute(&self.pool)
                .await?
        };

        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        debug!(sql, "fetch_all");
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(boxed_row).collect()
    }

    async fn fetch_optional(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        debug!(sql, "fetch_optional");
        let row = bind_all(sqlx::query(sql), params)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(boxed_row).transpose()
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn health_check(&self) -> OrmResult<Duration> {
        let start = Instant::now();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| OrmError::Connection(format!("Health check failed: {}", e)))?;

        Ok(start.elapsed())
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteTransaction {
    fn active(&mut self) -> OrmResult<&mut sqlx::Transaction<'static, Sqlite>> {
        self.tx.as_mut().ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        debug!(sql, "execute in transaction");
        let result = if params.is_empty() {
            let tx = self.active()?;
            sqlx::Executor::execute(&mut **tx, sqlx::raw_sql(sql)).await?
        } else {
            let query = bind_all(sqlx::query(sql), params);
            let tx = self.active()?;
            query.execute(&mut **tx).await?
        };

        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        debug!(sql, "fetch_all in transaction");
        let query = bind_all(sqlx::query(sql), params);
        let tx = self.active()?;
        let rows = query.fetch_all(&mut **tx).await?;

        rows.iter().map(boxed_row).collect()
    }

    async fn commit(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self.tx.take().ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;

        tx.commit()
            .await
            .map_err(|e| OrmError::Transaction(format!("Transaction commit failed: {}", e)))
    }

    async fn rollback(mut self: Box<Self>) -> OrmResult<()> {
        let tx = self.tx.take().ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;

        tx.rollback()
            .await
            .map_err(|e| OrmError::Transaction(format!("Transaction rollback failed: {}", e)))
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_all<'q>(mut query: SqliteQuery<'q>, params: &[DatabaseValue]) -> SqliteQuery<'q> {
    for param in params {
        query = bind_database_value(query, param);
    }
    query
}

fn bind_database_value<'q>(query: SqliteQuery<'q>, value: &DatabaseValue) -> SqliteQuery<'q> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::Float32(f) => query.bind(*f),
        DatabaseValue::Float64(f) => query.bind(*f),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Bytes(b) => query.bind(b.clone()),
        DatabaseValue::Uuid(u) => query.bind(*u),
        DatabaseValue::DateTime(dt) => query.bind(*dt),
        DatabaseValue::Date(d) => query.bind(*d),
        DatabaseValue::Time(t) => query.bind(*t),
        DatabaseValue::Json(j) => query.bind(sqlx::types::Json(j.clone())),
    }
}

fn boxed_row(row: &SqliteRow) -> OrmResult<Box<dyn DatabaseRow>> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (index, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(sqlite_value_to_database_value(row, index)?);
    }

    Ok(Box::new(ValueRow::new(columns, values)))
}

/// SQLite values carry their storage class, not the declared column type
fn sqlite_value_to_database_value(row: &SqliteRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOLEAN" => DatabaseValue::Bool(row.try_get(index)?),
        "INTEGER" => DatabaseValue::Int64(row.try_get(index)?),
        "REAL" => DatabaseValue::Float64(row.try_get(index)?),
        "BLOB" => DatabaseValue::Bytes(row.try_get(index)?),
        "TEXT" => DatabaseValue::String(row.try_get(index)?),
        _ => {
            let value: String = row.try_get_unchecked(index)
                .map_err(|e| OrmError::Query(format!("Unsupported column type '{}': {}", type_name, e)))?;
            DatabaseValue::String(value)
        }
    };

    Ok(value)
}

impl Default for SqliteBackend {
    fn default() -> Self {
        Self::new()
    }
}
