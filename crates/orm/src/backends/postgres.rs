//! PostgreSQL Backend Implementation
//!
//! This module provides the PostgreSQL-specific implementation of the database
//! backend traits using sqlx as the underlying database driver.

use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow, PgValueFormat, PgValueRef};
use sqlx::{Column, Pool, Postgres, Row, TypeInfo, ValueRef};
use tracing::debug;
use crate::error::{OrmError, OrmResult};
use super::core::*;

/// PostgreSQL database backend implementation
#[derive(Debug)]
pub struct PostgresBackend;

impl PostgresBackend {
    /// Create a new PostgreSQL backend instance
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
    async fn create_pool(&self, database_url: &str, config: DatabasePoolConfig) -> OrmResult<Arc<dyn DatabasePool>> {
        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .test_before_acquire(config.test_before_acquire);

        if let Some(idle_timeout) = config.idle_timeout_seconds {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = config.max_lifetime_seconds {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let sqlx_pool = options.connect(database_url)
            .await
            .map_err(|e| OrmError::Connection(format!("Failed to create PostgreSQL pool: {}", e)))?;

        Ok(Arc::new(PostgresPool::new(sqlx_pool)))
    }

    fn sql_dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }

    fn backend_type(&self) -> crate::backends::DatabaseBackendType {
        crate::backends::DatabaseBackendType::PostgreSQL
    }

    fn validate_database_url(&self, url: &str) -> OrmResult<()> {
        if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
            return Err(OrmError::Configuration("Invalid PostgreSQL URL scheme".to_string()));
        }
        Ok(())
    }
}

/// PostgreSQL connection pool implementation
pub struct PostgresPool {
    pool: Pool<Postgres>,
}

impl PostgresPool {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }

    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self.pool.begin()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        debug!(sql, "execute");
        // Parameterless statements take the simple protocol so that a raw
        // migration section may hold several statements
        let result = if params.is_empty() {
            sqlx::raw_sql(sql).execute(&self.pool).await?
        } else {
            bind_all(sqlx::query(sql), params)?
                .execute(&self.pool)
                .await?
        };

        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        debug!(sql, "fetch_all");
        let rows = bind_all(sqlx::query(sql), params)?
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(boxed_row).collect()
    }

    async fn fetch_optional(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>> {
        debug!(sql, "fetch_optional");
        let row = bind_all(sqlx::query(sql), params)?
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

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    pub fn new(tx: sqlx::Transaction<'static, Postgres>) -> Self {
        Self { tx: Some(tx) }
    }

    fn active(&mut self) -> OrmResult<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx.as_mut().ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        debug!(sql, "execute in transaction");
        let result = if params.is_empty() {
            let tx = self.active()?;
            sqlx::Executor::execute(&mut **tx, sqlx::raw_sql(sql)).await?
        } else {
            let query = bind_all(sqlx::query(sql), params)?;
            let tx = self.active()?;
            query.execute(&mut **tx).await?
        };

        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        debug!(sql, "fetch_all in transaction");
        let query = bind_all(sqlx::query(sql), params)?;
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

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

fn bind_all<'q>(mut query: PgQuery<'q>, params: &[DatabaseValue]) -> OrmResult<PgQuery<'q>> {
    for param in params {
        query = bind_database_value(query, param)?;
    }
    Ok(query)
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(query: PgQuery<'q>, value: &DatabaseValue) -> OrmResult<PgQuery<'q>> {
    match value {
        DatabaseValue::Null => Ok(query.bind(Option::<String>::None)),
        DatabaseValue::Bool(b) => Ok(query.bind(*b)),
        DatabaseValue::Int32(i) => Ok(query.bind(*i)),
        DatabaseValue::Int64(i) => Ok(query.bind(*i)),
        DatabaseValue::Float32(f) => Ok(query.bind(*f)),
        DatabaseValue::Float64(f) => Ok(query.bind(*f)),
        DatabaseValue::String(s) => Ok(query.bind(s.clone())),
        DatabaseValue::Bytes(b) => Ok(query.bind(b.clone())),
        DatabaseValue::Uuid(u) => Ok(query.bind(*u)),
        DatabaseValue::DateTime(dt) => Ok(query.bind(*dt)),
        DatabaseValue::Date(d) => Ok(query.bind(*d)),
        DatabaseValue::Time(t) => Ok(query.bind(*t)),
        DatabaseValue::Json(j) => Ok(query.bind(j.clone())),
    }
}

fn boxed_row(row: &PgRow) -> OrmResult<Box<dyn DatabaseRow>> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (index, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(postgres_value_to_database_value(row, index)?);
    }

    Ok(Box::new(ValueRow::new(columns, values)))
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index)?),
        "INT2" => DatabaseValue::Int32(i32::from(row.try_get::<i16, _>(index)?)),
        "INT4" => DatabaseValue::Int32(row.try_get(index)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index)?),
        "FLOAT4" => DatabaseValue::Float32(row.try_get(index)?),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => DatabaseValue::String(row.try_get(index)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index)?),
        "UUID" => DatabaseValue::Uuid(row.try_get(index)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index)?),
        "TIMESTAMP" => DatabaseValue::DateTime(row.try_get::<chrono::NaiveDateTime, _>(index)?.and_utc()),
        "DATE" => DatabaseValue::Date(row.try_get(index)?),
        "TIME" => DatabaseValue::Time(row.try_get(index)?),
        "JSON" | "JSONB" => DatabaseValue::Json(row.try_get::<JsonValue, _>(index)?),
        "NUMERIC" => DatabaseValue::String(match raw.format() {
            PgValueFormat::Binary => numeric_text(raw_bytes(&raw, &type_name)?)?,
            PgValueFormat::Text => raw_str(&raw, &type_name)?.to_string(),
        }),
        "INTERVAL" => {
            let interval: PgInterval = row.try_get(index)?;
            DatabaseValue::String(interval_text(interval.months, interval.days, interval.microseconds))
        }
        _ => {
            // Text-like types (enums, citext, text format results) arrive as
            // UTF-8; anything else is handed over as its wire bytes
            match raw.as_str() {
                Ok(text) => DatabaseValue::String(text.to_string()),
                Err(_) => DatabaseValue::Bytes(raw_bytes(&raw, &type_name)?.to_vec()),
            }
        }
    };

    Ok(value)
}

fn raw_bytes<'r>(raw: &PgValueRef<'r>, type_name: &str) -> OrmResult<&'r [u8]> {
    raw.as_bytes()
        .map_err(|e| OrmError::Query(format!("Unreadable '{}' column: {}", type_name, e)))
}

fn raw_str<'r>(raw: &PgValueRef<'r>, type_name: &str) -> OrmResult<&'r str> {
    raw.as_str()
        .map_err(|e| OrmError::Query(format!("Unreadable '{}' column: {}", type_name, e)))
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render a binary NUMERIC as its exact decimal text.
///
/// The wire form is a header of digit count, weight, sign and display scale
/// followed by base-10000 digits, most significant first.
fn numeric_text(bytes: &[u8]) -> OrmResult<String> {
    let malformed = || OrmError::Query("Malformed NUMERIC value".to_string());
    let word = |at: usize| -> OrmResult<u16> {
        bytes
            .get(at..at + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(malformed)
    };

    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(2)? as i16);
    let sign = word(4)?;
    let scale = usize::from(word(6)?);

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(8 + i * 2))
        .collect::<OrmResult<Vec<u16>>>()?;
    let digit_at = |position: i32| -> u16 {
        usize::try_from(position)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }

    if weight < 0 {
        text.push('0');
    } else {
        for position in 0..=weight {
            if position == 0 {
                text.push_str(&digit_at(position).to_string());
            } else {
                text.push_str(&format!("{:04}", digit_at(position)));
            }
        }
    }

    if scale > 0 {
        let mut fraction = String::with_capacity(scale + 4);
        let mut position = weight + 1;
        while fraction.len() < scale {
            fraction.push_str(&format!("{:04}", digit_at(position)));
            position += 1;
        }
        fraction.truncate(scale);
        text.push('.');
        text.push_str(&fraction);
    }

    Ok(text)
}

/// Render an interval the way PostgreSQL prints it, e.g. `1 year 2 mons 3 days 04:05:06`
fn interval_text(months: i32, days: i32, microseconds: i64) -> String {
    fn unit(value: i64, singular: &str, plural: &str) -> String {
        format!("{} {}", value, if value.abs() == 1 { singular } else { plural })
    }

    let mut parts = Vec::new();
    let (years, months) = (i64::from(months) / 12, i64::from(months) % 12);
    if years != 0 {
        parts.push(unit(years, "year", "years"));
    }
    if months != 0 {
        parts.push(unit(months, "mon", "mons"));
    }
    if days != 0 {
        parts.push(unit(i64::from(days), "day", "days"));
    }

    if microseconds != 0 || parts.is_empty() {
        let sign = if microseconds < 0 { "-" } else { "" };
        let total = microseconds.unsigned_abs();
        let seconds = total / 1_000_000;
        let fraction = total % 1_000_000;
        let mut clock = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            seconds / 3600,
            seconds / 60 % 60,
            seconds % 60
        );
        if fraction != 0 {
            clock.push_str(format!(".{:06}", fraction).trim_end_matches('0'));
        }
        parts.push(clock);
    }

    parts.join(" ")
}

impl Default for PostgresBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_bytes(weight: i16, sign: u16, scale: u16, digits: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend((digits.len() as u16).to_be_bytes());
        bytes.extend(weight.to_be_bytes());
        bytes.extend(sign.to_be_bytes());
        bytes.extend(scale.to_be_bytes());
        for digit in digits {
            bytes.extend(digit.to_be_bytes());
        }
        bytes
    }

    #[test]
    fn test_numeric_text_is_exact() {
        assert_eq!(numeric_text(&numeric_bytes(0, 0, 2, &[123, 4500])).unwrap(), "123.45");
        assert_eq!(numeric_text(&numeric_bytes(1, 0, 1, &[1234, 5678, 9000])).unwrap(), "12345678.9");
        assert_eq!(numeric_text(&numeric_bytes(-1, 0, 4, &[1])).unwrap(), "0.0001");
        assert_eq!(numeric_text(&numeric_bytes(1, 0, 0, &[1])).unwrap(), "10000");
        assert_eq!(numeric_text(&numeric_bytes(0, NUMERIC_NEG, 3, &[19, 9900])).unwrap(), "-19.990");
        assert_eq!(numeric_text(&numeric_bytes(0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(
            numeric_text(&numeric_bytes(0, 0, 20, &[0, 1234, 5678, 9012, 3456, 7890])).unwrap(),
            "0.12345678901234567890"
        );
        assert_eq!(numeric_text(&numeric_bytes(0, NUMERIC_NAN, 0, &[])).unwrap(), "NaN");
    }

    #[test]
    fn test_numeric_text_rejects_truncated_input() {
        let mut bytes = numeric_bytes(0, 0, 2, &[123, 4500]);
        bytes.truncate(10);
        assert!(numeric_text(&bytes).is_err());
        assert!(numeric_text(&[0, 1]).is_err());
    }

    #[test]
    fn test_interval_text() {
        assert_eq!(interval_text(14, 3, 14_706_000_000), "1 year 2 mons 3 days 04:05:06");
        assert_eq!(interval_text(1, 1, 0), "1 mon 1 day");
        assert_eq!(interval_text(0, 0, 1_500_000), "00:00:01.5");
        assert_eq!(interval_text(0, -2, -60_000_000), "-2 days -00:01:00");
        assert_eq!(interval_text(0, 0, 0), "00:00:00");
    }
}
