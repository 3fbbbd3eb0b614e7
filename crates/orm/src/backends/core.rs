//! Core Database Backend Traits
//!
//! This module defines the driver capability the runner and the mapper are
//! written against: parameterized execution, row fetching and scoped
//! transactions. Backends translate it onto a concrete driver.

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;
use crate::error::{OrmError, OrmResult};

/// Abstract database connection pool trait
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// SQL dialect spoken by the pool's connections
    fn dialect(&self) -> SqlDialect;

    /// Begin a transaction from the pool
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>>;

    /// Execute a statement and return the affected row count
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query and return all result rows
    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Execute a query and return the first result row
    async fn fetch_optional(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Option<Box<dyn DatabaseRow>>>;

    /// Execute a schema statement without parameters
    async fn execute_ddl(&self, sql: &str) -> OrmResult<()> {
        self.execute(sql, &[]).await.map(|_| ())
    }

    /// Close the pool
    async fn close(&self) -> OrmResult<()>;

    /// Round-trip a trivial query and report its latency
    async fn health_check(&self) -> OrmResult<std::time::Duration>;
}

/// Abstract database transaction trait
///
/// A transaction dropped without `commit` is rolled back by the driver.
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Execute a statement within the transaction
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query and return result rows within the transaction
    async fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> OrmResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> OrmResult<()>;
}

/// Abstract database row trait
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by index
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue>;

    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue>;

    /// Get column names
    fn column_names(&self) -> Vec<String>;

    /// Convert row to HashMap
    fn to_map(&self) -> HashMap<String, DatabaseValue>;
}

/// Row whose values were decoded eagerly by a backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueRow {
    columns: Vec<String>,
    values: Vec<DatabaseValue>,
}

impl ValueRow {
    pub fn new(columns: Vec<String>, values: Vec<DatabaseValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }
}

impl DatabaseRow for ValueRow {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        self.values
            .get(index)
            .cloned()
            .ok_or_else(|| OrmError::Query(format!("Column index {} out of range", index)))
    }

    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
        let index = self
            .columns
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| OrmError::Query(format!("Column '{}' not found", name)))?;
        self.get_by_index(index)
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn to_map(&self) -> HashMap<String, DatabaseValue> {
        self.columns.iter().cloned().zip(self.values.iter().cloned()).collect()
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(DateTime<Utc>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    Json(JsonValue),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(i64::from(*i)),
            DatabaseValue::Int64(i) => Some(*i),
            DatabaseValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Booleans arrive as integers from backends without a native type
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(b) => Some(*b),
            DatabaseValue::Int32(i) => Some(*i != 0),
            DatabaseValue::Int64(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Timestamps arrive as text from backends without a native type
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            DatabaseValue::DateTime(dt) => Some(*dt),
            DatabaseValue::String(s) => DateTime::parse_from_rfc3339(s)
                .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z"))
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                        .ok()
                        .map(|naive| naive.and_utc())
                }),
            _ => None,
        }
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int32(i) => JsonValue::from(*i),
            DatabaseValue::Int64(i) => JsonValue::from(*i),
            DatabaseValue::Float32(f) => serde_json::Number::from_f64(f64::from(*f))
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::Array(b.iter().map(|&x| JsonValue::from(x)).collect()),
            DatabaseValue::Uuid(u) => JsonValue::String(u.to_string()),
            DatabaseValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            DatabaseValue::Date(d) => JsonValue::String(d.to_string()),
            DatabaseValue::Time(t) => JsonValue::String(t.to_string()),
            DatabaseValue::Json(j) => j.clone(),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f32> for DatabaseValue {
    fn from(value: f32) -> Self {
        DatabaseValue::Float32(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<chrono::NaiveDate> for DatabaseValue {
    fn from(value: chrono::NaiveDate) -> Self {
        DatabaseValue::Date(value)
    }
}

impl From<chrono::NaiveTime> for DatabaseValue {
    fn from(value: chrono::NaiveTime) -> Self {
        DatabaseValue::Time(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    PostgreSQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder style for this dialect
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Get the quote character for identifiers in this dialect
    pub fn identifier_quote(&self) -> char {
        '"'
    }

    /// Quote a possibly schema-qualified identifier
    pub fn quote_identifier(&self, name: &str) -> String {
        let quote = self.identifier_quote();
        name.split('.')
            .map(|part| {
                let escaped = part.replace(quote, &format!("{}{}", quote, quote));
                format!("{}{}{}", quote, escaped, quote)
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Column type used for timestamps with a time zone
    pub fn timestamp_type(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "TIMESTAMPTZ",
            SqlDialect::SQLite => "TEXT",
        }
    }

    /// Column definition for a generated integer primary key
    pub fn auto_increment_primary_key(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => "BIGSERIAL PRIMARY KEY",
            SqlDialect::SQLite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }

    /// Whether schema statements roll back with the surrounding transaction
    pub fn supports_transactional_ddl(&self) -> bool {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => true,
        }
    }

    /// Query returning `name`, `data_type`, `nullable`, `is_primary` for each
    /// column of the table bound as the single parameter, in ordinal order
    pub fn column_introspection_sql(&self) -> &'static str {
        match self {
            SqlDialect::PostgreSQL => {
                "SELECT c.column_name::text AS name, \
                        c.data_type::text AS data_type, \
                        (c.is_nullable = 'YES') AS nullable, \
                        EXISTS ( \
                            SELECT 1 FROM information_schema.table_constraints tc \
                            JOIN information_schema.key_column_usage kcu \
                              ON kcu.constraint_name = tc.constraint_name \
                             AND kcu.table_schema = tc.table_schema \
                             AND kcu.table_name = tc.table_name \
                            WHERE tc.constraint_type = 'PRIMARY KEY' \
                              AND tc.table_schema = c.table_schema \
                              AND tc.table_name = c.table_name \
                              AND kcu.column_name = c.column_name \
                        ) AS is_primary \
                 FROM information_schema.columns c \
                 WHERE c.table_schema = current_schema() AND c.table_name = $1 \
                 ORDER BY c.ordinal_position"
            }
            SqlDialect::SQLite => {
                "SELECT name AS name, type AS data_type, (\"notnull\" = 0) AS nullable, (pk > 0) AS is_primary \
                 FROM pragma_table_info(?) ORDER BY cid"
            }
        }
    }
}

/// Positional parameters collected while building a statement.
///
/// NULL values are inlined as literals so no driver has to guess a type for
/// an untyped NULL parameter.
#[derive(Debug, Clone)]
pub struct QueryParams {
    dialect: SqlDialect,
    values: Vec<DatabaseValue>,
}

impl QueryParams {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    /// Register a value and return the SQL fragment standing for it
    pub fn push(&mut self, value: DatabaseValue) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.values.push(value);
        self.dialect.parameter_placeholder(self.values.len() - 1)
    }

    pub fn values(&self) -> &[DatabaseValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<DatabaseValue> {
        self.values
    }
}

/// Database backend trait that provides database-specific implementations
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Create a connection pool from a database URL
    async fn create_pool(&self, database_url: &str, config: DatabasePoolConfig) -> OrmResult<Arc<dyn DatabasePool>>;

    /// Get the SQL dialect used by this backend
    fn sql_dialect(&self) -> SqlDialect;

    /// Get the backend type
    fn backend_type(&self) -> crate::backends::DatabaseBackendType;

    /// Validate a database URL for this backend
    fn validate_database_url(&self, url: &str) -> OrmResult<()>;
}

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600), // 10 minutes
            max_lifetime_seconds: Some(1800), // 30 minutes
            test_before_acquire: true,
        }
    }
}

impl DatabasePoolConfig {
    /// One connection that is never recycled.
    ///
    /// Required for `sqlite::memory:` where every connection is its own database.
    pub fn single_connection() -> Self {
        Self {
            max_connections: 1,
            min_connections: 1,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: None,
            max_lifetime_seconds: None,
            test_before_acquire: false,
        }
    }
}

/// Database backend registry for managing multiple backend implementations
pub struct DatabaseBackendRegistry {
    backends: HashMap<crate::backends::DatabaseBackendType, Arc<dyn DatabaseBackend>>,
}

impl DatabaseBackendRegistry {
    /// Create a new backend registry
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Registry with every shipped backend registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            crate::backends::DatabaseBackendType::PostgreSQL,
            Arc::new(crate::backends::PostgresBackend::new()),
        );
        registry.register(
            crate::backends::DatabaseBackendType::SQLite,
            Arc::new(crate::backends::SqliteBackend::new()),
        );
        registry
    }

    /// Register a database backend
    pub fn register(&mut self, backend_type: crate::backends::DatabaseBackendType, backend: Arc<dyn DatabaseBackend>) {
        self.backends.insert(backend_type, backend);
    }

    /// Get a database backend by type
    pub fn get(&self, backend_type: &crate::backends::DatabaseBackendType) -> Option<Arc<dyn DatabaseBackend>> {
        self.backends.get(backend_type).cloned()
    }

    /// Create a connection pool using the appropriate backend for the given URL
    pub async fn create_pool(&self, database_url: &str, config: DatabasePoolConfig) -> OrmResult<Arc<dyn DatabasePool>> {
        let backend_type = Self::detect_backend_from_url(database_url)?;
        let backend = self.get(&backend_type)
            .ok_or_else(|| OrmError::Connection(format!("No backend registered for {}", backend_type)))?;

        backend.validate_database_url(database_url)?;
        backend.create_pool(database_url, config).await
    }

    /// Detect database backend type from URL
    pub fn detect_backend_from_url(url: &str) -> OrmResult<crate::backends::DatabaseBackendType> {
        if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(crate::backends::DatabaseBackendType::PostgreSQL)
        } else if url.starts_with("sqlite:") {
            Ok(crate::backends::DatabaseBackendType::SQLite)
        } else {
            Err(OrmError::Configuration(format!("Unable to detect database backend from URL: {}", url)))
        }
    }
}

impl Default for DatabaseBackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DatabaseBackendType;

    #[test]
    fn test_placeholders_follow_dialect() {
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(0), "$1");
        assert_eq!(SqlDialect::PostgreSQL.parameter_placeholder(2), "$3");
        assert_eq!(SqlDialect::SQLite.parameter_placeholder(2), "?");
    }

    #[test]
    fn test_quote_identifier_escapes_and_splits_schema() {
        let dialect = SqlDialect::PostgreSQL;
        assert_eq!(dialect.quote_identifier("artists"), "\"artists\"");
        assert_eq!(dialect.quote_identifier("public.artists"), "\"public\".\"artists\"");
        assert_eq!(dialect.quote_identifier("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_query_params_inline_null() {
        let mut params = QueryParams::new(SqlDialect::PostgreSQL);
        assert_eq!(params.push("Jon".into()), "$1");
        assert_eq!(params.push(DatabaseValue::Null), "NULL");
        assert_eq!(params.push(7i64.into()), "$2");
        assert_eq!(params.values().len(), 2);
    }

    #[test]
    fn test_value_row_lookup() {
        let row = ValueRow::new(
            vec!["id".to_string(), "name".to_string()],
            vec![DatabaseValue::Int64(1), DatabaseValue::String("Jon".to_string())],
        );

        assert_eq!(row.get_by_name("name").unwrap(), DatabaseValue::String("Jon".to_string()));
        assert!(row.get_by_name("missing").is_err());
        assert_eq!(row.to_map()["id"], DatabaseValue::Int64(1));
        assert_eq!(row.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn test_value_coercions() {
        assert_eq!(DatabaseValue::Int64(0).as_bool(), Some(false));
        assert_eq!(DatabaseValue::Int32(5).as_i64(), Some(5));

        let text = DatabaseValue::String("2024-03-01T10:00:00+00:00".to_string());
        assert!(text.as_datetime().is_some());
        let naive = DatabaseValue::String("2024-03-01 10:00:00".to_string());
        assert!(naive.as_datetime().is_some());
    }

    #[test]
    fn test_detect_backend_from_url() {
        assert_eq!(
            DatabaseBackendRegistry::detect_backend_from_url("postgres://localhost/app").unwrap(),
            DatabaseBackendType::PostgreSQL
        );
        assert_eq!(
            DatabaseBackendRegistry::detect_backend_from_url("sqlite::memory:").unwrap(),
            DatabaseBackendType::SQLite
        );
        assert!(DatabaseBackendRegistry::detect_backend_from_url("mysql://localhost/app").is_err());
    }
}
