//! Error types for the migration runner and record mapper
//!
//! Every variant names the unit, table or column it concerns so a failure is
//! never reported as a bare "something failed".

use thiserror::Error;

use crate::migrations::MigrationVersion;

/// Result type alias for ORM operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for ORM operations
#[derive(Debug, Clone, Error)]
pub enum OrmError {
    /// Database query or statement error
    #[error("Database error: {0}")]
    Database(String),

    /// Connection or pool error, retryable by the caller
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transaction begin/commit/rollback error
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Row decoding or parameter binding error
    #[error("Query error: {0}")]
    Query(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Filesystem error while reading or writing migration files
    #[error("IO error: {0}")]
    Io(String),

    /// Malformed or duplicate migration definitions, raised before any DDL runs
    #[error("Migration discovery failed for {origin}: {reason}")]
    Discovery { origin: String, reason: String },

    /// A unit failed while applying; earlier units stay committed
    #[error("Failed to apply migration {version} ({name}): {cause}")]
    MigrationApply {
        version: MigrationVersion,
        name: String,
        cause: Box<OrmError>,
    },

    /// A unit could not be reverted; units reverted before it stay reverted
    #[error("Failed to revert migration {version} ({name}): {cause}")]
    MigrationRevert {
        version: MigrationVersion,
        name: String,
        cause: Box<OrmError>,
    },

    /// A target version that names no loaded migration unit
    #[error("Unknown migration version {0}")]
    UnknownVersion(MigrationVersion),

    /// Schema operation without a mechanical inverse
    #[error("Operation '{0}' has no automatic inverse")]
    Irreversible(String),

    /// No table matched the bound type name
    #[error("No table '{table}' found for '{type_name}'")]
    UnknownTable { type_name: String, table: String },

    /// Column not present in the introspected schema
    #[error("Unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Constraint violation or driver failure while saving or deleting a record
    #[error("Failed to persist record in '{table}': {cause}")]
    Persistence { table: String, cause: Box<OrmError> },

    /// Delete requested for a record without a primary key
    #[error("Record in '{table}' is not persisted")]
    NotPersisted { table: String },

    /// Any use of a record after it was deleted
    #[error("Record in '{table}' was deleted and can no longer be used")]
    StaleRecord { table: String },
}

impl OrmError {
    /// Whether the error comes from connectivity rather than from the schema.
    ///
    /// The runner never retries on its own; callers may retry these.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrmError::Connection(_) => true,
            OrmError::MigrationApply { cause, .. }
            | OrmError::MigrationRevert { cause, .. }
            | OrmError::Persistence { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for OrmError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => OrmError::Connection(err.to_string()),
            other => OrmError::Database(other.to_string()),
        }
    }
}

impl From<std::io::Error> for OrmError {
    fn from(err: std::io::Error) -> Self {
        OrmError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Query(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_error_names_the_unit() {
        let err = OrmError::MigrationApply {
            version: MigrationVersion(3),
            name: "add genre".to_string(),
            cause: Box::new(OrmError::Database("column exists".to_string())),
        };

        let message = err.to_string();
        assert!(message.contains("3"));
        assert!(message.contains("add genre"));
        assert!(message.contains("column exists"));
    }

    #[test]
    fn test_retryable_follows_the_cause() {
        let wrapped = OrmError::Persistence {
            table: "artists".to_string(),
            cause: Box::new(OrmError::Connection("reset by peer".to_string())),
        };
        assert!(wrapped.is_retryable());

        let schema = OrmError::MigrationApply {
            version: MigrationVersion(1),
            name: "create artists".to_string(),
            cause: Box::new(OrmError::Database("table exists".to_string())),
        };
        assert!(!schema.is_retryable());
    }
}
