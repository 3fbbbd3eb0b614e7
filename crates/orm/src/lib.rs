//! # tablet-orm: schema migrations and record mapping
//!
//! Versioned schema migrations recorded in a ledger table, and a
//! convention-based mapper that reads and writes rows of the migrated
//! tables as dynamically typed records.
//!
//! PostgreSQL and SQLite are supported through sqlx.

pub mod backends;
pub mod error;
pub mod mapper;
pub mod migrations;

// Re-export core traits and types
pub use backends::{
    DatabaseBackend, DatabaseBackendRegistry, DatabaseBackendType, DatabasePool, DatabasePoolConfig,
    DatabaseRow, DatabaseTransaction, DatabaseValue, SqlDialect,
};
pub use error::{OrmError, OrmResult};
pub use mapper::{
    ColumnDescriptor, ColumnTypeTag, Mapper, MapperConfig, Record, RecordState, TableBinding, TableNaming,
    TableSchema,
};
pub use migrations::{
    MigrateTarget, MigrationConfig, MigrationManager, MigrationRunResult, MigrationRunner, MigrationSet,
    MigrationStatus, MigrationUnit, MigrationVersion, RollbackResult, RollbackTarget, SchemaBuilder,
};
