//! Migration System
//!
//! Versioned schema changes: units are discovered from a directory or built
//! in code, applied in sequence-key order and recorded in a ledger table
//! stored in the target database.

pub mod definitions;
pub mod ledger;
pub mod manager;
pub mod operations;
pub mod parser;
pub mod rollback;
pub mod runner;
pub mod schema_builder;

pub use definitions::*;
pub use ledger::MigrationLedger;
pub use manager::{MigrationManager, MigrationSource};
pub use operations::{ColumnDefinition, ColumnType, SchemaOperation, TableDefinition};
pub use parser::{parse_operations, parse_operations_or_raw};
pub use runner::MigrationRunner;
pub use schema_builder::{SchemaBuilder, TableBuilder};
