//! Record Mapper
//!
//! Binds logical type names to tables by naming convention, introspects the
//! live schema and reads/writes rows as dynamically typed records.

pub mod crud;
pub mod naming;
pub mod record;
pub mod schema;

pub use naming::TableNaming;
pub use record::{Record, RecordState};
pub use schema::{ColumnDescriptor, ColumnTypeTag, TableSchema};

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::backends::DatabasePool;
use crate::error::{OrmError, OrmResult};

/// Mapper settings
#[derive(Debug, Clone, Default)]
pub struct MapperConfig {
    /// Type name to table name, bypassing the naming convention
    pub table_overrides: HashMap<String, String>,
}

/// A type name bound to its table's introspected schema
#[derive(Debug, Clone)]
pub struct TableBinding {
    type_name: String,
    schema: Arc<TableSchema>,
}

impl TableBinding {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn table(&self) -> &str {
        &self.schema.table
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Column descriptors in ordinal order
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.schema.columns
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.schema.primary_key.as_deref()
    }
}

/// Convention-based mapper over a database pool
pub struct Mapper {
    pool: Arc<dyn DatabasePool>,
    naming: TableNaming,
}

impl Mapper {
    pub fn new(pool: Arc<dyn DatabasePool>) -> Self {
        Self::with_config(pool, MapperConfig::default())
    }

    pub fn with_config(pool: Arc<dyn DatabasePool>, config: MapperConfig) -> Self {
        Self {
            pool,
            naming: TableNaming::with_overrides(config.table_overrides),
        }
    }

    pub fn pool(&self) -> &Arc<dyn DatabasePool> {
        &self.pool
    }

    pub fn table_name_for(&self, type_name: &str) -> String {
        self.naming.table_name(type_name)
    }

    /// Resolve the table for `type_name` and introspect its columns
    pub async fn bind(&self, type_name: &str) -> OrmResult<TableBinding> {
        let table = self.table_name_for(type_name);
        let columns = TableSchema::introspect(self.pool.as_ref(), &table).await?;

        if columns.is_empty() {
            return Err(OrmError::UnknownTable {
                type_name: type_name.to_string(),
                table,
            });
        }

        debug!(type_name, table = %table, columns = columns.len(), "bound table");

        Ok(TableBinding {
            type_name: type_name.to_string(),
            schema: Arc::new(TableSchema::new(table, columns)),
        })
    }

    /// Introspect again, e.g. after migrations changed the table.
    ///
    /// Records created from the old binding keep the old schema.
    pub async fn refresh(&self, binding: &TableBinding) -> OrmResult<TableBinding> {
        self.bind(&binding.type_name).await
    }

    pub fn columns<'a>(&self, binding: &'a TableBinding) -> &'a [ColumnDescriptor] {
        binding.columns()
    }
}
