//! Table Schema - columns introspected from the live database

use serde::Serialize;

use crate::backends::{DatabasePool, DatabaseValue};
use crate::error::{OrmError, OrmResult};

/// Coarse type of a column, derived from its database type name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ColumnTypeTag {
    String,
    Integer,
    Float,
    /// Exact numeric; values arrive as decimal text on PostgreSQL
    Decimal,
    Boolean,
    DateTime,
    Date,
    Time,
    Uuid,
    Json,
    Bytes,
    Other(String),
}

impl ColumnTypeTag {
    pub fn from_database_type(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        let t = lowered.as_str();

        // interval and point contain "int"
        if t.is_empty() || t.contains("interval") || t.contains("point") {
            ColumnTypeTag::Other(raw.to_string())
        } else if t.starts_with("bool") {
            ColumnTypeTag::Boolean
        } else if t.contains("timestamp") || t.contains("datetime") {
            ColumnTypeTag::DateTime
        } else if t == "date" {
            ColumnTypeTag::Date
        } else if t.starts_with("time") {
            ColumnTypeTag::Time
        } else if t == "uuid" {
            ColumnTypeTag::Uuid
        } else if t.contains("json") {
            ColumnTypeTag::Json
        } else if t.contains("int") || t.contains("serial") {
            ColumnTypeTag::Integer
        } else if t.contains("char") || t.contains("text") || t.contains("clob") {
            ColumnTypeTag::String
        } else if t.contains("numeric") || t.contains("decimal") {
            ColumnTypeTag::Decimal
        } else if ["real", "floa", "doub"].iter().any(|p| t.contains(p)) {
            ColumnTypeTag::Float
        } else if t.contains("blob") || t == "bytea" || t.contains("binary") {
            ColumnTypeTag::Bytes
        } else {
            ColumnTypeTag::Other(raw.to_string())
        }
    }
}

/// One introspected column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_tag: ColumnTypeTag,
    /// Type name as reported by the database
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
}

/// Physical schema of a bound table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    /// Set only when the table has exactly one primary-key column
    pub primary_key: Option<String>,
}

impl TableSchema {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        let mut key_columns = columns.iter().filter(|column| column.primary_key);
        let primary_key = match (key_columns.next(), key_columns.next()) {
            (Some(column), None) => Some(column.name.clone()),
            _ => None,
        };

        Self {
            table: table.into(),
            columns,
            primary_key,
        }
    }

    /// Read the table's columns in ordinal order; no columns means no table
    pub async fn introspect(pool: &dyn DatabasePool, table: &str) -> OrmResult<Vec<ColumnDescriptor>> {
        let sql = pool.dialect().column_introspection_sql();
        let rows = pool
            .fetch_all(sql, &[DatabaseValue::String(table.to_string())])
            .await?;

        rows.iter()
            .map(|row| {
                let name = row
                    .get_by_name("name")?
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| OrmError::Query(format!("Column without a name in table '{}'", table)))?;
                let data_type = row.get_by_name("data_type")?.as_str().unwrap_or_default().to_string();
                let nullable = row.get_by_name("nullable")?.as_bool().unwrap_or(true);
                let primary_key = row.get_by_name("is_primary")?.as_bool().unwrap_or(false);

                Ok(ColumnDescriptor {
                    type_tag: ColumnTypeTag::from_database_type(&data_type),
                    name,
                    data_type,
                    nullable,
                    primary_key,
                })
            })
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    pub(crate) fn require_column(&self, name: &str) -> OrmResult<&ColumnDescriptor> {
        self.column(name).ok_or_else(|| OrmError::UnknownColumn {
            table: self.table.clone(),
            column: name.to_string(),
        })
    }
}
