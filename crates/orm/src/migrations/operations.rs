//! Schema Operations - the fixed set of changes a migration can make
//!
//! Every operation renders to dialect-specific DDL. All but `Raw` have a
//! mechanical inverse, provided drops carry the definition they remove.

use serde::{Deserialize, Serialize};

use crate::backends::SqlDialect;

/// Portable column types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// Generated integer primary key
    Id,
    String(Option<u32>),
    Text,
    Integer,
    BigInteger,
    Boolean,
    Float,
    Timestamp,
    Date,
    Uuid,
    Json,
    Binary,
    /// Type written verbatim, as parsed from a migration file
    Custom(String),
}

impl ColumnType {
    pub fn to_sql(&self, dialect: &SqlDialect) -> String {
        match (self, dialect) {
            (ColumnType::Id, _) => dialect.auto_increment_primary_key().to_string(),
            (ColumnType::String(Some(length)), _) => format!("VARCHAR({})", length),
            (ColumnType::String(None), _) | (ColumnType::Text, _) => "TEXT".to_string(),
            (ColumnType::Integer, _) => "INTEGER".to_string(),
            (ColumnType::BigInteger, _) => "BIGINT".to_string(),
            (ColumnType::Boolean, _) => "BOOLEAN".to_string(),
            (ColumnType::Float, SqlDialect::PostgreSQL) => "DOUBLE PRECISION".to_string(),
            (ColumnType::Float, SqlDialect::SQLite) => "REAL".to_string(),
            (ColumnType::Timestamp, _) => dialect.timestamp_type().to_string(),
            (ColumnType::Date, _) => "DATE".to_string(),
            (ColumnType::Uuid, SqlDialect::PostgreSQL) => "UUID".to_string(),
            (ColumnType::Uuid, SqlDialect::SQLite) => "BLOB".to_string(),
            (ColumnType::Json, SqlDialect::PostgreSQL) => "JSONB".to_string(),
            (ColumnType::Json, SqlDialect::SQLite) => "TEXT".to_string(),
            (ColumnType::Binary, SqlDialect::PostgreSQL) => "BYTEA".to_string(),
            (ColumnType::Binary, SqlDialect::SQLite) => "BLOB".to_string(),
            (ColumnType::Custom(raw), _) => raw.clone(),
        }
    }
}

/// Column definition used by create_table and add_column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    /// Default expression, rendered verbatim
    pub default: Option<String>,
    /// Further column constraints, rendered verbatim
    pub constraints: Vec<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
            constraints: Vec::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    pub fn to_sql(&self, dialect: &SqlDialect) -> String {
        let mut parts = vec![dialect.quote_identifier(&self.name), self.column_type.to_sql(dialect)];
        let generated_key = self.column_type == ColumnType::Id;

        if self.primary_key && !generated_key {
            parts.push("PRIMARY KEY".to_string());
        }
        if !self.nullable && !generated_key {
            parts.push("NOT NULL".to_string());
        }
        if self.unique {
            parts.push("UNIQUE".to_string());
        }
        if let Some(default) = &self.default {
            parts.push(format!("DEFAULT {}", default));
        }
        parts.extend(self.constraints.iter().cloned());

        parts.join(" ")
    }
}

/// Columns and table-level constraints of a table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub columns: Vec<ColumnDefinition>,
    /// Table constraints such as `FOREIGN KEY (...)`, rendered verbatim
    pub constraints: Vec<String>,
}

/// A single schema change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaOperation {
    CreateTable {
        table: String,
        definition: TableDefinition,
    },
    /// Invertible only when the dropped definition is known
    DropTable {
        table: String,
        definition: Option<TableDefinition>,
    },
    AddColumn {
        table: String,
        column: ColumnDefinition,
    },
    /// Invertible only when the dropped definition is known
    RemoveColumn {
        table: String,
        column: String,
        definition: Option<ColumnDefinition>,
    },
    RenameTable {
        from: String,
        to: String,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    /// Arbitrary statement, never inverted automatically
    Raw {
        sql: String,
    },
}

impl SchemaOperation {
    /// Short identity used in logs and error messages
    pub fn describe(&self) -> String {
        match self {
            SchemaOperation::CreateTable { table, .. } => format!("create_table({})", table),
            SchemaOperation::DropTable { table, .. } => format!("drop_table({})", table),
            SchemaOperation::AddColumn { table, column } => format!("add_column({}, {})", table, column.name),
            SchemaOperation::RemoveColumn { table, column, .. } => format!("remove_column({}, {})", table, column),
            SchemaOperation::RenameTable { from, to } => format!("rename_table({}, {})", from, to),
            SchemaOperation::RenameColumn { table, from, to } => {
                format!("rename_column({}, {}, {})", table, from, to)
            }
            SchemaOperation::Raw { sql } => {
                let head: String = sql.chars().take(48).collect();
                if head.len() < sql.len() {
                    format!("execute({}...)", head)
                } else {
                    format!("execute({})", head)
                }
            }
        }
    }

    /// The operation undoing this one, if it can be derived mechanically
    pub fn inverse(&self) -> Option<SchemaOperation> {
        match self {
            SchemaOperation::CreateTable { table, definition } => Some(SchemaOperation::DropTable {
                table: table.clone(),
                definition: Some(definition.clone()),
            }),
            SchemaOperation::DropTable { table, definition } => {
                definition.as_ref().map(|definition| SchemaOperation::CreateTable {
                    table: table.clone(),
                    definition: definition.clone(),
                })
            }
            SchemaOperation::AddColumn { table, column } => Some(SchemaOperation::RemoveColumn {
                table: table.clone(),
                column: column.name.clone(),
                definition: Some(column.clone()),
            }),
            SchemaOperation::RemoveColumn { table, definition, .. } => {
                definition.as_ref().map(|column| SchemaOperation::AddColumn {
                    table: table.clone(),
                    column: column.clone(),
                })
            }
            SchemaOperation::RenameTable { from, to } => Some(SchemaOperation::RenameTable {
                from: to.clone(),
                to: from.clone(),
            }),
            SchemaOperation::RenameColumn { table, from, to } => Some(SchemaOperation::RenameColumn {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            }),
            SchemaOperation::Raw { .. } => None,
        }
    }

    /// Render the operation as a single statement
    pub fn to_sql(&self, dialect: &SqlDialect) -> String {
        match self {
            SchemaOperation::CreateTable { table, definition } => {
                let mut parts: Vec<String> = definition
                    .columns
                    .iter()
                    .map(|column| column.to_sql(dialect))
                    .collect();
                parts.extend(definition.constraints.iter().cloned());

                format!(
                    "CREATE TABLE {} (\n    {}\n)",
                    dialect.quote_identifier(table),
                    parts.join(",\n    ")
                )
            }
            SchemaOperation::DropTable { table, .. } => {
                format!("DROP TABLE {}", dialect.quote_identifier(table))
            }
            SchemaOperation::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                dialect.quote_identifier(table),
                column.to_sql(dialect)
            ),
            SchemaOperation::RemoveColumn { table, column, .. } => format!(
                "ALTER TABLE {} DROP COLUMN {}",
                dialect.quote_identifier(table),
                dialect.quote_identifier(column)
            ),
            SchemaOperation::RenameTable { from, to } => format!(
                "ALTER TABLE {} RENAME TO {}",
                dialect.quote_identifier(from),
                dialect.quote_identifier(to)
            ),
            SchemaOperation::RenameColumn { table, from, to } => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                dialect.quote_identifier(table),
                dialect.quote_identifier(from),
                dialect.quote_identifier(to)
            ),
            SchemaOperation::Raw { sql } => sql.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artists() -> TableDefinition {
        TableDefinition {
            columns: vec![
                ColumnDefinition::new("id", ColumnType::Id),
                ColumnDefinition::new("name", ColumnType::String(Some(255))).not_null(),
            ],
            constraints: Vec::new(),
        }
    }

    #[test]
    fn test_create_table_renders_per_dialect() {
        let op = SchemaOperation::CreateTable {
            table: "artists".to_string(),
            definition: artists(),
        };

        let pg = op.to_sql(&SqlDialect::PostgreSQL);
        assert!(pg.starts_with("CREATE TABLE \"artists\""));
        assert!(pg.contains("\"id\" BIGSERIAL PRIMARY KEY"));
        assert!(pg.contains("\"name\" VARCHAR(255) NOT NULL"));

        let sqlite = op.to_sql(&SqlDialect::SQLite);
        assert!(sqlite.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
    }

    #[test]
    fn test_column_modifiers() {
        let column = ColumnDefinition::new("email", ColumnType::Text)
            .not_null()
            .unique()
            .default("''");

        assert_eq!(
            column.to_sql(&SqlDialect::PostgreSQL),
            "\"email\" TEXT NOT NULL UNIQUE DEFAULT ''"
        );
    }

    #[test]
    fn test_inverse_pairs() {
        let create = SchemaOperation::CreateTable {
            table: "artists".to_string(),
            definition: artists(),
        };
        let drop = create.inverse().unwrap();
        assert!(matches!(&drop, SchemaOperation::DropTable { definition: Some(_), .. }));
        assert_eq!(drop.inverse().unwrap(), create);

        let add = SchemaOperation::AddColumn {
            table: "artists".to_string(),
            column: ColumnDefinition::new("genre", ColumnType::Text),
        };
        assert_eq!(add.inverse().unwrap().inverse().unwrap(), add);

        let rename = SchemaOperation::RenameColumn {
            table: "artists".to_string(),
            from: "name".to_string(),
            to: "title".to_string(),
        };
        assert_eq!(
            rename.inverse().unwrap().to_sql(&SqlDialect::SQLite),
            "ALTER TABLE \"artists\" RENAME COLUMN \"title\" TO \"name\""
        );
    }

    #[test]
    fn test_operations_without_definition_do_not_invert() {
        let drop = SchemaOperation::DropTable {
            table: "artists".to_string(),
            definition: None,
        };
        let remove = SchemaOperation::RemoveColumn {
            table: "artists".to_string(),
            column: "genre".to_string(),
            definition: None,
        };
        let raw = SchemaOperation::Raw {
            sql: "UPDATE artists SET name = 'x'".to_string(),
        };

        assert!(drop.inverse().is_none());
        assert!(remove.inverse().is_none());
        assert!(raw.inverse().is_none());
        assert_eq!(raw.describe(), "execute(UPDATE artists SET name = 'x')");
    }
}
