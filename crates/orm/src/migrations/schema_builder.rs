//! Schema Builder - DSL for declaring schema changes in code
//!
//! Provides a fluent interface that records `SchemaOperation`s. Nothing is
//! rendered until the runner applies the operations against a dialect.

use super::operations::{ColumnDefinition, ColumnType, SchemaOperation, TableDefinition};

/// Records schema operations in declaration order
pub struct SchemaBuilder {
    operations: Vec<SchemaOperation>,
}

impl SchemaBuilder {
    /// Create a new schema builder
    pub fn new() -> Self {
        Self {
            operations: Vec::new(),
        }
    }

    /// Create a new table
    pub fn create_table<F>(&mut self, table_name: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table_builder = TableBuilder::new(table_name);
        callback(&mut table_builder);

        self.operations.push(table_builder.into_operation());
        self
    }

    /// Drop a table. Without a definition the drop cannot be inverted.
    pub fn drop_table(&mut self, table_name: &str) -> &mut Self {
        self.operations.push(SchemaOperation::DropTable {
            table: table_name.to_string(),
            definition: None,
        });
        self
    }

    /// Drop a table, recording its definition so the drop can be inverted
    pub fn drop_table_with<F>(&mut self, table_name: &str, callback: F) -> &mut Self
    where
        F: FnOnce(&mut TableBuilder),
    {
        let mut table_builder = TableBuilder::new(table_name);
        callback(&mut table_builder);

        self.operations.push(SchemaOperation::DropTable {
            table: table_name.to_string(),
            definition: Some(table_builder.definition),
        });
        self
    }

    /// Add a column to existing table
    pub fn add_column(&mut self, table_name: &str, column: ColumnDefinition) -> &mut Self {
        self.operations.push(SchemaOperation::AddColumn {
            table: table_name.to_string(),
            column,
        });
        self
    }

    /// Drop a column. Without a definition the drop cannot be inverted.
    pub fn remove_column(&mut self, table_name: &str, column_name: &str) -> &mut Self {
        self.operations.push(SchemaOperation::RemoveColumn {
            table: table_name.to_string(),
            column: column_name.to_string(),
            definition: None,
        });
        self
    }

    /// Drop a column, recording its definition so the drop can be inverted
    pub fn remove_column_with(&mut self, table_name: &str, column: ColumnDefinition) -> &mut Self {
        self.operations.push(SchemaOperation::RemoveColumn {
            table: table_name.to_string(),
            column: column.name.clone(),
            definition: Some(column),
        });
        self
    }

    pub fn rename_table(&mut self, from: &str, to: &str) -> &mut Self {
        self.operations.push(SchemaOperation::RenameTable {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn rename_column(&mut self, table_name: &str, from: &str, to: &str) -> &mut Self {
        self.operations.push(SchemaOperation::RenameColumn {
            table: table_name.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    /// Run an arbitrary statement
    pub fn execute(&mut self, sql: &str) -> &mut Self {
        self.operations.push(SchemaOperation::Raw {
            sql: sql.trim().trim_end_matches(';').to_string(),
        });
        self
    }

    /// Recorded operations, in declaration order
    pub fn operations(&self) -> &[SchemaOperation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<SchemaOperation> {
        self.operations
    }
}

/// Table builder for create_table and drop_table_with
///
/// Column modifiers (`not_null`, `unique`, `default`, ...) apply to the most
/// recently added column.
pub struct TableBuilder {
    table_name: String,
    definition: TableDefinition,
}

impl TableBuilder {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            definition: TableDefinition::default(),
        }
    }

    /// Add a column
    pub fn column(&mut self, name: &str, column_type: ColumnType) -> &mut Self {
        self.definition.columns.push(ColumnDefinition::new(name, column_type));
        self
    }

    /// Add an ID column (auto-increment primary key)
    pub fn id(&mut self, name: &str) -> &mut Self {
        let mut column = ColumnDefinition::new(name, ColumnType::Id);
        column.nullable = false;
        column.primary_key = true;
        self.definition.columns.push(column);
        self
    }

    /// Add a string column, `TEXT` when no length is given
    pub fn string(&mut self, name: &str, length: Option<u32>) -> &mut Self {
        self.column(name, ColumnType::String(length))
    }

    pub fn text(&mut self, name: &str) -> &mut Self {
        self.column(name, ColumnType::Text)
    }

    pub fn integer(&mut self, name: &str) -> &mut Self {
        self.column(name, ColumnType::Integer)
    }

    pub fn big_integer(&mut self, name: &str) -> &mut Self {
        self.column(name, ColumnType::BigInteger)
    }

    pub fn boolean(&mut self, name: &str) -> &mut Self {
        self.column(name, ColumnType::Boolean)
    }

    pub fn float(&mut self, name: &str) -> &mut Self {
        self.column(name, ColumnType::Float)
    }

    pub fn timestamp(&mut self, name: &str) -> &mut Self {
        self.column(name, ColumnType::Timestamp)
    }

    pub fn uuid(&mut self, name: &str) -> &mut Self {
        self.column(name, ColumnType::Uuid)
    }

    pub fn json(&mut self, name: &str) -> &mut Self {
        self.column(name, ColumnType::Json)
    }

    /// Add created_at and updated_at columns
    pub fn timestamps(&mut self) -> &mut Self {
        for name in ["created_at", "updated_at"] {
            self.timestamp(name).not_null().default("CURRENT_TIMESTAMP");
        }
        self
    }

    pub fn not_null(&mut self) -> &mut Self {
        self.modify_last(|column| column.nullable = false)
    }

    pub fn nullable(&mut self) -> &mut Self {
        self.modify_last(|column| column.nullable = true)
    }

    pub fn unique(&mut self) -> &mut Self {
        self.modify_last(|column| column.unique = true)
    }

    pub fn default(&mut self, expression: &str) -> &mut Self {
        self.modify_last(|column| column.default = Some(expression.to_string()))
    }

    /// Add a composite primary key constraint
    pub fn primary_key(&mut self, columns: &[&str]) -> &mut Self {
        self.definition
            .constraints
            .push(format!("PRIMARY KEY ({})", columns.join(", ")));
        self
    }

    /// Add a foreign key constraint
    pub fn foreign_key(
        &mut self,
        column: &str,
        references_table: &str,
        references_column: &str,
    ) -> &mut Self {
        self.definition.constraints.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            column, references_table, references_column
        ));
        self
    }

    fn modify_last<F>(&mut self, modify: F) -> &mut Self
    where
        F: FnOnce(&mut ColumnDefinition),
    {
        if let Some(column) = self.definition.columns.last_mut() {
            modify(column);
        }
        self
    }

    fn into_operation(self) -> SchemaOperation {
        SchemaOperation::CreateTable {
            table: self.table_name,
            definition: self.definition,
        }
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SqlDialect;

    #[test]
    fn test_schema_builder() {
        let mut builder = SchemaBuilder::new();
        builder.create_table("users", |table| {
            table.id("id");
            table.string("name", Some(255)).not_null();
            table.string("email", Some(255)).unique();
            table.timestamps();
        });

        let operations = builder.into_operations();
        assert_eq!(operations.len(), 1);

        let sql = operations[0].to_sql(&SqlDialect::PostgreSQL);
        assert!(sql.contains("CREATE TABLE \"users\""));
        assert!(sql.contains("\"id\" BIGSERIAL PRIMARY KEY"));
        assert!(sql.contains("\"name\" VARCHAR(255) NOT NULL"));
        assert!(sql.contains("\"email\" VARCHAR(255) UNIQUE"));
        assert!(sql.contains("\"created_at\" TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP"));
    }

    #[test]
    fn test_table_builder_constraints() {
        let mut table = TableBuilder::new("posts");
        table.id("id");
        table.string("title", Some(255));
        table.text("content");
        table.integer("user_id");
        table.foreign_key("user_id", "users", "id");

        let sql = table.into_operation().to_sql(&SqlDialect::SQLite);
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"content\" TEXT"));
        assert!(sql.contains("FOREIGN KEY (user_id) REFERENCES users (id)"));
    }

    #[test]
    fn test_operations_keep_declaration_order() {
        let mut builder = SchemaBuilder::new();
        builder
            .create_table("artists", |table| {
                table.id("id");
            })
            .add_column("artists", ColumnDefinition::new("genre", ColumnType::Text))
            .rename_column("artists", "genre", "style")
            .execute("UPDATE artists SET style = 'jazz';");

        let descriptions: Vec<String> = builder.operations().iter().map(|op| op.describe()).collect();
        assert_eq!(
            descriptions,
            vec![
                "create_table(artists)",
                "add_column(artists, genre)",
                "rename_column(artists, genre, style)",
                "execute(UPDATE artists SET style = 'jazz')",
            ]
        );
    }

    #[test]
    fn test_drop_with_definition_is_invertible() {
        let mut builder = SchemaBuilder::new();
        builder
            .drop_table("legacy")
            .drop_table_with("artists", |table| {
                table.id("id");
            })
            .remove_column_with("songs", ColumnDefinition::new("length", ColumnType::Integer));

        let operations = builder.into_operations();
        assert!(operations[0].inverse().is_none());
        assert!(matches!(operations[1].inverse(), Some(SchemaOperation::CreateTable { .. })));
        assert!(matches!(operations[2].inverse(), Some(SchemaOperation::AddColumn { .. })));
    }
}
