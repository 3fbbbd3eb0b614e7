//! Migration SQL Parser
//!
//! Classifies the statements of a migration file into `SchemaOperation`s
//! using sqlparser. Statements outside the fixed operation set become `Raw`
//! and keep the text exactly as written.

use sqlparser::ast::helpers::stmt_create_table::CreateTableBuilder;
use sqlparser::ast::{
    AlterTableOperation, ColumnDef, ColumnOption, CreateTable, HiveFormat, Ident, ObjectName, ObjectType,
    Statement,
};
use sqlparser::dialect::{Dialect, GenericDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Token, TokenWithLocation, Tokenizer};
use tracing::debug;

use crate::backends::SqlDialect;
use crate::error::{OrmError, OrmResult};
use super::operations::{ColumnDefinition, ColumnType, SchemaOperation, TableDefinition};

/// Parse a section of SQL into operations, in statement order.
///
/// `dialect` selects the grammar; without one the generic grammar is used.
pub fn parse_operations(sql: &str, origin: &str, dialect: Option<SqlDialect>) -> OrmResult<Vec<SchemaOperation>> {
    if sql.trim().is_empty() {
        return Ok(Vec::new());
    }

    let statements = split_statements(sql, dialect).map_err(|e| OrmError::Discovery {
        origin: origin.to_string(),
        reason: format!("SQL could not be parsed: {}", e),
    })?;

    Ok(statements
        .into_iter()
        .flat_map(|(statement, text)| classify_statement(statement, text))
        .collect())
}

/// Like [`parse_operations`], but SQL the grammar cannot follow (trigger
/// bodies, procedural blocks) runs as one raw operation instead of failing
pub fn parse_operations_or_raw(sql: &str, origin: &str, dialect: Option<SqlDialect>) -> Vec<SchemaOperation> {
    parse_operations(sql, origin, dialect).unwrap_or_else(|e| {
        debug!(origin, error = %e, "section kept as raw SQL");
        vec![SchemaOperation::Raw {
            sql: sql.trim().to_string(),
        }]
    })
}

fn grammar(dialect: Option<SqlDialect>) -> Box<dyn Dialect> {
    match dialect {
        Some(SqlDialect::PostgreSQL) => Box::new(PostgreSqlDialect {}),
        Some(SqlDialect::SQLite) => Box::new(SQLiteDialect {}),
        None => Box::new(GenericDialect {}),
    }
}

/// Parse every statement and pair it with its source text
fn split_statements(sql: &str, dialect: Option<SqlDialect>) -> Result<Vec<(Statement, String)>, ParserError> {
    let grammar = grammar(dialect);
    let tokens = Tokenizer::new(&*grammar, sql).tokenize_with_location()?;
    let offsets = token_offsets(sql, &tokens);
    let offset = |index: usize| offsets.get(index).copied().unwrap_or(sql.len());

    let mut parser = Parser::new(&*grammar).with_tokens_with_locations(tokens);
    let mut statements = Vec::new();
    loop {
        while parser.consume_token(&Token::SemiColon) {}
        if parser.peek_token().token == Token::EOF {
            break;
        }

        let start = parser.index();
        let statement = parser.parse_statement()?;
        let end = parser.index();

        let next = parser.peek_token();
        if next.token != Token::SemiColon && next.token != Token::EOF {
            return parser.expected("end of statement", next);
        }

        statements.push((statement, sql[offset(start)..offset(end)].trim().to_string()));
    }

    Ok(statements)
}

/// Byte offset of each token. Token locations count lines and characters
/// from 1.
fn token_offsets(sql: &str, tokens: &[TokenWithLocation]) -> Vec<usize> {
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
        .collect();

    tokens
        .iter()
        .map(|token| {
            let line = usize::try_from(token.location.line).unwrap_or(usize::MAX).saturating_sub(1);
            let column = usize::try_from(token.location.column).unwrap_or(usize::MAX).saturating_sub(1);
            let Some(&line_start) = line_starts.get(line) else {
                return sql.len();
            };
            sql[line_start..]
                .char_indices()
                .nth(column)
                .map_or(sql.len(), |(i, _)| line_start + i)
        })
        .collect()
}

fn classify_statement(statement: Statement, text: String) -> Vec<SchemaOperation> {
    let operations = match &statement {
        Statement::CreateTable(create) => classify_create_table(create).map(|op| vec![op]),
        Statement::AlterTable { name, operations, .. } => classify_alter_table(name, operations),
        Statement::Drop {
            object_type: ObjectType::Table,
            names,
            if_exists: false,
            ..
        } => Some(
            names
                .iter()
                .map(|name| SchemaOperation::DropTable {
                    table: object_name(name),
                    definition: None,
                })
                .collect(),
        ),
        _ => None,
    };

    operations.unwrap_or_else(|| vec![SchemaOperation::Raw { sql: text }])
}

/// Only a plain `CREATE TABLE name (columns, constraints)` is typed. Table
/// options (STRICT, WITHOUT ROWID, WITH, AS, ...) have no place in a table
/// definition, so such statements run raw.
fn classify_create_table(create: &CreateTable) -> Option<SchemaOperation> {
    let mut written = create.clone();
    if written.hive_formats.as_ref() == Some(&HiveFormat::default()) {
        written.hive_formats = None;
    }
    let plain = CreateTableBuilder::new(create.name.clone())
        .columns(create.columns.clone())
        .constraints(create.constraints.clone())
        .build();
    if Statement::CreateTable(written) != plain {
        return None;
    }

    Some(SchemaOperation::CreateTable {
        table: object_name(&create.name),
        definition: TableDefinition {
            columns: create.columns.iter().map(column_definition).collect(),
            constraints: create.constraints.iter().map(|c| c.to_string()).collect(),
        },
    })
}

/// Every operation of the statement must be recognised, otherwise the whole
/// statement runs as raw SQL
fn classify_alter_table(name: &ObjectName, operations: &[AlterTableOperation]) -> Option<Vec<SchemaOperation>> {
    let table = object_name(name);

    operations
        .iter()
        .map(|operation| match operation {
            AlterTableOperation::AddColumn {
                column_def,
                if_not_exists: false,
                ..
            } => Some(SchemaOperation::AddColumn {
                table: table.clone(),
                column: column_definition(column_def),
            }),
            AlterTableOperation::DropColumn {
                column_name,
                if_exists: false,
                ..
            } => Some(SchemaOperation::RemoveColumn {
                table: table.clone(),
                column: identifier(column_name),
                definition: None,
            }),
            AlterTableOperation::RenameColumn {
                old_column_name,
                new_column_name,
            } => Some(SchemaOperation::RenameColumn {
                table: table.clone(),
                from: identifier(old_column_name),
                to: identifier(new_column_name),
            }),
            AlterTableOperation::RenameTable { table_name } => Some(SchemaOperation::RenameTable {
                from: table.clone(),
                to: object_name(table_name),
            }),
            _ => None,
        })
        .collect()
}

fn column_definition(column: &ColumnDef) -> ColumnDefinition {
    let column_type = match &column.collation {
        Some(collation) => format!("{} COLLATE {}", column.data_type, collation),
        None => column.data_type.to_string(),
    };
    let mut definition = ColumnDefinition::new(identifier(&column.name), ColumnType::Custom(column_type));

    for option_def in &column.options {
        match &option_def.option {
            ColumnOption::Null => definition.nullable = true,
            ColumnOption::NotNull => definition.nullable = false,
            ColumnOption::Default(expr) => definition.default = Some(expr.to_string()),
            ColumnOption::Unique { is_primary: true, .. } if option_def.name.is_none() => {
                definition.primary_key = true;
            }
            ColumnOption::Unique { is_primary: false, .. } if option_def.name.is_none() => {
                definition.unique = true;
            }
            _ => definition.constraints.push(option_def.to_string()),
        }
    }

    definition
}

/// Unquoted identifiers fold to lower case
fn identifier(ident: &Ident) -> String {
    match ident.quote_style {
        Some(_) => ident.value.clone(),
        None => ident.value.to_lowercase(),
    }
}

fn object_name(name: &ObjectName) -> String {
    name.0.iter().map(identifier).collect::<Vec<_>>().join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_is_classified() {
        let operations = parse_operations(
            "CREATE TABLE artists (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL);",
            "0001_create_artists.sql",
            Some(SqlDialect::SQLite),
        )
        .unwrap();

        assert_eq!(operations.len(), 1);
        match &operations[0] {
            SchemaOperation::CreateTable { table, definition } => {
                assert_eq!(table, "artists");
                assert_eq!(definition.columns.len(), 2);
                assert!(definition.columns[0].primary_key);
                assert!(!definition.columns[1].nullable);
            }
            other => panic!("unexpected operation {:?}", other),
        }

        let sql = operations[0].to_sql(&SqlDialect::SQLite);
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"name\" TEXT NOT NULL"));
    }

    #[test]
    fn test_alter_table_operations() {
        let operations = parse_operations(
            "ALTER TABLE Artists ADD COLUMN genre TEXT;\n\
             ALTER TABLE artists RENAME COLUMN genre TO style;\n\
             ALTER TABLE artists RENAME TO performers;\n\
             ALTER TABLE performers DROP COLUMN style;",
            "inline",
            None,
        )
        .unwrap();

        let descriptions: Vec<String> = operations.iter().map(|op| op.describe()).collect();
        assert_eq!(
            descriptions,
            vec![
                "add_column(artists, genre)",
                "rename_column(artists, genre, style)",
                "rename_table(artists, performers)",
                "remove_column(performers, style)",
            ]
        );
        assert!(operations[3].inverse().is_none());
    }

    #[test]
    fn test_unrecognised_statements_become_raw() {
        let operations = parse_operations(
            "INSERT INTO artists (name) VALUES ('Jon');\nDROP TABLE IF EXISTS legacy;\nDROP TABLE old;",
            "inline",
            None,
        )
        .unwrap();

        assert_eq!(
            operations[0],
            SchemaOperation::Raw {
                sql: "INSERT INTO artists (name) VALUES ('Jon')".to_string()
            }
        );
        assert!(matches!(&operations[1], SchemaOperation::Raw { .. }));
        assert!(matches!(
            &operations[2],
            SchemaOperation::DropTable { table, definition: None } if table == "old"
        ));
    }

    #[test]
    fn test_unparseable_sql_names_origin() {
        let error = parse_operations("CREATE TABLEE artists ()", "0002_broken.sql", None).unwrap_err();

        match error {
            OrmError::Discovery { origin, .. } => assert_eq!(origin, "0002_broken.sql"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_empty_section() {
        assert!(parse_operations("  \n ", "inline", None).unwrap().is_empty());
    }

    #[test]
    fn test_raw_statements_keep_source_text() {
        let sql = "insert into artists(name)\n  values ('Jon') ;\nUPDATE artists SET name = 'Jonny' WHERE id=1";
        let operations = parse_operations(sql, "inline", Some(SqlDialect::PostgreSQL)).unwrap();

        assert_eq!(
            operations,
            vec![
                SchemaOperation::Raw {
                    sql: "insert into artists(name)\n  values ('Jon')".to_string()
                },
                SchemaOperation::Raw {
                    sql: "UPDATE artists SET name = 'Jonny' WHERE id=1".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_table_options_are_not_dropped() {
        for sql in [
            "CREATE TABLE items (id INTEGER PRIMARY KEY, qty INTEGER) STRICT",
            "CREATE TABLE items (id INTEGER PRIMARY KEY, qty INTEGER) WITHOUT ROWID",
        ] {
            let operations = parse_operations(&format!("{};", sql), "inline", Some(SqlDialect::SQLite)).unwrap();
            assert_eq!(operations, vec![SchemaOperation::Raw { sql: sql.to_string() }]);
        }

        let with_options = parse_operations(
            "CREATE TABLE items (id INTEGER) WITH (fillfactor = 70);",
            "inline",
            Some(SqlDialect::PostgreSQL),
        )
        .unwrap();
        assert!(matches!(&with_options[0], SchemaOperation::Raw { sql } if sql.ends_with("WITH (fillfactor = 70)")));
    }

    #[test]
    fn test_column_collation_is_kept() {
        let operations = parse_operations(
            "CREATE TABLE artists (name TEXT COLLATE NOCASE NOT NULL);",
            "inline",
            Some(SqlDialect::SQLite),
        )
        .unwrap();

        let sql = operations[0].to_sql(&SqlDialect::SQLite);
        assert!(sql.contains("\"name\" TEXT COLLATE NOCASE NOT NULL"), "{}", sql);
    }

    #[test]
    fn test_procedural_sql_falls_back_to_raw() {
        let trigger = "CREATE TRIGGER items_qty AFTER INSERT ON items\n\
                       BEGIN\n\
                         UPDATE items SET qty = 0 WHERE qty IS NULL AND id = NEW.id;\n\
                       END;";

        assert!(matches!(
            parse_operations(trigger, "0002_qty_trigger.sql", Some(SqlDialect::SQLite)),
            Err(OrmError::Discovery { .. })
        ));
        assert_eq!(
            parse_operations_or_raw(trigger, "0002_qty_trigger.sql", Some(SqlDialect::SQLite)),
            vec![SchemaOperation::Raw {
                sql: trigger.to_string()
            }]
        );

        let function = "CREATE FUNCTION touch() RETURNS trigger AS $$ BEGIN RETURN NEW; END; $$ LANGUAGE plpgsql;";
        let operations = parse_operations_or_raw(function, "inline", Some(SqlDialect::PostgreSQL));
        assert_eq!(operations.len(), 1);
        assert!(matches!(&operations[0], SchemaOperation::Raw { sql } if sql.contains("$$ BEGIN RETURN NEW; END; $$")));
    }
}
