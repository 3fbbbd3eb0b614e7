//! CRUD Operations - Create, Read, Update, Delete for mapped records
//!
//! Statements are built per dialect with positional parameters. Inserts and
//! updates only write dirty columns.

use std::sync::Arc;

use crate::backends::{DatabaseValue, QueryParams};
use crate::error::{OrmError, OrmResult};
use super::record::{Record, RecordState};
use super::schema::TableSchema;
use super::{Mapper, TableBinding};

impl Mapper {
    /// Build a new, unsaved record. Every initial value counts as dirty.
    pub fn new_record(&self, binding: &TableBinding, initial: &[(&str, DatabaseValue)]) -> OrmResult<Record> {
        for (column, _) in initial {
            binding.schema().require_column(column)?;
        }

        let mut record = Record::new(binding_schema(binding));
        for (column, value) in initial {
            record.set(column, value.clone())?;
        }
        Ok(record)
    }

    /// First row matching every criterion, or `None`.
    ///
    /// Empty criteria match any row; a NULL criterion matches NULL columns.
    pub async fn find(&self, binding: &TableBinding, criteria: &[(&str, DatabaseValue)]) -> OrmResult<Option<Record>> {
        let dialect = self.pool().dialect();
        let mut params = QueryParams::new(dialect);
        let mut conditions = Vec::with_capacity(criteria.len());

        for (column, value) in criteria {
            binding.schema().require_column(column)?;
            let column = dialect.quote_identifier(column);
            if value.is_null() {
                conditions.push(format!("{} IS NULL", column));
            } else {
                conditions.push(format!("{} = {}", column, params.push(value.clone())));
            }
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT * FROM {}{} LIMIT 1",
            dialect.quote_identifier(binding.table()),
            where_clause
        );

        let row = self.pool().fetch_optional(&sql, params.values()).await?;
        Ok(row.map(|row| Record::from_row(binding_schema(binding), row.as_ref())))
    }

    /// Every row of the table, in driver order
    pub async fn all(&self, binding: &TableBinding) -> OrmResult<Vec<Record>> {
        let sql = format!(
            "SELECT * FROM {}",
            self.pool().dialect().quote_identifier(binding.table())
        );

        let rows = self.pool().fetch_all(&sql, &[]).await?;
        Ok(rows
            .iter()
            .map(|row| Record::from_row(binding_schema(binding), row.as_ref()))
            .collect())
    }

    /// Flush the record: INSERT when new, UPDATE of dirty columns when
    /// persisted. On failure the record keeps its previous state.
    pub async fn save(&self, record: &mut Record) -> OrmResult<()> {
        match record.state() {
            RecordState::New => self.insert(record).await,
            RecordState::Persisted if !record.is_dirty() => Ok(()),
            RecordState::Persisted => self.update(record).await,
            RecordState::Deleted => record.ensure_live(),
        }
    }

    /// Delete the stored row and retire the record
    pub async fn delete(&self, record: &mut Record) -> OrmResult<()> {
        record.ensure_live()?;

        let (key_column, key) = match (&record.schema().primary_key, record.primary_key()) {
            (Some(column), Some(key)) if record.state() == RecordState::Persisted => (column.clone(), key.clone()),
            _ => {
                return Err(OrmError::NotPersisted {
                    table: record.table().to_string(),
                })
            }
        };

        let dialect = self.pool().dialect();
        let mut params = QueryParams::new(dialect);
        let sql = format!(
            "DELETE FROM {} WHERE {} = {}",
            dialect.quote_identifier(record.table()),
            dialect.quote_identifier(&key_column),
            params.push(key)
        );

        self.pool()
            .execute(&sql, params.values())
            .await
            .map_err(|cause| persistence_error(record.table(), cause))?;

        record.mark_deleted();
        Ok(())
    }

    async fn insert(&self, record: &mut Record) -> OrmResult<()> {
        let dialect = self.pool().dialect();
        let table = dialect.quote_identifier(record.table());

        let mut params = QueryParams::new(dialect);
        let sql = {
            let values = record.dirty_values();
            if values.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES RETURNING *", table)
            } else {
                let columns: Vec<String> = values.iter().map(|(name, _)| dialect.quote_identifier(name)).collect();
                let placeholders: Vec<String> = values.into_iter().map(|(_, value)| params.push(value)).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
                    table,
                    columns.join(", "),
                    placeholders.join(", ")
                )
            }
        };

        let row = self
            .pool()
            .fetch_optional(&sql, params.values())
            .await
            .map_err(|cause| persistence_error(record.table(), cause))?
            .ok_or_else(|| {
                persistence_error(
                    record.table(),
                    OrmError::Query("INSERT returned no row".to_string()),
                )
            })?;

        record.load_row(row.as_ref());
        Ok(())
    }

    async fn update(&self, record: &mut Record) -> OrmResult<()> {
        let (key_column, key) = match (&record.schema().primary_key, record.primary_key()) {
            (Some(column), Some(key)) => (column.clone(), key.clone()),
            _ => {
                return Err(persistence_error(
                    record.table(),
                    OrmError::Configuration("table has no single-column primary key to address the row".to_string()),
                ))
            }
        };

        let dialect = self.pool().dialect();
        let mut params = QueryParams::new(dialect);
        let assignments: Vec<String> = record
            .dirty_values()
            .into_iter()
            .map(|(name, value)| format!("{} = {}", dialect.quote_identifier(name), params.push(value)))
            .collect();

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            dialect.quote_identifier(record.table()),
            assignments.join(", "),
            dialect.quote_identifier(&key_column),
            params.push(key)
        );

        let affected = self
            .pool()
            .execute(&sql, params.values())
            .await
            .map_err(|cause| persistence_error(record.table(), cause))?;

        if affected == 0 {
            return Err(persistence_error(
                record.table(),
                OrmError::Query("no row matched the record's primary key".to_string()),
            ));
        }

        record.mark_saved();
        Ok(())
    }
}

fn binding_schema(binding: &TableBinding) -> Arc<TableSchema> {
    binding.schema.clone()
}

fn persistence_error(table: &str, cause: OrmError) -> OrmError {
    OrmError::Persistence {
        table: table.to_string(),
        cause: Box::new(cause),
    }
}
