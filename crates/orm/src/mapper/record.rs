//! Record - one row of a bound table with per-column dirty tracking

use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::backends::{DatabaseRow, DatabaseValue};
use crate::error::{OrmError, OrmResult};
use super::schema::TableSchema;

/// Lifecycle of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Built locally, no row yet
    New,
    /// Maps to a stored row
    Persisted,
    /// Row removed; the record can no longer be used
    Deleted,
}

#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<TableSchema>,
    values: HashMap<String, DatabaseValue>,
    dirty: BTreeSet<String>,
    state: RecordState,
    /// Primary-key value of the stored row, used to address updates and deletes
    persisted_key: Option<DatabaseValue>,
}

impl Record {
    pub(crate) fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema,
            values: HashMap::new(),
            dirty: BTreeSet::new(),
            state: RecordState::New,
            persisted_key: None,
        }
    }

    pub(crate) fn from_row(schema: Arc<TableSchema>, row: &dyn DatabaseRow) -> Self {
        let mut record = Self::new(schema);
        record.load_row(row);
        record
    }

    pub fn table(&self) -> &str {
        &self.schema.table
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn is_new(&self) -> bool {
        self.state == RecordState::New
    }

    pub fn is_deleted(&self) -> bool {
        self.state == RecordState::Deleted
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Columns changed since the last save, in schema order
    pub fn dirty_columns(&self) -> Vec<&str> {
        self.schema
            .column_names()
            .filter(|name| self.dirty.contains(*name))
            .collect()
    }

    /// Primary-key value of the stored row, `None` until persisted
    pub fn primary_key(&self) -> Option<&DatabaseValue> {
        self.persisted_key.as_ref()
    }

    /// Current value of `column`; `None` when never set on a new record
    pub fn get(&self, column: &str) -> OrmResult<Option<&DatabaseValue>> {
        self.ensure_live()?;
        self.schema.require_column(column)?;
        Ok(self.values.get(column))
    }

    /// Change `column` locally; nothing is written until save
    pub fn set(&mut self, column: &str, value: impl Into<DatabaseValue>) -> OrmResult<()> {
        self.ensure_live()?;
        self.schema.require_column(column)?;

        self.values.insert(column.to_string(), value.into());
        self.dirty.insert(column.to_string());
        Ok(())
    }

    pub fn values(&self) -> &HashMap<String, DatabaseValue> {
        &self.values
    }

    /// Known values as a JSON object, in schema order
    pub fn to_json(&self) -> JsonValue {
        let map: Map<String, JsonValue> = self
            .schema
            .column_names()
            .filter_map(|name| self.values.get(name).map(|value| (name.to_string(), value.to_json())))
            .collect();
        JsonValue::Object(map)
    }

    pub(crate) fn ensure_live(&self) -> OrmResult<()> {
        if self.is_deleted() {
            return Err(OrmError::StaleRecord {
                table: self.schema.table.clone(),
            });
        }
        Ok(())
    }

    /// Values to write, in schema order
    pub(crate) fn dirty_values(&self) -> Vec<(&str, DatabaseValue)> {
        self.dirty_columns()
            .into_iter()
            .map(|name| (name, self.values.get(name).cloned().unwrap_or(DatabaseValue::Null)))
            .collect()
    }

    /// Replace the values with a stored row and mark the record clean
    pub(crate) fn load_row(&mut self, row: &dyn DatabaseRow) {
        self.values = row
            .to_map()
            .into_iter()
            .filter(|(name, _)| self.schema.has_column(name))
            .collect();
        self.mark_saved();
    }

    /// The record matches its stored row
    pub(crate) fn mark_saved(&mut self) {
        self.dirty.clear();
        self.state = RecordState::Persisted;
        self.persisted_key = self
            .schema
            .primary_key
            .as_ref()
            .and_then(|key| self.values.get(key))
            .filter(|value| !value.is_null())
            .cloned();
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.dirty.clear();
        self.state = RecordState::Deleted;
    }
}
