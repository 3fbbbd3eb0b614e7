//! Migration Definitions - Core types and structures for migrations
//!
//! Defines migration units, the ordered set they are loaded into, run
//! targets, configuration and run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{OrmError, OrmResult};
use super::operations::SchemaOperation;
use super::schema_builder::SchemaBuilder;

/// Ordered sequence key of a migration unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MigrationVersion(pub i64);

impl fmt::Display for MigrationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MigrationVersion {
    type Err = OrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(OrmError::Configuration(format!("Invalid migration version '{}'", s)));
        }
        digits
            .parse::<i64>()
            .map(MigrationVersion)
            .map_err(|e| OrmError::Configuration(format!("Invalid migration version '{}': {}", s, e)))
    }
}

impl From<i64> for MigrationVersion {
    fn from(value: i64) -> Self {
        MigrationVersion(value)
    }
}

/// Body of a migration unit
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationBody {
    /// Reversible body restricted to auto-invertible operations
    Change(Vec<SchemaOperation>),
    /// Explicit pair; an empty `down` makes the unit irreversible
    UpDown {
        up: Vec<SchemaOperation>,
        down: Vec<SchemaOperation>,
    },
}

/// Represents a database migration
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationUnit {
    version: MigrationVersion,
    name: String,
    body: MigrationBody,
    origin: Option<PathBuf>,
}

impl MigrationUnit {
    /// Build a reversible unit from a schema callback.
    ///
    /// Fails with a discovery error when the callback records an operation
    /// that cannot be inverted mechanically.
    pub fn change<F>(version: i64, name: impl Into<String>, define: F) -> OrmResult<Self>
    where
        F: FnOnce(&mut SchemaBuilder),
    {
        let mut schema = SchemaBuilder::new();
        define(&mut schema);
        Self::from_change(MigrationVersion(version), name.into(), schema.into_operations(), None)
    }

    /// Build a unit with explicit up and down callbacks
    pub fn up_down<U, D>(version: i64, name: impl Into<String>, up: U, down: D) -> Self
    where
        U: FnOnce(&mut SchemaBuilder),
        D: FnOnce(&mut SchemaBuilder),
    {
        let mut up_schema = SchemaBuilder::new();
        up(&mut up_schema);
        let mut down_schema = SchemaBuilder::new();
        down(&mut down_schema);

        Self {
            version: MigrationVersion(version),
            name: name.into(),
            body: MigrationBody::UpDown {
                up: up_schema.into_operations(),
                down: down_schema.into_operations(),
            },
            origin: None,
        }
    }

    pub(crate) fn from_change(
        version: MigrationVersion,
        name: String,
        operations: Vec<SchemaOperation>,
        origin: Option<PathBuf>,
    ) -> OrmResult<Self> {
        if let Some(operation) = operations.iter().find(|op| op.inverse().is_none()) {
            return Err(OrmError::Discovery {
                origin: describe_origin(version, &name, origin.as_ref()),
                reason: format!(
                    "'{}' is not auto-invertible and cannot appear in a change section; use up/down sections",
                    operation.describe()
                ),
            });
        }

        Ok(Self {
            version,
            name,
            body: MigrationBody::Change(operations),
            origin,
        })
    }

    pub(crate) fn from_up_down(
        version: MigrationVersion,
        name: String,
        up: Vec<SchemaOperation>,
        down: Vec<SchemaOperation>,
        origin: Option<PathBuf>,
    ) -> Self {
        Self {
            version,
            name,
            body: MigrationBody::UpDown { up, down },
            origin,
        }
    }

    pub fn version(&self) -> MigrationVersion {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &MigrationBody {
        &self.body
    }

    /// File the unit was loaded from, if any
    pub fn origin(&self) -> Option<&PathBuf> {
        self.origin.as_ref()
    }

    /// Operations run when applying the unit
    pub fn forward_operations(&self) -> &[SchemaOperation] {
        match &self.body {
            MigrationBody::Change(operations) => operations,
            MigrationBody::UpDown { up, .. } => up,
        }
    }

    /// Operations run when reverting the unit, most recent change first
    pub fn reverse_operations(&self) -> OrmResult<Vec<SchemaOperation>> {
        match &self.body {
            MigrationBody::Change(operations) => operations
                .iter()
                .rev()
                .map(|op| op.inverse().ok_or_else(|| OrmError::Irreversible(op.describe())))
                .collect(),
            MigrationBody::UpDown { down, .. } if down.is_empty() => {
                Err(OrmError::Irreversible("up without down".to_string()))
            }
            MigrationBody::UpDown { down, .. } => Ok(down.clone()),
        }
    }

    pub fn is_reversible(&self) -> bool {
        self.reverse_operations().is_ok()
    }
}

fn describe_origin(version: MigrationVersion, name: &str, origin: Option<&PathBuf>) -> String {
    match origin {
        Some(path) => path.display().to_string(),
        None => format!("{} ({})", version, name),
    }
}

/// Loaded migration units in ascending version order, versions unique
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    units: Vec<MigrationUnit>,
}

impl MigrationSet {
    pub fn new(units: Vec<MigrationUnit>) -> OrmResult<Self> {
        let mut by_version: BTreeMap<MigrationVersion, MigrationUnit> = BTreeMap::new();

        for unit in units {
            if let Some(existing) = by_version.get(&unit.version) {
                return Err(OrmError::Discovery {
                    origin: describe_origin(unit.version, &unit.name, unit.origin.as_ref()),
                    reason: format!(
                        "sequence key {} is already used by '{}'",
                        unit.version, existing.name
                    ),
                });
            }
            by_version.insert(unit.version, unit);
        }

        Ok(Self {
            units: by_version.into_values().collect(),
        })
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &MigrationUnit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, version: MigrationVersion) -> Option<&MigrationUnit> {
        self.units
            .binary_search_by_key(&version, |unit| unit.version)
            .ok()
            .map(|index| &self.units[index])
    }

    pub fn contains(&self, version: MigrationVersion) -> bool {
        self.get(version).is_some()
    }

    pub fn latest(&self) -> Option<MigrationVersion> {
        self.units.last().map(|unit| unit.version)
    }
}

/// Migration state recorded in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Migration sequence key
    pub version: MigrationVersion,
    /// Name at the time the unit was applied
    pub name: String,
    /// When the migration was applied
    pub applied_at: DateTime<Utc>,
}

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Directory where migration files are stored
    pub migrations_dir: PathBuf,
    /// Table name for the migration ledger
    pub ledger_table: String,
    /// Wrap each unit in a transaction; `None` follows the dialect
    pub transactional_ddl: Option<bool>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            ledger_table: "schema_migrations".to_string(),
            transactional_ddl: None,
        }
    }
}

/// Where `migrate` stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateTarget {
    Latest,
    Version(MigrationVersion),
}

/// Where `rollback` stops; units above the target are reverted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackTarget {
    /// Revert only the most recently applied unit
    Previous,
    /// Revert every applied unit with a greater version
    Version(MigrationVersion),
    /// Revert every applied unit
    All,
}

/// Result of running migrations
#[derive(Debug, Clone, Default)]
pub struct MigrationRunResult {
    /// Versions applied by this run, ascending
    pub applied: Vec<MigrationVersion>,
    /// Number of units that were already applied
    pub skipped_count: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Result of rolling back migrations
#[derive(Debug, Clone, Default)]
pub struct RollbackResult {
    /// Versions reverted by this run, descending
    pub reverted: Vec<MigrationVersion>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    /// Apply the migration
    Up,
    /// Revert the migration
    Down,
}

/// Migration status in the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied { applied_at: DateTime<Utc> },
}

/// One line of `status` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatusEntry {
    pub version: MigrationVersion,
    pub name: String,
    pub status: MigrationStatus,
    /// Applied according to the ledger but no longer loaded
    pub definition_missing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::operations::{ColumnDefinition, ColumnType};

    #[test]
    fn test_version_parsing() {
        assert_eq!("0042".parse::<MigrationVersion>().unwrap(), MigrationVersion(42));
        assert!("v1".parse::<MigrationVersion>().is_err());
        assert!("".parse::<MigrationVersion>().is_err());
    }

    #[test]
    fn test_change_reverts_in_reverse_order() {
        let unit = MigrationUnit::change(1, "artists", |schema| {
            schema.create_table("artists", |table| {
                table.id("id");
            });
            schema.add_column("artists", ColumnDefinition::new("name", ColumnType::String(None)));
        })
        .unwrap();

        let reverse = unit.reverse_operations().unwrap();
        assert_eq!(reverse.len(), 2);
        assert!(matches!(
            &reverse[0],
            SchemaOperation::RemoveColumn { table, column, .. } if table == "artists" && column == "name"
        ));
        assert!(matches!(&reverse[1], SchemaOperation::DropTable { table, .. } if table == "artists"));
    }

    #[test]
    fn test_change_rejects_raw_statements() {
        let result = MigrationUnit::change(2, "seed", |schema| {
            schema.execute("INSERT INTO artists (name) VALUES ('Jon')");
        });

        assert!(matches!(result, Err(OrmError::Discovery { .. })));
    }

    #[test]
    fn test_up_without_down_is_irreversible() {
        let unit = MigrationUnit::up_down(
            3,
            "seed",
            |schema| {
                schema.execute("INSERT INTO artists (name) VALUES ('Jon')");
            },
            |_| {},
        );

        assert!(!unit.is_reversible());
        assert!(matches!(unit.reverse_operations(), Err(OrmError::Irreversible(_))));
    }

    #[test]
    fn test_set_orders_and_rejects_duplicates() {
        let make = |version: i64| MigrationUnit::up_down(version, format!("unit {}", version), |_| {}, |_| {});

        let set = MigrationSet::new(vec![make(3), make(1), make(2)]).unwrap();
        let versions: Vec<i64> = set.iter().map(|unit| unit.version().0).collect();
        assert_eq!(versions, vec![1, 2, 3]);
        assert_eq!(set.latest(), Some(MigrationVersion(3)));
        assert!(set.get(MigrationVersion(2)).is_some());

        let duplicate = MigrationSet::new(vec![make(1), make(1)]);
        assert!(matches!(duplicate, Err(OrmError::Discovery { .. })));
    }
}
