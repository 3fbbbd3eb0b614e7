//! Migration Manager - File system operations for migrations
//!
//! Discovers migration files, parses their sections into units and writes
//! new migration files from a template.

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{OrmError, OrmResult};
use super::definitions::{MigrationConfig, MigrationSet, MigrationUnit, MigrationVersion};
use crate::backends::SqlDialect;
use super::parser::{parse_operations, parse_operations_or_raw};

/// A discovered migration file before its body is parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSource {
    pub version: MigrationVersion,
    pub name: String,
    pub body: String,
    pub origin: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Change,
    Up,
    Down,
}

/// Migration manager for creating and loading migrations
pub struct MigrationManager {
    config: MigrationConfig,
    dialect: Option<SqlDialect>,
}

impl MigrationManager {
    /// Create a new migration manager with default configuration
    pub fn new() -> Self {
        Self::with_config(MigrationConfig::default())
    }

    /// Create a new migration manager with custom configuration
    pub fn with_config(config: MigrationConfig) -> Self {
        Self { config, dialect: None }
    }

    /// Parse migration SQL with the grammar of the target database
    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Create a new migration file and return its path
    pub fn create_migration(&self, name: &str) -> OrmResult<PathBuf> {
        let slug = name.trim().replace([' ', '-'], "_").to_lowercase();
        if slug.is_empty() || !slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(OrmError::Configuration(format!("Invalid migration name '{}'", name)));
        }

        fs::create_dir_all(&self.config.migrations_dir)?;

        let now = Utc::now();
        let filename = format!("{}_{}.sql", now.format("%Y%m%d_%H%M%S"), slug);
        let filepath = self.config.migrations_dir.join(&filename);
        if filepath.exists() {
            return Err(OrmError::Configuration(format!(
                "Migration file {} already exists",
                filepath.display()
            )));
        }

        let template = format!(
            "-- Migration: {}\n\
             -- Created: {}\n\n\
             -- change\n\
             -- Reversible schema changes: CREATE TABLE, ALTER TABLE ADD/RENAME.\n\
             -- Replace with \"-- up\" and \"-- down\" sections for anything else.\n\n",
            name.trim(),
            now.format("%Y-%m-%d %H:%M:%S UTC")
        );
        fs::write(&filepath, template)?;

        Ok(filepath)
    }

    /// Load and validate every migration file in the migrations directory
    pub fn load_migrations(&self) -> OrmResult<MigrationSet> {
        let units = self
            .discover()?
            .into_iter()
            .map(|source| Self::parse_source(&source, self.dialect))
            .collect::<OrmResult<Vec<_>>>()?;

        MigrationSet::new(units)
    }

    /// List the `*.sql` files of the migrations directory in name order.
    ///
    /// A missing directory yields no sources.
    pub fn discover(&self) -> OrmResult<Vec<MigrationSource>> {
        let dir = &self.config.migrations_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "sql") {
                paths.push(path);
            }
        }
        paths.sort();

        paths
            .into_iter()
            .map(|path| {
                let (version, name) = Self::parse_file_name(&path)?;
                let body = fs::read_to_string(&path)?;
                debug!(path = %path.display(), %version, "discovered migration file");

                Ok(MigrationSource {
                    version,
                    name,
                    body,
                    origin: path,
                })
            })
            .collect()
    }

    /// Parse a discovered source into a migration unit.
    ///
    /// Up and down sections accept any SQL the database does; a change
    /// section must parse, as its rollback is derived from it.
    pub fn parse_source(source: &MigrationSource, dialect: Option<SqlDialect>) -> OrmResult<MigrationUnit> {
        let origin = source.origin.display().to_string();
        let discovery_error = |reason: String| OrmError::Discovery {
            origin: origin.clone(),
            reason,
        };

        let mut change = Vec::new();
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut current: Option<Section> = None;
        let mut seen_change = false;
        let mut seen_up_down = false;

        for line in source.body.lines() {
            if let Some(section) = section_marker(line) {
                match section {
                    Section::Change => seen_change = true,
                    Section::Up | Section::Down => seen_up_down = true,
                }
                current = Some(section);
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }

            match current {
                Some(Section::Change) => change.push(line),
                Some(Section::Up) => up.push(line),
                Some(Section::Down) => down.push(line),
                None => {
                    return Err(discovery_error(
                        "SQL appears before any '-- change', '-- up' or '-- down' marker".to_string(),
                    ))
                }
            }
        }

        if seen_change && seen_up_down {
            return Err(discovery_error(
                "a file cannot mix a '-- change' section with '-- up'/'-- down' sections".to_string(),
            ));
        }

        if seen_up_down {
            let up = parse_operations_or_raw(&up.join("\n"), &origin, dialect);
            let down = parse_operations_or_raw(&down.join("\n"), &origin, dialect);
            return Ok(MigrationUnit::from_up_down(
                source.version,
                source.name.clone(),
                up,
                down,
                Some(source.origin.clone()),
            ));
        }

        let operations = parse_operations(&change.join("\n"), &origin, dialect)?;
        MigrationUnit::from_change(
            source.version,
            source.name.clone(),
            operations,
            Some(source.origin.clone()),
        )
    }

    /// Extract the sequence key and name from `0001_name.sql` or
    /// `YYYYMMDD_HHMMSS_name.sql`
    fn parse_file_name(path: &Path) -> OrmResult<(MigrationVersion, String)> {
        let discovery_error = |reason: &str| OrmError::Discovery {
            origin: path.display().to_string(),
            reason: reason.to_string(),
        };

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| discovery_error("file name is not valid UTF-8"))?;

        let parts: Vec<&str> = stem.split('_').collect();
        let is_digits = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());

        if !is_digits(parts[0]) {
            return Err(discovery_error("file name must start with a numeric sequence key"));
        }

        let (key, name_parts) = if parts.len() >= 3
            && parts[0].len() == 8
            && parts[1].len() == 6
            && is_digits(parts[1])
        {
            (format!("{}{}", parts[0], parts[1]), &parts[2..])
        } else {
            (parts[0].to_string(), &parts[1..])
        };

        let name = name_parts
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        if name.is_empty() {
            return Err(discovery_error("file name must carry a migration name after the sequence key"));
        }

        let version = key
            .parse::<MigrationVersion>()
            .map_err(|e| discovery_error(&e.to_string()))?;

        Ok((version, name))
    }
}

/// Recognise `-- change`, `-- up`, `-- down`, optionally followed by
/// "migration"
fn section_marker(line: &str) -> Option<Section> {
    let comment = line.trim().strip_prefix("--")?.trim().to_lowercase();
    let mut words = comment.split_whitespace();

    let section = match words.next()? {
        "change" => Section::Change,
        "up" => Section::Up,
        "down" => Section::Down,
        _ => return None,
    };

    match (words.next(), words.next()) {
        (None, _) | (Some("migration"), None) => Some(section),
        _ => None,
    }
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}
