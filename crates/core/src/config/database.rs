//! Database configuration
//!
//! Values are layered: built-in defaults, then a YAML file, then environment
//! variables, then command-line flags. Each field remembers which layer set
//! it so `tablet -v` can explain where a value came from.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tablet_orm::{DatabasePoolConfig, MapperConfig, MigrationConfig};

use super::sources::ConfigSource;
use super::validation::{ConfigError, ConfigValidator, DatabaseUrlValidator, IdentifierValidator, PositiveValidator};

/// Looked up in the working directory when no file is named explicitly
pub const DEFAULT_CONFIG_FILE: &str = "tablet.yaml";

const ENV_URL: &str = "DATABASE_URL";
const ENV_MIGRATIONS_DIR: &str = "TABLET_MIGRATIONS_DIR";
const ENV_LEDGER_TABLE: &str = "TABLET_LEDGER_TABLE";
const ENV_TRANSACTIONAL_DDL: &str = "TABLET_TRANSACTIONAL_DDL";
const ENV_MAX_CONNECTIONS: &str = "TABLET_MAX_CONNECTIONS";

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
    pub migrations_dir: PathBuf,
    pub ledger_table: String,
    /// `None` follows the dialect
    pub transactional_ddl: Option<bool>,
    pub max_connections: u32,
    /// Type name to table name, bypassing the naming convention
    pub table_overrides: HashMap<String, String>,
    sources: BTreeMap<&'static str, ConfigSource>,
}

/// Fields as they may appear in `tablet.yaml`; every one is optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileLayer {
    url: Option<String>,
    migrations_dir: Option<PathBuf>,
    ledger_table: Option<String>,
    transactional_ddl: Option<bool>,
    max_connections: Option<u32>,
    #[serde(default)]
    table_overrides: HashMap<String, String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            migrations_dir: PathBuf::from("migrations"),
            ledger_table: "schema_migrations".to_string(),
            transactional_ddl: None,
            max_connections: 5,
            table_overrides: HashMap::new(),
            sources: BTreeMap::new(),
        }
    }
}

impl DatabaseConfig {
    /// Defaults overlaid with a YAML document
    pub fn from_yaml_str(yaml: &str, origin: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_yaml(yaml, origin)?;
        Ok(config)
    }

    /// Defaults overlaid with a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = fs::read_to_string(path).map_err(|e| ConfigError::FileSystemError {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_yaml_str(&yaml, &path.display().to_string())
    }

    /// Defaults, then `path` (or `tablet.yaml` when present), then the
    /// environment. Flags are applied by the caller before `validate`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: &str, origin: &str) -> Result<(), ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(());
        }

        let layer: FileLayer = serde_yaml::from_str(yaml)?;
        let source = ConfigSource::File(origin.to_string());

        if let Some(url) = layer.url {
            self.url = url;
            self.sources.insert("url", source.clone());
        }
        if let Some(dir) = layer.migrations_dir {
            self.migrations_dir = dir;
            self.sources.insert("migrations_dir", source.clone());
        }
        if let Some(table) = layer.ledger_table {
            self.ledger_table = table;
            self.sources.insert("ledger_table", source.clone());
        }
        if let Some(transactional) = layer.transactional_ddl {
            self.transactional_ddl = Some(transactional);
            self.sources.insert("transactional_ddl", source.clone());
        }
        if let Some(max) = layer.max_connections {
            self.max_connections = max;
            self.sources.insert("max_connections", source.clone());
        }
        if !layer.table_overrides.is_empty() {
            self.table_overrides.extend(layer.table_overrides);
            self.sources.insert("table_overrides", source);
        }
        Ok(())
    }

    /// Overlay values from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Overlay values from an environment-like lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = get(ENV_URL) {
            self.url = url;
            self.sources.insert("url", ConfigSource::EnvVar(ENV_URL.to_string()));
        }
        if let Some(dir) = get(ENV_MIGRATIONS_DIR) {
            self.migrations_dir = PathBuf::from(dir);
            self.sources
                .insert("migrations_dir", ConfigSource::EnvVar(ENV_MIGRATIONS_DIR.to_string()));
        }
        if let Some(table) = get(ENV_LEDGER_TABLE) {
            self.ledger_table = table;
            self.sources
                .insert("ledger_table", ConfigSource::EnvVar(ENV_LEDGER_TABLE.to_string()));
        }
        if let Some(raw) = get(ENV_TRANSACTIONAL_DDL) {
            self.transactional_ddl = Some(parse_bool(ENV_TRANSACTIONAL_DDL, &raw)?);
            self.sources
                .insert("transactional_ddl", ConfigSource::EnvVar(ENV_TRANSACTIONAL_DDL.to_string()));
        }
        if let Some(raw) = get(ENV_MAX_CONNECTIONS) {
            self.max_connections = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_value(ENV_MAX_CONNECTIONS, raw.clone(), "a positive integer"))?;
            self.sources
                .insert("max_connections", ConfigSource::EnvVar(ENV_MAX_CONNECTIONS.to_string()));
        }
        Ok(())
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
        self.sources.insert("url", ConfigSource::Programmatic);
    }

    pub fn set_migrations_dir(&mut self, dir: impl Into<PathBuf>) {
        self.migrations_dir = dir.into();
        self.sources.insert("migrations_dir", ConfigSource::Programmatic);
    }

    /// Which layer set `field`
    pub fn source(&self, field: &str) -> ConfigSource {
        self.sources.get(field).cloned().unwrap_or(ConfigSource::Default)
    }

    /// Fields set by a layer other than the defaults
    pub fn sources(&self) -> impl Iterator<Item = (&'static str, &ConfigSource)> {
        self.sources.iter().map(|(field, source)| (*field, source))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        DatabaseUrlValidator::default().validate("url", &self.url)?;
        IdentifierValidator.validate("ledger_table", &self.ledger_table)?;
        PositiveValidator.validate("max_connections", &self.max_connections)?;

        if self.migrations_dir.as_os_str().is_empty() {
            return Err(ConfigError::missing_required(
                "migrations_dir",
                "Set TABLET_MIGRATIONS_DIR or pass --migrations-dir",
            ));
        }
        Ok(())
    }

    /// `sqlite::memory:` style URLs where each connection is a separate database
    pub fn is_in_memory(&self) -> bool {
        self.url.starts_with("sqlite:") && (self.url.contains(":memory:") || self.url.contains("mode=memory"))
    }

    pub fn migration_config(&self) -> MigrationConfig {
        MigrationConfig {
            migrations_dir: self.migrations_dir.clone(),
            ledger_table: self.ledger_table.clone(),
            transactional_ddl: self.transactional_ddl,
        }
    }

    pub fn mapper_config(&self) -> MapperConfig {
        MapperConfig {
            table_overrides: self.table_overrides.clone(),
        }
    }

    pub fn pool_config(&self) -> DatabasePoolConfig {
        if self.is_in_memory() {
            return DatabasePoolConfig::single_connection();
        }

        DatabasePoolConfig {
            max_connections: self.max_connections,
            min_connections: self.max_connections.min(1),
            ..DatabasePoolConfig::default()
        }
    }
}

fn parse_bool(field: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid_value(field, raw, "true or false")),
    }
}
