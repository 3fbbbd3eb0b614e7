pub mod database;
pub mod sources;
pub mod validation;

pub use database::{DatabaseConfig, DEFAULT_CONFIG_FILE};
pub use sources::ConfigSource;
pub use validation::{ConfigError, ConfigValidator, DatabaseUrlValidator, IdentifierValidator, PositiveValidator};
