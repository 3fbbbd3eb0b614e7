//! # tablet-core: shared setup for tablet binaries
//!
//! Layered database configuration (defaults, YAML file, environment, flags)
//! and tracing subscriber installation.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{ConfigError, ConfigSource, DatabaseConfig};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, LoggingConfig};
