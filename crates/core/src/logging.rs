//! Tracing subscriber setup for the tablet binaries.
//!
//! Output goes to stderr so command results on stdout stay machine-readable.

use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset, e.g. "info" or "tablet_orm=debug"
    pub level: String,
    /// One JSON object per event instead of plain text
    pub json_format: bool,
    /// Include file and line number information
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn,tablet_orm=info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    /// Level for `-v` repetitions: 0 info, 1 debug, 2+ trace for the library
    pub fn from_verbosity(verbosity: u8) -> Self {
        let level = match verbosity {
            0 => "warn,tablet_orm=info,tablet=info",
            1 => "info,tablet_orm=debug,tablet=debug",
            _ => "debug,tablet_orm=trace,tablet=trace",
        };

        Self {
            level: level.to_string(),
            include_location: verbosity > 1,
            ..Self::default()
        }
    }

    pub fn with_json(mut self, json_format: bool) -> Self {
        self.json_format = json_format;
        self
    }

    fn filter(&self) -> CoreResult<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .map_err(|e| CoreError::Logging(format!("invalid filter '{}': {}", self.level, e)))
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: LoggingConfig) -> CoreResult<()> {
    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_format {
        registry
            .with(
                Layer::new()
                    .with_writer(io::stderr)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location)
                    .json(),
            )
            .try_init()
    } else {
        registry
            .with(
                Layer::new()
                    .with_writer(io::stderr)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()
    };

    result.map_err(|e| CoreError::Logging(e.to_string()))
}
