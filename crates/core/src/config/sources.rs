/// Where a configuration value came from, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in default
    Default,
    /// Configuration file
    File(String),
    /// Environment variable
    EnvVar(String),
    /// Command-line flag or other programmatic override
    Programmatic,
}

impl ConfigSource {
    pub fn is_default(&self) -> bool {
        matches!(self, ConfigSource::Default)
    }

    pub fn description(&self) -> String {
        match self {
            ConfigSource::Default => "default".to_string(),
            ConfigSource::File(path) => format!("file {}", path),
            ConfigSource::EnvVar(var) => format!("environment variable {}", var),
            ConfigSource::Programmatic => "command line".to_string(),
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
