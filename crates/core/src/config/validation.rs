use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration file error: {message}")]
    FileSystemError { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    /// Name of the offending field, when the error is about one
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingRequired { field, .. } | Self::InvalidValue { field, .. } => Some(field),
            _ => None,
        }
    }
}

/// Trait for validating configuration values
pub trait ConfigValidator<T: ?Sized> {
    fn validate(&self, field: &str, value: &T) -> Result<(), ConfigError>;
}

/// Database URL validator: non-empty, with one of the supported schemes
pub struct DatabaseUrlValidator {
    pub prefixes: Vec<&'static str>,
}

impl Default for DatabaseUrlValidator {
    fn default() -> Self {
        Self {
            prefixes: vec!["postgres://", "postgresql://", "sqlite:"],
        }
    }
}

impl ConfigValidator<str> for DatabaseUrlValidator {
    fn validate(&self, field: &str, value: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::missing_required(
                field,
                "Set DATABASE_URL, pass --database-url or add `url` to tablet.yaml",
            ));
        }

        if !self.prefixes.iter().any(|prefix| value.starts_with(prefix)) {
            return Err(ConfigError::invalid_value(
                field,
                value,
                format!("URL starting with one of: {}", self.prefixes.join(", ")),
            ));
        }

        Ok(())
    }
}

/// Rejects zero
pub struct PositiveValidator;

impl ConfigValidator<u32> for PositiveValidator {
    fn validate(&self, field: &str, value: &u32) -> Result<(), ConfigError> {
        if *value == 0 {
            return Err(ConfigError::invalid_value(field, value.to_string(), "a value greater than 0"));
        }
        Ok(())
    }
}

/// SQL identifier validator for table names taken from configuration
pub struct IdentifierValidator;

impl ConfigValidator<str> for IdentifierValidator {
    fn validate(&self, field: &str, value: &str) -> Result<(), ConfigError> {
        let mut chars = value.chars();
        let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid {
            return Err(ConfigError::invalid_value(
                field,
                value,
                "identifier of letters, digits and underscores",
            ));
        }
        Ok(())
    }
}
