use std::path::PathBuf;
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

    #[error("Failed to read configuration file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Could not find {marker} in {} or any parent directory", start.display())]
    ProjectRootNotFound { start: PathBuf, marker: String },
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
}

/// Trait for validating configuration values
pub trait ConfigValidator<T> {
    /// Validate a configuration value
    fn validate(&self, value: &T) -> Result<(), ConfigError>;
}

/// Rejects empty or whitespace-only strings
pub struct NonEmpty(pub &'static str);

impl ConfigValidator<String> for NonEmpty {
    fn validate(&self, value: &String) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::missing_required(
                self.0,
                "set it in the configuration file",
            ));
        }
        Ok(())
    }
}

/// Rejects zero for numeric settings that must be positive
pub struct NonZero(pub &'static str);

impl ConfigValidator<u16> for NonZero {
    fn validate(&self, value: &u16) -> Result<(), ConfigError> {
        if *value == 0 {
            return Err(ConfigError::invalid_value(self.0, "0", "a value greater than 0"));
        }
        Ok(())
    }
}
