//! # Logging
//!
//! Tracing subscriber setup shared by the binaries. Logs go to stderr so that
//! stdout carries only command output.

use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    /// Enable JSON structured logging (vs plain text)
    pub json_format: bool,
    /// Include target module in each line
    pub include_target: bool,
    /// Environment filter (supports complex filters like "ydo_migrate=debug,sqlx=warn")
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json_format: false,
            include_target: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Plain text output at the given level for our crates, warnings for dependencies
    pub fn for_level(level: impl Into<String>) -> Self {
        let level = level.into();
        Self {
            env_filter: Some(format!("warn,ydo={0},ydo_core={0},ydo_migrate={0}", level)),
            level,
            ..Self::default()
        }
    }

    /// Switch to JSON lines
    pub fn json(mut self) -> Self {
        self.json_format = true;
        self
    }

    /// Set environment filter
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    fn filter(&self) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
        let directives = self.env_filter.as_deref().unwrap_or(&self.level);
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directives))
    }
}

/// Initialize logging for the process
///
/// `RUST_LOG` takes precedence over the configured filter.
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = config.filter()?;

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                Layer::new()
                    .with_writer(io::stderr)
                    .with_target(config.include_target),
            )
            .try_init()?;
    }

    tracing::debug!(
        target: "ydo::logging",
        level = %config.level,
        json = config.json_format,
        "Logging initialized"
    );

    Ok(())
}
