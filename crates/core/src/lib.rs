//! # ydo-core
//!
//! Configuration, project layout discovery and logging shared by the ydo tools.

pub mod config;
pub mod logging;
pub mod project;

pub use config::{
    Config, ConfigError, ConfigSource, DatabaseConfig, MigrationSettings, RedisConfig, SourcedPath,
};
pub use logging::{init_logging, LoggingConfig};
pub use project::{
    find_project_root, resolve_path, ProjectPaths, DEFAULT_CONFIG_FILE, DEFAULT_MIGRATIONS_DIR,
};
