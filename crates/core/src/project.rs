//! Project layout discovery
//!
//! Resolves the configuration file and migrations directory, falling back to
//! defaults relative to the nearest ancestor directory holding a `Cargo.toml`.

use std::path::{Path, PathBuf};

use crate::config::{ConfigError, SourcedPath};

/// File whose presence marks the project root
pub const PROJECT_MARKER: &str = "Cargo.toml";

/// Default configuration file, relative to the project root
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Default migrations directory, relative to the project root
pub const DEFAULT_MIGRATIONS_DIR: &str = "db/migrations";

/// Walk up from `start` until a directory containing [`PROJECT_MARKER`] is found
pub fn find_project_root(start: &Path) -> Result<PathBuf, ConfigError> {
    let mut dir = start;
    loop {
        if dir.join(PROJECT_MARKER).is_file() {
            return Ok(dir.to_path_buf());
        }

        match dir.parent() {
            Some(parent) => dir = parent,
            None => {
                return Err(ConfigError::ProjectRootNotFound {
                    start: start.to_path_buf(),
                    marker: PROJECT_MARKER.to_string(),
                })
            }
        }
    }
}

/// Use `explicit` when given, otherwise `default` under the discovered project root
pub fn resolve_path(
    cwd: &Path,
    explicit: Option<PathBuf>,
    default: &str,
) -> Result<SourcedPath, ConfigError> {
    match explicit {
        Some(path) => Ok(SourcedPath::explicit(path)),
        None => Ok(SourcedPath::project_default(&find_project_root(cwd)?, default)),
    }
}

/// Resolved locations of the config file and migrations directory
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub config: SourcedPath,
    pub migrations: SourcedPath,
}

impl ProjectPaths {
    /// Resolve paths, discovering the project root from `cwd` only when a default is needed
    pub fn resolve(
        cwd: &Path,
        config: Option<PathBuf>,
        migrations: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let root = match (&config, &migrations) {
            (Some(_), Some(_)) => None,
            _ => Some(find_project_root(cwd)?),
        };

        let resolve = |explicit: Option<PathBuf>, default: &str| match explicit {
            Some(path) => SourcedPath::explicit(path),
            None => SourcedPath::project_default(root.as_deref().unwrap_or(cwd), default),
        };

        Ok(Self {
            config: resolve(config, DEFAULT_CONFIG_FILE),
            migrations: resolve(migrations, DEFAULT_MIGRATIONS_DIR),
        })
    }
}
