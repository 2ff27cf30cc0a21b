use std::path::{Path, PathBuf};

/// Where a resolved path came from, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Passed explicitly on the command line
    Explicit,
    /// Derived from the discovered project root
    ProjectDefault(PathBuf),
}

impl ConfigSource {
    /// Check if source is an explicit argument
    pub fn is_explicit(&self) -> bool {
        matches!(self, ConfigSource::Explicit)
    }

    /// Get source description
    pub fn description(&self) -> String {
        match self {
            ConfigSource::Explicit => "command line argument".to_string(),
            ConfigSource::ProjectDefault(root) => {
                format!("default under project root {}", root.display())
            }
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A path together with the way it was chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedPath {
    pub path: PathBuf,
    pub source: ConfigSource,
}

impl SourcedPath {
    pub fn explicit(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            source: ConfigSource::Explicit,
        }
    }

    pub fn project_default(root: &Path, relative: impl AsRef<Path>) -> Self {
        Self {
            path: root.join(relative),
            source: ConfigSource::ProjectDefault(root.to_path_buf()),
        }
    }
}
