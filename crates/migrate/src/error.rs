//! Error types for the migration system
//!
//! Each collaborator of the engine has its own error family; [`EngineError`]
//! wraps them and adds the failures of the orchestration itself.

use std::time::Duration;

use thiserror::Error;

use crate::migrations::Direction;

/// Type-erased error used to carry underlying causes
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures while enumerating or parsing migration definitions
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("migration source not found: {location}")]
    NotFound { location: String },

    #[error("malformed migration {entry}: {reason}")]
    Malformed { entry: String, reason: String },

    #[error("duplicate migration version {version}: {first} and {second}")]
    DuplicateVersion {
        version: u64,
        first: String,
        second: String,
    },

    #[error("failed to read migration source {location}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    pub(crate) fn malformed(entry: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            entry: entry.into(),
            reason: reason.into(),
        }
    }
}

/// Failures of the persisted version record
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version store connection failed")]
    ConnectionFailed(#[source] BoxError),

    #[error("version store holds an invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid version store configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::ConnectionFailed(Box::new(err))
    }
}

/// Outcome of a failed [`VersionStore::apply`](crate::store::VersionStore::apply)
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The change set itself (or the transaction carrying it) failed
    #[error("migration script failed")]
    Script(#[source] BoxError),

    /// The store could not be reached or updated
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures acquiring or releasing the migration lock
#[derive(Debug, Error)]
pub enum LockError {
    #[error("migration lock {lock_id} is held by another process (waited {waited:?})")]
    AlreadyLocked { lock_id: i64, waited: Duration },

    #[error("migration lock {lock_id} was not held at release")]
    NotHeld { lock_id: i64 },

    #[error("migration lock backend failed")]
    Backend(#[source] BoxError),
}

impl From<sqlx::Error> for LockError {
    fn from(err: sqlx::Error) -> Self {
        LockError::Backend(Box::new(err))
    }
}

/// Errors surfaced by [`MigrationEngine`](crate::MigrationEngine) operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("database is dirty at version {version}; inspect the failed migration and force a version")]
    Dirty { version: u64 },

    #[error("no migrations applied; nothing to roll back")]
    NoMigrationsApplied,

    #[error("migration {version} failed while migrating {direction}")]
    ExecutionFailed {
        version: u64,
        direction: Direction,
        #[source]
        cause: BoxError,
    },

    #[error("migration {version} has no reverse script")]
    Irreversible { version: u64 },

    #[error("applied version {version} is not present in the migration source")]
    UnknownVersion { version: u64 },

    #[error("invalid target: {reason}")]
    InvalidTarget { reason: String },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("{primary}; releasing the migration lock also failed: {release}")]
    Release {
        primary: Box<EngineError>,
        release: LockError,
    },
}

impl EngineError {
    /// Whether the failure left the version record dirty
    pub fn leaves_dirty(&self) -> bool {
        match self {
            EngineError::ExecutionFailed { .. } => true,
            EngineError::Release { primary, .. } => primary.leaves_dirty(),
            _ => false,
        }
    }

    /// The migration version the failure is attributed to, if any
    pub fn version(&self) -> Option<u64> {
        match self {
            EngineError::Dirty { version }
            | EngineError::ExecutionFailed { version, .. }
            | EngineError::Irreversible { version }
            | EngineError::UnknownVersion { version } => Some(*version),
            EngineError::Release { primary, .. } => primary.version(),
            _ => None,
        }
    }
}
