//! Persisted record of the applied migration version

use async_trait::async_trait;

use crate::error::{ApplyError, StoreError};

pub mod memory;
pub mod postgres;

pub use memory::MemoryVersionStore;
pub use postgres::PgVersionStore;

/// The applied version and whether a step is in flight or failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionRecord {
    /// Highest fully applied version, 0 when nothing is applied
    pub version: u64,
    pub dirty: bool,
}

impl VersionRecord {
    pub const fn clean(version: u64) -> Self {
        Self {
            version,
            dirty: false,
        }
    }

    pub const fn dirty(version: u64) -> Self {
        Self {
            version,
            dirty: true,
        }
    }
}

/// Durable storage for the [`VersionRecord`] of one database
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Create the backing storage if it does not exist yet
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Current record; `(0, clean)` when none was ever written
    async fn read(&self) -> Result<VersionRecord, StoreError>;

    /// Overwrite the record
    async fn write(&self, record: VersionRecord) -> Result<(), StoreError>;

    /// Execute `script` and persist `record` as one atomic unit
    ///
    /// On failure the previous record is left in place.
    async fn apply(&self, script: &str, record: VersionRecord) -> Result<(), ApplyError>;
}
