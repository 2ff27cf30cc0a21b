//! # ydo-migrate
//!
//! Versioned schema migrations for PostgreSQL.
//!
//! A [`MigrationEngine`] combines three collaborators:
//!
//! - a [`MigrationSet`] loaded from a [`MigrationSource`] (a directory of SQL
//!   files or a compiled-in table),
//! - a [`VersionStore`] holding the applied version and a dirty flag,
//! - a [`LockManager`] serialising runs across processes.
//!
//! ```no_run
//! use ydo_migrate::{load_migrations, MigrationEngine, PgAdvisoryLock, PgVersionStore};
//!
//! # async fn run(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let set = load_migrations("db/migrations")?;
//! let store = PgVersionStore::new(pool.clone());
//! let lock = PgAdvisoryLock::new(pool, store.table());
//!
//! let report = MigrationEngine::new(set, store, lock).up().await?;
//! println!("{} -> {}", report.from_version, report.to_version);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod lock;
pub mod migrations;
pub mod store;

pub use error::{
    ApplyError, BoxError, EngineError, EngineResult, LockError, SourceError, StoreError,
};
pub use lock::{
    advisory_lock_id, LockManager, LockPolicy, MemoryLock, MemoryLockHandle, PgAdvisoryLock,
    PgLockHandle,
};
pub use migrations::{
    create_migration, load_migrations, Direction, DirectorySource, DownTarget, EmbeddedMigration,
    EmbeddedSource, MigrationDefinition, MigrationEngine, MigrationSet, MigrationSource,
    MigrationStatus, PlannedStep, RunOutcome, RunReport, ScaffoldedMigration,
};
pub use store::{MemoryVersionStore, PgVersionStore, VersionRecord, VersionStore};

/// Tracing targets used by this crate
pub mod targets {
    pub const ENGINE: &str = "ydo_migrate::engine";
    pub const STORE: &str = "ydo_migrate::store";
    pub const LOCK: &str = "ydo_migrate::lock";
    pub const SOURCE: &str = "ydo_migrate::source";
}
