//! Migration definitions, sources, planning and the engine

pub mod definitions;
pub mod directory;
pub mod engine;
pub mod planner;
pub mod source;

pub use definitions::{
    Direction, DownTarget, MigrationDefinition, MigrationStatus, RunOutcome, RunReport,
};
pub use directory::{create_migration, load_migrations, DirectorySource, ScaffoldedMigration};
pub use engine::MigrationEngine;
pub use planner::PlannedStep;
pub use source::{EmbeddedMigration, EmbeddedSource, MigrationSet, MigrationSource};
