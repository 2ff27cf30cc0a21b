//! Step planning for up and down runs
//!
//! Planning is pure: it only looks at the migration set and the current
//! version, so every target error is reported before anything is executed.

use super::definitions::{Direction, DownTarget, MigrationDefinition};
use super::source::MigrationSet;
use crate::error::{EngineError, EngineResult};

/// One step of a plan: the script to run and the version recorded afterwards
#[derive(Debug, Clone, Copy)]
pub struct PlannedStep<'a> {
    pub migration: &'a MigrationDefinition,
    pub direction: Direction,
    pub target_version: u64,
}

impl<'a> PlannedStep<'a> {
    pub fn version(&self) -> u64 {
        self.migration.version
    }

    /// The script this step executes
    pub fn script(&self) -> EngineResult<&'a str> {
        self.migration
            .script(self.direction)
            .ok_or(EngineError::Irreversible {
                version: self.migration.version,
            })
    }
}

impl MigrationSet {
    fn ensure_known(&self, current: u64) -> EngineResult<()> {
        if current != 0 && !self.contains(current) {
            return Err(EngineError::UnknownVersion { version: current });
        }
        Ok(())
    }

    /// Migrations newer than `current`, ascending
    pub fn plan_up(&self, current: u64) -> EngineResult<Vec<PlannedStep<'_>>> {
        self.ensure_known(current)?;

        Ok(self
            .as_slice()
            .iter()
            .filter(|m| m.version > current)
            .map(|migration| PlannedStep {
                migration,
                direction: Direction::Up,
                target_version: migration.version,
            })
            .collect())
    }

    /// Applied migrations to revert for `target`, newest first
    pub fn plan_down(&self, current: u64, target: DownTarget) -> EngineResult<Vec<PlannedStep<'_>>> {
        if current == 0 {
            return Err(EngineError::NoMigrationsApplied);
        }
        self.ensure_known(current)?;

        let applied: Vec<&MigrationDefinition> = self
            .as_slice()
            .iter()
            .rev()
            .filter(|m| m.version <= current)
            .collect();

        let count = match target {
            DownTarget::Steps(steps) if steps > applied.len() => {
                return Err(EngineError::InvalidTarget {
                    reason: format!(
                        "cannot roll back {} migrations, only {} applied",
                        steps,
                        applied.len()
                    ),
                })
            }
            DownTarget::Steps(steps) => steps,
            DownTarget::Version(version) if version > current => {
                return Err(EngineError::InvalidTarget {
                    reason: format!(
                        "target version {} is ahead of current version {}",
                        version, current
                    ),
                })
            }
            DownTarget::Version(version) if version != 0 && !self.contains(version) => {
                return Err(EngineError::InvalidTarget {
                    reason: format!("version {} is not in the migration set", version),
                })
            }
            DownTarget::Version(version) => applied.iter().filter(|m| m.version > version).count(),
        };

        let steps: Vec<PlannedStep<'_>> = applied
            .iter()
            .copied()
            .take(count)
            .map(|migration| PlannedStep {
                migration,
                direction: Direction::Down,
                target_version: self.previous_version(migration.version),
            })
            .collect();

        if let Some(step) = steps.iter().find(|s| !s.migration.is_reversible()) {
            return Err(EngineError::Irreversible {
                version: step.version(),
            });
        }

        Ok(steps)
    }
}
