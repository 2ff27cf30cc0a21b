//! Migration Definitions - Core types shared by the migration system
//!
//! Defines the migration definition itself along with the direction, target
//! and report types produced by the engine.

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// A single versioned migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDefinition {
    /// Strictly increasing, never 0
    pub version: u64,
    /// Human-readable label, may be empty
    pub name: String,
    /// SQL applied when migrating up
    pub forward: String,
    /// SQL applied when migrating down, if the migration is reversible
    pub reverse: Option<String>,
    /// Where the definition was loaded from (file path or embedded label)
    pub origin: String,
}

impl MigrationDefinition {
    pub fn new(version: u64, name: impl Into<String>, forward: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            forward: forward.into(),
            reverse: None,
            origin: String::new(),
        }
    }

    pub fn with_reverse(mut self, reverse: impl Into<String>) -> Self {
        self.reverse = Some(reverse.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn is_reversible(&self) -> bool {
        self.reverse.is_some()
    }

    /// Script for the given direction
    pub fn script(&self, direction: Direction) -> Option<&str> {
        match direction {
            Direction::Up => Some(&self.forward),
            Direction::Down => self.reverse.as_deref(),
        }
    }

    /// `version_name`, or just the version when unnamed
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            self.version.to_string()
        } else {
            format!("{}_{}", self.version, self.name)
        }
    }
}

/// Whether a script holds nothing but blank lines and `--` comments
pub(crate) fn is_blank_script(sql: &str) -> bool {
    sql.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with("--")
    })
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Apply forward scripts
    Up,
    /// Apply reverse scripts
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// How far a `down` run reverts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownTarget {
    /// Revert this many applied migrations, newest first
    Steps(usize),
    /// Revert until this version is the current one (0 reverts everything)
    Version(u64),
}

impl Default for DownTarget {
    fn default() -> Self {
        DownTarget::Steps(1)
    }
}

/// Whether a run changed anything
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Nothing to do
    NoOp,
    /// One or more steps executed
    Applied,
}

/// Result of an `up` or `down` run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub direction: Direction,
    /// Version recorded before the run
    pub from_version: u64,
    /// Version recorded after the run
    pub to_version: u64,
    /// Versions whose scripts were executed, in execution order
    pub applied: Vec<u64>,
    pub duration: Duration,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub(crate) fn no_op(direction: Direction, version: u64, duration: Duration) -> Self {
        Self {
            direction,
            from_version: version,
            to_version: version,
            applied: Vec::new(),
            duration,
            outcome: RunOutcome::NoOp,
        }
    }

    pub fn is_no_op(&self) -> bool {
        self.outcome == RunOutcome::NoOp
    }

    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

/// Snapshot of the database relative to the migration set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub current_version: u64,
    pub dirty: bool,
    /// Highest version in the set, 0 when the set is empty
    pub latest_version: u64,
    pub applied: Vec<u64>,
    pub pending: Vec<u64>,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        !self.dirty && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_scripts() {
        let migration = MigrationDefinition::new(1, "create_users", "CREATE TABLE users (id INT);")
            .with_reverse("DROP TABLE users;")
            .with_origin("1_create_users.up.sql");

        assert!(migration.is_reversible());
        assert_eq!(migration.script(Direction::Down), Some("DROP TABLE users;"));
        assert_eq!(migration.label(), "1_create_users");

        let unnamed = MigrationDefinition::new(7, "", "SELECT 1;");
        assert_eq!(unnamed.script(Direction::Down), None);
        assert_eq!(unnamed.label(), "7");
    }

    #[test]
    fn test_blank_script_detection() {
        assert!(is_blank_script(""));
        assert!(is_blank_script("-- Migration: users\n\n   -- nothing yet\n"));
        assert!(!is_blank_script("-- header\nCREATE TABLE t (id INT);"));
    }

    #[test]
    fn test_defaults_and_display() {
        assert_eq!(DownTarget::default(), DownTarget::Steps(1));
        assert_eq!(Direction::Down.to_string(), "down");

        let report = RunReport::no_op(Direction::Up, 4, Duration::from_millis(3));
        assert!(report.is_no_op());
        assert_eq!(report.from_version, report.to_version);
        assert_eq!(report.applied_count(), 0);
    }

    #[test]
    fn test_status_serializes() {
        let status = MigrationStatus {
            current_version: 1,
            dirty: false,
            latest_version: 2,
            applied: vec![1],
            pending: vec![2],
        };
        assert!(!status.is_up_to_date());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["current_version"], 1);
        assert_eq!(json["pending"][0], 2);
    }
}
