//! Migration sources and the validated, ordered migration set

use std::collections::BTreeMap;

use super::definitions::{is_blank_script, MigrationDefinition};
use crate::error::SourceError;
use crate::targets;

/// Anything that can enumerate migration definitions
///
/// Implementations return definitions in any order; [`MigrationSet::load`]
/// sorts and validates them.
pub trait MigrationSource {
    fn definitions(&self) -> Result<Vec<MigrationDefinition>, SourceError>;
}

/// A migration compiled into the binary
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedMigration {
    pub version: u64,
    pub name: &'static str,
    pub forward: &'static str,
    pub reverse: Option<&'static str>,
}

/// Source backed by a static table of migrations
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedSource {
    migrations: &'static [EmbeddedMigration],
}

impl EmbeddedSource {
    pub const fn new(migrations: &'static [EmbeddedMigration]) -> Self {
        Self { migrations }
    }
}

impl MigrationSource for EmbeddedSource {
    fn definitions(&self) -> Result<Vec<MigrationDefinition>, SourceError> {
        Ok(self
            .migrations
            .iter()
            .map(|m| MigrationDefinition {
                version: m.version,
                name: m.name.to_string(),
                forward: m.forward.to_string(),
                reverse: m.reverse.map(str::to_string),
                origin: format!("embedded:{}_{}", m.version, m.name),
            })
            .collect())
    }
}

/// Ordered migrations, ascending by version with no duplicates
///
/// Only constructible through validation, so the engine can rely on ordering.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<MigrationDefinition>,
}

impl MigrationSet {
    /// Load and validate every definition a source yields
    pub fn load(source: &impl MigrationSource) -> Result<Self, SourceError> {
        let set = Self::from_definitions(source.definitions()?)?;
        tracing::debug!(
            target: targets::SOURCE,
            count = set.len(),
            latest = set.latest_version(),
            "Migration set loaded"
        );
        Ok(set)
    }

    /// Validate and sort a list of definitions
    pub fn from_definitions(definitions: Vec<MigrationDefinition>) -> Result<Self, SourceError> {
        let mut by_version: BTreeMap<u64, MigrationDefinition> = BTreeMap::new();

        for definition in definitions {
            if definition.version == 0 {
                return Err(SourceError::malformed(
                    &definition.origin,
                    "version 0 is reserved for the empty database",
                ));
            }
            if is_blank_script(&definition.forward) {
                return Err(SourceError::malformed(
                    &definition.origin,
                    "forward script is empty",
                ));
            }
            if let Some(existing) = by_version.get(&definition.version) {
                return Err(SourceError::DuplicateVersion {
                    version: definition.version,
                    first: existing.origin.clone(),
                    second: definition.origin,
                });
            }
            by_version.insert(definition.version, definition);
        }

        Ok(Self {
            migrations: by_version.into_values().collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MigrationDefinition> {
        self.migrations.iter()
    }

    pub fn versions(&self) -> Vec<u64> {
        self.migrations.iter().map(|m| m.version).collect()
    }

    pub fn get(&self, version: u64) -> Option<&MigrationDefinition> {
        self.position(version).map(|idx| &self.migrations[idx])
    }

    pub fn contains(&self, version: u64) -> bool {
        self.position(version).is_some()
    }

    /// Highest version, 0 for an empty set
    pub fn latest_version(&self) -> u64 {
        self.migrations.last().map_or(0, |m| m.version)
    }

    /// The version preceding `version` in the set, 0 if none
    pub fn previous_version(&self, version: u64) -> u64 {
        let idx = self.migrations.partition_point(|m| m.version < version);
        idx.checked_sub(1)
            .map_or(0, |prev| self.migrations[prev].version)
    }

    pub(crate) fn as_slice(&self) -> &[MigrationDefinition] {
        &self.migrations
    }

    fn position(&self, version: u64) -> Option<usize> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version)
            .ok()
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a MigrationDefinition;
    type IntoIter = std::slice::Iter<'a, MigrationDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
