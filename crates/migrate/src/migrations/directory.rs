//! Directory-backed migrations - file system operations for migrations
//!
//! Handles loading, parsing and scaffolding migration files. Two layouts are
//! accepted and may be mixed in one directory:
//!
//! - `{version}_{name}.up.sql` with an optional `{version}_{name}.down.sql`
//! - `{version}_{name}.sql` holding `-- Up migration` and `-- Down migration`
//!   sections

use chrono::Utc;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::definitions::{is_blank_script, MigrationDefinition};
use super::source::{MigrationSet, MigrationSource};
use crate::error::SourceError;
use crate::targets;

/// Load and validate every migration under `path`
pub fn load_migrations(path: impl AsRef<Path>) -> Result<MigrationSet, SourceError> {
    MigrationSet::load(&DirectorySource::new(path.as_ref()))
}

/// Source reading `.sql` files from one directory (not recursive)
#[derive(Debug, Clone)]
pub struct DirectorySource {
    path: PathBuf,
}

impl DirectorySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn ensure_directory(&self) -> Result<(), SourceError> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(SourceError::NotFound {
                location: self.location(),
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(SourceError::NotFound {
                location: self.location(),
            }),
            Err(source) => Err(SourceError::Io {
                location: self.location(),
                source,
            }),
        }
    }

    /// Every migration file in the directory with its parsed name
    fn migration_files(&self) -> Result<Vec<(PathBuf, FileName)>, SourceError> {
        self.ensure_directory()?;

        let io_err = |source| SourceError::Io {
            location: self.location(),
            source,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(&self.path).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let path = entry.path();

            if !entry.file_type().map_err(io_err)?.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name() else {
                continue;
            };
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with('.') || !file_name.ends_with(".sql") {
                tracing::trace!(target: targets::SOURCE, file = %file_name, "Skipping non-migration file");
                continue;
            }

            let parsed = FileName::parse(&file_name)?;
            files.push((path, parsed));
        }

        Ok(files)
    }
}

impl MigrationSource for DirectorySource {
    fn definitions(&self) -> Result<Vec<MigrationDefinition>, SourceError> {
        let mut entries: BTreeMap<u64, PartialMigration> = BTreeMap::new();

        for (path, file) in self.migration_files()? {
            let origin = path.display().to_string();
            let content = fs::read_to_string(&path).map_err(|source| SourceError::Io {
                location: origin.clone(),
                source,
            })?;

            let entry = entries.entry(file.version).or_default();
            match file.kind {
                FileKind::Up => {
                    entry.set_name(&file.name);
                    entry.set_forward(file.version, origin, content)?;
                }
                FileKind::Down => entry.set_reverse(file.version, origin, content)?,
                FileKind::Combined => {
                    let (forward, reverse) = parse_migration_content(&content)
                        .map_err(|reason| SourceError::malformed(&origin, reason))?;
                    entry.set_name(&file.name);
                    entry.set_forward(file.version, origin.clone(), forward)?;
                    if let Some(reverse) = reverse {
                        entry.set_reverse(file.version, origin, reverse)?;
                    }
                }
            }
        }

        let mut definitions = Vec::with_capacity(entries.len());
        for (version, entry) in entries {
            let Some((origin, forward)) = entry.forward else {
                let origin = entry.reverse.map(|(origin, _)| origin).unwrap_or_default();
                return Err(SourceError::malformed(
                    origin,
                    "reverse script has no matching forward script",
                ));
            };

            tracing::trace!(target: targets::SOURCE, version, origin = %origin, "Parsed migration");
            definitions.push(MigrationDefinition {
                version,
                name: entry.name.unwrap_or_default(),
                forward,
                reverse: entry.reverse.map(|(_, script)| script),
                origin,
            });
        }

        Ok(definitions)
    }
}

/// Scripts collected for one version while scanning the directory
#[derive(Default)]
struct PartialMigration {
    name: Option<String>,
    forward: Option<(String, String)>,
    reverse: Option<(String, String)>,
}

impl PartialMigration {
    fn set_name(&mut self, name: &str) {
        self.name.get_or_insert_with(|| name.to_string());
    }

    fn set_forward(&mut self, version: u64, origin: String, script: String) -> Result<(), SourceError> {
        Self::set_once(&mut self.forward, version, origin, script)
    }

    fn set_reverse(&mut self, version: u64, origin: String, script: String) -> Result<(), SourceError> {
        Self::set_once(&mut self.reverse, version, origin, script)
    }

    fn set_once(
        slot: &mut Option<(String, String)>,
        version: u64,
        origin: String,
        script: String,
    ) -> Result<(), SourceError> {
        if let Some((first, _)) = slot {
            return Err(SourceError::DuplicateVersion {
                version,
                first: first.clone(),
                second: origin,
            });
        }
        *slot = Some((origin, script));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Up,
    Down,
    Combined,
}

/// Version, name and layout parsed from a migration file name
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileName {
    version: u64,
    name: String,
    kind: FileKind,
}

impl FileName {
    fn parse(file_name: &str) -> Result<Self, SourceError> {
        let malformed = |reason: &str| SourceError::malformed(file_name, reason);

        let stem = file_name
            .strip_suffix(".sql")
            .ok_or_else(|| malformed("not a .sql file"))?;

        let (stem, kind) = if let Some(stem) = stem.strip_suffix(".up") {
            (stem, FileKind::Up)
        } else if let Some(stem) = stem.strip_suffix(".down") {
            (stem, FileKind::Down)
        } else {
            (stem, FileKind::Combined)
        };

        let (version, name) = stem.split_once('_').unwrap_or((stem, ""));
        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("file name must start with a numeric version"));
        }

        let version: u64 = version
            .parse()
            .map_err(|_| malformed("version number is too large"))?;
        if version == 0 {
            return Err(malformed("version 0 is reserved for the empty database"));
        }

        Ok(Self {
            version,
            name: name.to_string(),
            kind,
        })
    }
}

/// Split a single-file migration into its up and down sections
///
/// Section markers are comment lines reading `-- up`, `-- Up migration`,
/// `-- down` or `-- Down migration` (case-insensitive). Comments before the
/// first marker are ignored.
fn parse_migration_content(content: &str) -> Result<(String, Option<String>), String> {
    #[derive(PartialEq)]
    enum Section {
        Preamble,
        Up,
        Down,
    }

    let mut up_sql = Vec::new();
    let mut down_sql = Vec::new();
    let mut seen_up = false;
    let mut seen_down = false;
    let mut section = Section::Preamble;

    for line in content.lines() {
        let trimmed = line.trim();

        if let Some(comment) = trimmed.strip_prefix("--") {
            let marker = comment.trim().to_lowercase();
            if marker == "up" || marker.starts_with("up migration") {
                if seen_up {
                    return Err("more than one up section".to_string());
                }
                seen_up = true;
                section = Section::Up;
                continue;
            }
            if marker == "down" || marker.starts_with("down migration") {
                if seen_down {
                    return Err("more than one down section".to_string());
                }
                seen_down = true;
                section = Section::Down;
                continue;
            }
        }

        match section {
            Section::Up => up_sql.push(line),
            Section::Down => down_sql.push(line),
            Section::Preamble if trimmed.is_empty() || trimmed.starts_with("--") => {}
            Section::Preamble => {
                return Err("statements found before the up section marker".to_string())
            }
        }
    }

    if !seen_up {
        return Err("missing `-- Up migration` section marker".to_string());
    }

    let forward = up_sql.join("\n").trim().to_string();
    let reverse = down_sql.join("\n").trim().to_string();
    let reverse = if is_blank_script(&reverse) {
        None
    } else {
        Some(reverse)
    };

    Ok((forward, reverse))
}

/// Files written by [`create_migration`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldedMigration {
    pub version: u64,
    pub up_path: PathBuf,
    pub down_path: PathBuf,
}

/// Write the next `{version}_{name}.up.sql` / `.down.sql` pair into `dir`
///
/// The version is one past the highest version already present, creating the
/// directory when needed. Existing files are never overwritten.
pub fn create_migration(dir: impl AsRef<Path>, name: &str) -> Result<ScaffoldedMigration, SourceError> {
    let dir = dir.as_ref();
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(SourceError::malformed(
            name,
            "migration name must contain at least one letter or digit",
        ));
    }

    fs::create_dir_all(dir).map_err(|source| SourceError::Io {
        location: dir.display().to_string(),
        source,
    })?;

    let latest = DirectorySource::new(dir)
        .migration_files()?
        .iter()
        .map(|(_, file)| file.version)
        .max()
        .unwrap_or(0);
    let version = latest.checked_add(1).ok_or_else(|| {
        SourceError::malformed(
            dir.display().to_string(),
            format!("no version left after {}", latest),
        )
    })?;

    let up_path = dir.join(format!("{}_{}.up.sql", version, slug));
    let down_path = dir.join(format!("{}_{}.down.sql", version, slug));
    let created = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

    write_new_file(
        &up_path,
        &format!(
            "-- Migration: {}\n-- Version: {}\n-- Created: {}\n\n-- Add your schema changes here\n",
            name, version, created
        ),
    )?;
    write_new_file(
        &down_path,
        &format!(
            "-- Migration: {}\n-- Version: {}\n-- Created: {}\n\n-- Add rollback statements here\n",
            name, version, created
        ),
    )?;

    tracing::info!(
        target: targets::SOURCE,
        version,
        up = %up_path.display(),
        "Migration files created"
    );

    Ok(ScaffoldedMigration {
        version,
        up_path,
        down_path,
    })
}

fn write_new_file(path: &Path, content: &str) -> Result<(), SourceError> {
    let io_err = |source| SourceError::Io {
        location: path.display().to_string(),
        source,
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(io_err)?;
    file.write_all(content.as_bytes()).map_err(io_err)
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_names() {
        let up = FileName::parse("1_create_users.up.sql").unwrap();
        assert_eq!(up.version, 1);
        assert_eq!(up.name, "create_users");
        assert_eq!(up.kind, FileKind::Up);

        let down = FileName::parse("20240102_add_email.down.sql").unwrap();
        assert_eq!(down.version, 20240102);
        assert_eq!(down.kind, FileKind::Down);

        let combined = FileName::parse("3_seed.sql").unwrap();
        assert_eq!(combined.kind, FileKind::Combined);

        let unnamed = FileName::parse("4.up.sql").unwrap();
        assert_eq!(unnamed.version, 4);
        assert_eq!(unnamed.name, "");
    }

    #[test]
    fn test_parse_file_names_rejects_bad_versions() {
        for bad in ["create_users.up.sql", "_x.sql", "0_init.up.sql", "v1_x.sql", "99999999999999999999999_x.sql"] {
            let err = FileName::parse(bad).unwrap_err();
            assert!(
                matches!(err, SourceError::Malformed { ref entry, .. } if entry == bad),
                "{bad} should be malformed"
            );
        }
    }

    #[test]
    fn test_parse_migration_content_sections() {
        let content = "-- Migration: users\n\
                       -- Up migration\n\
                       CREATE TABLE users (id INT);\n\
                       \n\
                       -- Down migration\n\
                       DROP TABLE users;\n";
        let (up, down) = parse_migration_content(content).unwrap();
        assert_eq!(up, "CREATE TABLE users (id INT);");
        assert_eq!(down.as_deref(), Some("DROP TABLE users;"));
    }

    #[test]
    fn test_parse_migration_content_short_markers() {
        let (up, down) = parse_migration_content("-- UP\nSELECT 1;\n-- down\n").unwrap();
        assert_eq!(up, "SELECT 1;");
        assert_eq!(down, None);
    }

    #[test]
    fn test_parse_migration_content_errors() {
        assert!(parse_migration_content("CREATE TABLE t (id INT);").is_err());
        assert!(parse_migration_content("-- just a comment\n").is_err());
        assert!(parse_migration_content("-- up\nSELECT 1;\n-- up\nSELECT 2;").is_err());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Create Users"), "create_users");
        assert_eq!(slugify("  add-email  column!"), "add_email_column");
        assert_eq!(slugify("!!!"), "");
    }
}
