pub mod database;
pub mod migrate;

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use ydo_core::{resolve_path, Config, ProjectPaths, SourcedPath, DEFAULT_MIGRATIONS_DIR};
use ydo_migrate::{load_migrations, LockPolicy, MigrationSet};

/// Options accepted by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Configuration file [default: <project root>/config.yaml]
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Migrations directory [default: <project root>/db/migrations]
    #[arg(long, global = true, value_name = "DIR")]
    pub migrations: Option<PathBuf>,

    /// Seconds to wait for the migration lock (0 fails immediately)
    #[arg(long, global = true, value_name = "SECS")]
    pub lock_timeout: Option<u64>,

    /// Log level written to stderr
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Everything a database-backed command needs before connecting
#[derive(Debug)]
pub struct LoadedProject {
    pub config: Config,
    pub migrations: MigrationSet,
    pub migrations_dir: SourcedPath,
    pub lock_policy: LockPolicy,
}

impl GlobalOptions {
    pub fn load(&self) -> Result<LoadedProject> {
        let cwd = std::env::current_dir().context("cannot determine working directory")?;
        self.load_from(&cwd)
    }

    pub fn load_from(&self, cwd: &Path) -> Result<LoadedProject> {
        let paths = ProjectPaths::resolve(cwd, self.config.clone(), self.migrations.clone())
            .context("failed to locate project files")?;

        let config = Config::load(&paths.config.path).with_context(|| {
            format!(
                "failed to load configuration {} ({})",
                paths.config.path.display(),
                paths.config.source
            )
        })?;

        let migrations = load_migrations(&paths.migrations.path).with_context(|| {
            format!(
                "failed to load migrations from {} ({})",
                paths.migrations.path.display(),
                paths.migrations.source
            )
        })?;

        let lock_policy = LockPolicy::from_timeout_secs(
            self.lock_timeout
                .unwrap_or(config.migrations.lock_timeout_secs),
        );

        tracing::debug!(
            target: "ydo::cli",
            config = %paths.config.path.display(),
            migrations = %paths.migrations.path.display(),
            count = migrations.len(),
            "Project loaded"
        );

        Ok(LoadedProject {
            config,
            migrations,
            migrations_dir: paths.migrations,
            lock_policy,
        })
    }

    /// Migrations directory alone, for commands that never touch the database
    pub fn migrations_dir(&self) -> Result<SourcedPath> {
        let cwd = std::env::current_dir().context("cannot determine working directory")?;
        resolve_path(&cwd, self.migrations.clone(), DEFAULT_MIGRATIONS_DIR)
            .context("failed to locate migrations directory")
    }
}
