use anyhow::{Context, Result};
use std::path::Path;
use ydo_migrate::{
    create_migration, DownTarget, MigrationEngine, MigrationSet, MigrationStatus, PgAdvisoryLock,
    PgVersionStore, RunReport,
};

use super::database;
use super::LoadedProject;

type PgEngine = MigrationEngine<PgVersionStore, PgAdvisoryLock>;

/// Connect to the configured database and wire up the engine
///
/// Redis is only checked for reachability, and only when `ping_redis` is set
/// and a `redis` section is configured.
async fn engine(project: LoadedProject, ping_redis: bool) -> Result<PgEngine> {
    let LoadedProject {
        config,
        migrations,
        lock_policy,
        ..
    } = project;

    if ping_redis {
        if let Some(redis) = &config.redis {
            database::ping_redis(redis).await?;
        }
    }

    let pool = database::connect(&config.database).await?;
    let store = PgVersionStore::with_table(pool.clone(), &config.migrations.table)
        .context("invalid migrations table")?;
    let lock = PgAdvisoryLock::new(pool, store.table()).with_policy(lock_policy);

    Ok(MigrationEngine::new(migrations, store, lock))
}

pub async fn up(project: LoadedProject) -> Result<()> {
    let engine = engine(project, true).await?;
    let report = engine.up().await.context("migration failed")?;

    if report.is_no_op() {
        println!("No pending migrations (version {})", report.to_version);
        return Ok(());
    }

    print_steps("applied", engine.migrations(), &report);
    println!("Migrations applied successfully");
    Ok(())
}

pub async fn down(project: LoadedProject, target: DownTarget) -> Result<()> {
    let engine = engine(project, true).await?;
    let report = engine.down(target).await.context("rollback failed")?;

    if report.is_no_op() {
        println!("Nothing to roll back (version {})", report.to_version);
        return Ok(());
    }

    print_steps("reverted", engine.migrations(), &report);
    println!("Migrations rolled back successfully");
    Ok(())
}

pub async fn status(project: LoadedProject, json: bool) -> Result<()> {
    let url = database::display_url(&project.config.database);
    let dir = project.migrations_dir.path.clone();
    let engine = engine(project, false).await?;
    let status = engine.status().await.context("failed to read migration status")?;

    if json {
        let output = serde_json::to_string_pretty(&status)?;
        println!("{}", output);
    } else {
        print_status(&url, &dir, engine.migrations(), &status);
    }
    Ok(())
}

pub async fn force(project: LoadedProject, version: u64) -> Result<()> {
    let engine = engine(project, true).await?;
    let previous = engine
        .force(version)
        .await
        .with_context(|| format!("failed to force version {}", version))?;

    println!(
        "Version forced to {} (was {}{})",
        version,
        previous.version,
        if previous.dirty { ", dirty" } else { "" }
    );
    Ok(())
}

pub fn create(dir: &Path, name: &str) -> Result<()> {
    let scaffold = create_migration(dir, name)
        .with_context(|| format!("failed to create migration in {}", dir.display()))?;

    println!("Created migration {}", scaffold.version);
    println!("  {}", scaffold.up_path.display());
    println!("  {}", scaffold.down_path.display());
    Ok(())
}

fn print_steps(verb: &str, set: &MigrationSet, report: &RunReport) {
    for version in &report.applied {
        let label = set
            .get(*version)
            .map(|migration| migration.label())
            .unwrap_or_else(|| version.to_string());
        println!("  {} {}", verb, label);
    }
    println!(
        "Version {} -> {} in {:.2?}",
        report.from_version, report.to_version, report.duration
    );
}

fn print_status(url: &str, dir: &Path, set: &MigrationSet, status: &MigrationStatus) {
    println!("Database:   {}", url);
    println!("Migrations: {}", dir.display());
    println!(
        "Version:    {}{}",
        status.current_version,
        if status.dirty { " (dirty)" } else { "" }
    );
    println!("Latest:     {}", status.latest_version);

    if status.dirty {
        println!();
        println!(
            "A previous run did not finish. Repair the database, then run `migrate force <version>`."
        );
    }

    if status.pending.is_empty() {
        println!();
        println!("No pending migrations");
        return;
    }

    println!();
    println!("Pending ({}):", status.pending.len());
    for version in &status.pending {
        if let Some(migration) = set.get(*version) {
            let note = if migration.is_reversible() { "" } else { "  [irreversible]" };
            println!("  {}{}", migration.label(), note);
        }
    }
}
