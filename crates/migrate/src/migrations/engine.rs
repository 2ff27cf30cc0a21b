//! Migration Engine - applies and reverts migrations
//!
//! Every mutating operation runs under the lock manager. Each step first
//! marks the current version dirty, then executes its script and records the
//! new clean version in one unit, so an interrupted step stays detectable.

use std::future::Future;
use std::time::Instant;

use super::definitions::{Direction, DownTarget, MigrationStatus, RunOutcome, RunReport};
use super::planner::PlannedStep;
use super::source::MigrationSet;
use crate::error::{ApplyError, EngineError, EngineResult};
use crate::lock::LockManager;
use crate::store::{VersionRecord, VersionStore};
use crate::targets;

/// Orchestrates a migration set, a version store and a lock manager
#[derive(Debug)]
pub struct MigrationEngine<S, L> {
    set: MigrationSet,
    store: S,
    lock: L,
}

impl<S, L> MigrationEngine<S, L>
where
    S: VersionStore,
    L: LockManager,
{
    pub fn new(set: MigrationSet, store: S, lock: L) -> Self {
        Self { set, store, lock }
    }

    pub fn migrations(&self) -> &MigrationSet {
        &self.set
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn lock(&self) -> &L {
        &self.lock
    }

    /// Apply every migration newer than the current version
    pub async fn up(&self) -> EngineResult<RunReport> {
        self.with_lock("up", self.run_up()).await
    }

    /// Revert applied migrations down to `target`
    pub async fn down(&self, target: DownTarget) -> EngineResult<RunReport> {
        self.with_lock("down", self.run_down(target)).await
    }

    /// Report applied and pending versions without locking or mutating anything
    pub async fn status(&self) -> EngineResult<MigrationStatus> {
        let record = self.store.read().await?;
        let (applied, pending): (Vec<u64>, Vec<u64>) = self
            .set
            .versions()
            .into_iter()
            .partition(|version| *version <= record.version);

        Ok(MigrationStatus {
            current_version: record.version,
            dirty: record.dirty,
            latest_version: self.set.latest_version(),
            applied,
            pending,
        })
    }

    /// Overwrite the record with `(version, clean)` without running any script
    ///
    /// This is the operator's way out of a dirty state once the database has
    /// been repaired by hand. Returns the record that was replaced.
    pub async fn force(&self, version: u64) -> EngineResult<VersionRecord> {
        if version != 0 && !self.set.contains(version) {
            return Err(EngineError::InvalidTarget {
                reason: format!("version {} is not in the migration set", version),
            });
        }

        self.with_lock("force", self.run_force(version)).await
    }

    async fn run_force(&self, version: u64) -> EngineResult<VersionRecord> {
        self.store.initialize().await?;
        let previous = self.store.read().await?;
        self.store.write(VersionRecord::clean(version)).await?;

        tracing::warn!(
            target: targets::ENGINE,
            from = previous.version,
            was_dirty = previous.dirty,
            to = version,
            "Version record forced"
        );
        Ok(previous)
    }

    async fn run_up(&self) -> EngineResult<RunReport> {
        let started = Instant::now();
        self.store.initialize().await?;

        let record = self.read_clean_record().await?;
        tracing::debug!(target: targets::ENGINE, current = record.version, "Planning up migration");
        let plan = self.set.plan_up(record.version)?;

        self.execute(Direction::Up, record.version, plan, started).await
    }

    async fn run_down(&self, target: DownTarget) -> EngineResult<RunReport> {
        let started = Instant::now();

        // The record table is not created here: an uninitialized database reads
        // as version 0 and fails below without being touched.
        let record = self.read_clean_record().await?;
        tracing::debug!(target: targets::ENGINE, current = record.version, ?target, "Planning down migration");
        let plan = self.set.plan_down(record.version, target)?;

        self.execute(Direction::Down, record.version, plan, started).await
    }

    async fn read_clean_record(&self) -> EngineResult<VersionRecord> {
        let record = self.store.read().await?;
        if record.dirty {
            return Err(EngineError::Dirty {
                version: record.version,
            });
        }
        Ok(record)
    }

    async fn execute(
        &self,
        direction: Direction,
        from_version: u64,
        plan: Vec<PlannedStep<'_>>,
        started: Instant,
    ) -> EngineResult<RunReport> {
        if plan.is_empty() {
            tracing::info!(target: targets::ENGINE, %direction, version = from_version, "No migrations to run");
            return Ok(RunReport::no_op(direction, from_version, started.elapsed()));
        }

        let total = plan.len();
        let mut current = from_version;
        let mut applied = Vec::with_capacity(total);

        for (idx, step) in plan.iter().enumerate() {
            let script = step.script()?;
            let version = step.version();

            tracing::info!(
                target: targets::ENGINE,
                %direction,
                version,
                name = %step.migration.name,
                step = idx + 1,
                total,
                "Executing migration"
            );

            self.store.write(VersionRecord::dirty(current)).await?;

            let step_started = Instant::now();
            match self
                .store
                .apply(script, VersionRecord::clean(step.target_version))
                .await
            {
                Ok(()) => {}
                Err(ApplyError::Script(cause)) => {
                    tracing::error!(
                        target: targets::ENGINE,
                        %direction,
                        version,
                        error = %cause,
                        "Migration failed, version record left dirty"
                    );
                    return Err(EngineError::ExecutionFailed {
                        version,
                        direction,
                        cause,
                    });
                }
                Err(ApplyError::Store(err)) => return Err(err.into()),
            }

            tracing::debug!(
                target: targets::ENGINE,
                version,
                recorded = step.target_version,
                elapsed_ms = step_started.elapsed().as_millis() as u64,
                "Migration committed"
            );

            current = step.target_version;
            applied.push(version);
        }

        let report = RunReport {
            direction,
            from_version,
            to_version: current,
            applied,
            duration: started.elapsed(),
            outcome: RunOutcome::Applied,
        };

        tracing::info!(
            target: targets::ENGINE,
            %direction,
            from = report.from_version,
            to = report.to_version,
            count = report.applied_count(),
            elapsed_ms = report.duration.as_millis() as u64,
            "Migrations complete"
        );

        Ok(report)
    }

    /// Run `operation` while holding the lock, releasing it on every exit path
    async fn with_lock<T>(
        &self,
        operation_name: &'static str,
        operation: impl Future<Output = EngineResult<T>>,
    ) -> EngineResult<T> {
        let handle = self.lock.acquire().await?;
        tracing::debug!(target: targets::ENGINE, operation = operation_name, "Locked");

        let result = operation.await;
        let released = self.lock.release(handle).await;
        tracing::debug!(
            target: targets::ENGINE,
            operation = operation_name,
            released = released.is_ok(),
            "Unlocked"
        );

        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(release)) => Err(EngineError::Lock(release)),
            (Err(primary), Ok(())) => Err(primary),
            (Err(primary), Err(release)) => Err(EngineError::Release {
                primary: Box::new(primary),
                release,
            }),
        }
    }
}
