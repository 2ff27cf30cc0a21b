use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use ydo_migrate::{
    Direction, DownTarget, EngineError, LockError, LockManager, LockPolicy, MemoryLock,
    MemoryVersionStore, MigrationDefinition, MigrationEngine, MigrationSet, RunOutcome,
    VersionRecord,
};

type Tables = BTreeMap<String, BTreeSet<String>>;

/// Understands just enough DDL to observe what migrations did
#[derive(Clone, Default)]
struct FakeSchema {
    tables: Arc<Mutex<Tables>>,
}

impl FakeSchema {
    fn execute(&self, sql: &str) -> Result<(), String> {
        let mut tables = self.tables.lock().unwrap();
        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let words: Vec<&str> = statement.split_whitespace().collect();
            match words.as_slice() {
                ["CREATE", "TABLE", name, ..] => {
                    if tables.contains_key(*name) {
                        return Err(format!("relation \"{name}\" already exists"));
                    }
                    tables.insert(name.to_string(), BTreeSet::new());
                }
                ["DROP", "TABLE", name] => {
                    tables
                        .remove(*name)
                        .ok_or_else(|| format!("table \"{name}\" does not exist"))?;
                }
                ["ALTER", "TABLE", name, "ADD", "COLUMN", column, ..] => {
                    let table = tables
                        .get_mut(*name)
                        .ok_or_else(|| format!("relation \"{name}\" does not exist"))?;
                    if !table.insert(column.to_string()) {
                        return Err(format!("column \"{column}\" already exists"));
                    }
                }
                ["ALTER", "TABLE", name, "DROP", "COLUMN", column] => {
                    let table = tables
                        .get_mut(*name)
                        .ok_or_else(|| format!("relation \"{name}\" does not exist"))?;
                    if !table.remove(*column) {
                        return Err(format!("column \"{column}\" does not exist"));
                    }
                }
                _ => return Err(format!("syntax error in \"{statement}\"")),
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Tables {
        self.tables.lock().unwrap().clone()
    }

    fn store(&self) -> MemoryVersionStore {
        let schema = self.clone();
        MemoryVersionStore::new().with_executor(move |sql| schema.execute(sql))
    }
}

fn users_and_email() -> Vec<MigrationDefinition> {
    vec![
        MigrationDefinition::new(1, "create_users", "CREATE TABLE users (id BIGINT);")
            .with_reverse("DROP TABLE users;"),
        MigrationDefinition::new(2, "add_email", "ALTER TABLE users ADD COLUMN email TEXT;")
            .with_reverse("ALTER TABLE users DROP COLUMN email;"),
    ]
}

fn three_migrations() -> Vec<MigrationDefinition> {
    let mut defs = users_and_email();
    defs.push(
        MigrationDefinition::new(3, "create_posts", "CREATE TABLE posts (id BIGINT);")
            .with_reverse("DROP TABLE posts;"),
    );
    defs
}

fn engine(
    defs: Vec<MigrationDefinition>,
    store: MemoryVersionStore,
) -> MigrationEngine<MemoryVersionStore, MemoryLock> {
    let set = MigrationSet::from_definitions(defs).unwrap();
    MigrationEngine::new(set, store, MemoryLock::new("tests"))
}

fn table(columns: &[&str]) -> BTreeSet<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

#[tokio::test]
async fn test_users_then_email_scenario() {
    let schema = FakeSchema::default();
    let store = schema.store();
    let engine = engine(users_and_email(), store.clone());

    let report = engine.up().await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Applied);
    assert_eq!(report.direction, Direction::Up);
    assert_eq!(report.applied, vec![1, 2]);
    assert_eq!((report.from_version, report.to_version), (0, 2));
    assert_eq!(store.record(), VersionRecord::clean(2));
    assert_eq!(schema.snapshot()["users"], table(&["email"]));

    let report = engine.down(DownTarget::default()).await.unwrap();
    assert_eq!(report.applied, vec![2]);
    assert_eq!(report.to_version, 1);
    assert_eq!(store.record(), VersionRecord::clean(1));
    assert_eq!(schema.snapshot()["users"], table(&[]));
}

#[tokio::test]
async fn test_up_twice_is_a_no_op() {
    let schema = FakeSchema::default();
    let store = schema.store();
    let engine = engine(three_migrations(), store.clone());

    engine.up().await.unwrap();
    let executed = store.executed().len();
    let history = store.history();

    let report = engine.up().await.unwrap();
    assert!(report.is_no_op());
    assert_eq!((report.from_version, report.to_version), (3, 3));
    assert_eq!(store.executed().len(), executed);
    assert_eq!(store.history(), history);
}

#[tokio::test]
async fn test_up_then_down_n_times_restores_schema() {
    let schema = FakeSchema::default();
    let before = schema.snapshot();
    let store = schema.store();
    let engine = engine(three_migrations(), store.clone());

    engine.up().await.unwrap();
    assert_eq!(schema.snapshot().len(), 2);

    let mut reverted = Vec::new();
    for _ in 0..3 {
        let report = engine.down(DownTarget::default()).await.unwrap();
        reverted.extend(report.applied);
    }

    assert_eq!(reverted, vec![3, 2, 1]);
    assert_eq!(store.record(), VersionRecord::clean(0));
    assert_eq!(schema.snapshot(), before);

    let err = engine.down(DownTarget::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::NoMigrationsApplied));
}

#[tokio::test]
async fn test_failed_step_leaves_dirty_and_blocks_next_run() {
    let schema = FakeSchema::default();
    let store = schema.store();
    let defs = vec![
        MigrationDefinition::new(1, "create_users", "CREATE TABLE users (id BIGINT);"),
        MigrationDefinition::new(2, "broken", "ALTER TABLE accounts ADD COLUMN email TEXT;"),
        MigrationDefinition::new(3, "create_posts", "CREATE TABLE posts (id BIGINT);"),
    ];
    let engine = engine(defs, store.clone());

    let err = engine.up().await.unwrap_err();
    match &err {
        EngineError::ExecutionFailed {
            version,
            direction,
            cause,
        } => {
            assert_eq!(*version, 2);
            assert_eq!(*direction, Direction::Up);
            assert_eq!(cause.to_string(), "relation \"accounts\" does not exist");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.leaves_dirty());
    assert_eq!(store.record(), VersionRecord::dirty(1));
    assert_eq!(store.executed().len(), 1);
    assert!(!schema.snapshot().contains_key("posts"));
    assert!(!engine.lock().is_locked());

    let err = engine.up().await.unwrap_err();
    assert!(matches!(err, EngineError::Dirty { version: 1 }));
    let err = engine.down(DownTarget::default()).await.unwrap_err();
    assert!(matches!(err, EngineError::Dirty { version: 1 }));
    assert_eq!(store.executed().len(), 1);
}

#[tokio::test]
async fn test_force_clears_dirty_without_running_scripts() {
    let store = MemoryVersionStore::with_record(VersionRecord::dirty(1));
    let engine = engine(users_and_email(), store.clone());

    let previous = engine.force(1).await.unwrap();
    assert_eq!(previous, VersionRecord::dirty(1));
    assert_eq!(store.record(), VersionRecord::clean(1));
    assert!(store.executed().is_empty());

    let err = engine.force(7).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTarget { .. }));

    engine.force(0).await.unwrap();
    assert_eq!(store.record(), VersionRecord::clean(0));
}

#[tokio::test]
async fn test_down_from_zero_does_not_mutate() {
    let store = MemoryVersionStore::new();
    let engine = engine(users_and_email(), store.clone());

    let err = engine.down(DownTarget::Version(0)).await.unwrap_err();
    assert!(matches!(err, EngineError::NoMigrationsApplied));
    assert!(store.history().is_empty());
    assert!(store.executed().is_empty());
}

#[tokio::test]
async fn test_down_to_version_and_step_bounds() {
    let schema = FakeSchema::default();
    let store = schema.store();
    let engine = engine(three_migrations(), store.clone());
    engine.up().await.unwrap();

    let history = store.history();
    let err = engine.down(DownTarget::Steps(4)).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTarget { .. }));
    assert_eq!(store.history(), history);

    let report = engine.down(DownTarget::Version(1)).await.unwrap();
    assert_eq!(report.applied, vec![3, 2]);
    assert_eq!(store.record(), VersionRecord::clean(1));
    assert_eq!(schema.snapshot().keys().collect::<Vec<_>>(), vec!["users"]);

    let report = engine.down(DownTarget::Version(1)).await.unwrap();
    assert!(report.is_no_op());
    let report = engine.down(DownTarget::Steps(0)).await.unwrap();
    assert!(report.is_no_op());
}

#[tokio::test]
async fn test_irreversible_migration_is_rejected_before_any_step() {
    let store = MemoryVersionStore::new();
    let defs = vec![
        MigrationDefinition::new(1, "a", "CREATE TABLE a (id INT);").with_reverse("DROP TABLE a;"),
        MigrationDefinition::new(2, "b", "CREATE TABLE b (id INT);"),
        MigrationDefinition::new(3, "c", "CREATE TABLE c (id INT);").with_reverse("DROP TABLE c;"),
    ];
    let engine = engine(defs, store.clone());
    engine.up().await.unwrap();
    let executed = store.executed().len();

    let err = engine.down(DownTarget::Version(0)).await.unwrap_err();
    assert!(matches!(err, EngineError::Irreversible { version: 2 }));
    assert_eq!(store.record(), VersionRecord::clean(3));
    assert_eq!(store.executed().len(), executed);
}

#[tokio::test]
async fn test_unknown_applied_version() {
    let store = MemoryVersionStore::with_record(VersionRecord::clean(9));
    let engine = engine(users_and_email(), store);

    assert!(matches!(
        engine.up().await,
        Err(EngineError::UnknownVersion { version: 9 })
    ));
    assert!(matches!(
        engine.down(DownTarget::default()).await,
        Err(EngineError::UnknownVersion { version: 9 })
    ));
}

#[tokio::test]
async fn test_status_reports_pending() {
    let store = MemoryVersionStore::with_record(VersionRecord::clean(1));
    let engine = engine(three_migrations(), store);

    let status = engine.status().await.unwrap();
    assert_eq!(status.current_version, 1);
    assert!(!status.dirty);
    assert_eq!(status.latest_version, 3);
    assert_eq!(status.applied, vec![1]);
    assert_eq!(status.pending, vec![2, 3]);
    assert!(!status.is_up_to_date());

    engine.up().await.unwrap();
    assert!(engine.status().await.unwrap().is_up_to_date());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_up_runs_exclusively() {
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (proceed_tx, proceed_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);
    let proceed_rx = Mutex::new(proceed_rx);

    let store = MemoryVersionStore::new().with_executor(move |_sql| {
        let _ = started_tx.lock().unwrap().send(());
        let _ = proceed_rx.lock().unwrap().recv();
        Ok(())
    });

    let lock = MemoryLock::new("concurrent");
    let set = MigrationSet::from_definitions(users_and_email()).unwrap();
    let first = Arc::new(MigrationEngine::new(set.clone(), store.clone(), lock.clone()));
    let second = MigrationEngine::new(set, store.clone(), lock);

    let running = tokio::spawn({
        let first = Arc::clone(&first);
        async move { first.up().await }
    });

    // Wait until the first run is blocked inside its first script
    tokio::task::spawn_blocking(move || started_rx.recv())
        .await
        .unwrap()
        .unwrap();

    let err = second.up().await.unwrap_err();
    assert!(matches!(err, EngineError::Lock(LockError::AlreadyLocked { .. })));

    drop(proceed_tx);
    let report = running.await.unwrap().unwrap();
    assert_eq!(report.applied, vec![1, 2]);
    assert_eq!(
        store.history(),
        vec![
            VersionRecord::dirty(0),
            VersionRecord::clean(1),
            VersionRecord::dirty(1),
            VersionRecord::clean(2),
        ]
    );
}

#[tokio::test]
async fn test_waiting_run_proceeds_after_release() {
    let store = MemoryVersionStore::new();
    let lock = MemoryLock::new("waiting");
    let waiting_lock = lock
        .clone()
        .with_policy(LockPolicy::wait(Duration::from_secs(5)).with_poll_interval(Duration::from_millis(5)));
    let set = MigrationSet::from_definitions(users_and_email()).unwrap();
    let engine = MigrationEngine::new(set, store.clone(), waiting_lock);

    let held = lock.acquire().await.unwrap();
    let task = tokio::spawn(async move { engine.up().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!task.is_finished());
    assert!(store.history().is_empty());

    lock.release(held).await.unwrap();
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.to_version, 2);
}

/// Lock whose release always fails
struct BrokenReleaseLock;

#[async_trait]
impl LockManager for BrokenReleaseLock {
    type Handle = ();

    async fn acquire(&self) -> Result<(), LockError> {
        Ok(())
    }

    async fn release(&self, _handle: ()) -> Result<(), LockError> {
        Err(LockError::Backend("connection reset while unlocking".into()))
    }
}

#[tokio::test]
async fn test_release_failure_is_reported_with_primary_error() {
    let store = MemoryVersionStore::new().with_executor(|sql| {
        if sql.contains("email") {
            Err("permission denied".to_string())
        } else {
            Ok(())
        }
    });
    let set = MigrationSet::from_definitions(users_and_email()).unwrap();
    let engine = MigrationEngine::new(set, store.clone(), BrokenReleaseLock);

    let err = engine.up().await.unwrap_err();
    match &err {
        EngineError::Release { primary, release } => {
            assert!(matches!(**primary, EngineError::ExecutionFailed { version: 2, .. }));
            assert!(matches!(release, LockError::Backend(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.leaves_dirty());
    assert_eq!(err.version(), Some(2));
    assert_eq!(store.record(), VersionRecord::dirty(1));
}

#[tokio::test]
async fn test_release_failure_after_success() {
    let store = MemoryVersionStore::new();
    let set = MigrationSet::from_definitions(users_and_email()).unwrap();
    let engine = MigrationEngine::new(set, store.clone(), BrokenReleaseLock);

    let err = engine.up().await.unwrap_err();
    assert!(matches!(err, EngineError::Lock(LockError::Backend(_))));
    assert_eq!(store.record(), VersionRecord::clean(2));
}
