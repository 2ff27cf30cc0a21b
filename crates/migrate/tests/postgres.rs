//! Runs against a real server only when `TEST_DATABASE_URL` is set

use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use std::time::Duration;

use ydo_migrate::{
    DownTarget, EngineError, LockError, LockManager, LockPolicy, MigrationDefinition,
    MigrationEngine, MigrationSet, PgAdvisoryLock, PgVersionStore, VersionRecord, VersionStore,
};

const TABLE: &str = "ydo_it_schema_migrations";

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    let cleanup = format!(
        "DROP TABLE IF EXISTS ydo_it_users; DROP TABLE IF EXISTS ydo_it_partial; DROP TABLE IF EXISTS {TABLE};"
    );
    pool.execute(cleanup.as_str()).await.unwrap();

    Some(pool)
}

async fn table_exists(pool: &PgPool, table: &str) -> bool {
    sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .bind(table)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn engine(pool: &PgPool, defs: Vec<MigrationDefinition>) -> MigrationEngine<PgVersionStore, PgAdvisoryLock> {
    let store = PgVersionStore::with_table(pool.clone(), TABLE).unwrap();
    let lock = PgAdvisoryLock::new(pool.clone(), TABLE);
    MigrationEngine::new(MigrationSet::from_definitions(defs).unwrap(), store, lock)
}

#[tokio::test]
#[serial]
async fn test_postgres_up_and_down() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let engine = engine(
        &pool,
        vec![
            MigrationDefinition::new(
                1,
                "create_users",
                "CREATE TABLE ydo_it_users (id BIGSERIAL PRIMARY KEY);\n\
                 CREATE INDEX ydo_it_users_id ON ydo_it_users (id);",
            )
            .with_reverse("DROP TABLE ydo_it_users;"),
            MigrationDefinition::new(2, "add_email", "ALTER TABLE ydo_it_users ADD COLUMN email TEXT;")
                .with_reverse("ALTER TABLE ydo_it_users DROP COLUMN email;"),
        ],
    );

    let status = engine.status().await.unwrap();
    assert_eq!(status.current_version, 0);
    assert!(!table_exists(&pool, TABLE).await);

    let report = engine.up().await.unwrap();
    assert_eq!(report.applied, vec![1, 2]);
    assert_eq!(engine.store().read().await.unwrap(), VersionRecord::clean(2));
    assert!(engine.up().await.unwrap().is_no_op());

    engine.down(DownTarget::default()).await.unwrap();
    assert_eq!(engine.store().read().await.unwrap(), VersionRecord::clean(1));
    assert!(table_exists(&pool, "ydo_it_users").await);

    engine.down(DownTarget::default()).await.unwrap();
    assert!(!table_exists(&pool, "ydo_it_users").await);
    assert!(matches!(
        engine.down(DownTarget::default()).await,
        Err(EngineError::NoMigrationsApplied)
    ));
}

#[tokio::test]
#[serial]
async fn test_postgres_failed_script_rolls_back_and_marks_dirty() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let engine = engine(
        &pool,
        vec![
            MigrationDefinition::new(1, "create_users", "CREATE TABLE ydo_it_users (id BIGINT);"),
            MigrationDefinition::new(
                2,
                "broken",
                "CREATE TABLE ydo_it_partial (id BIGINT);\nSELECT * FROM ydo_it_missing;",
            ),
        ],
    );

    let err = engine.up().await.unwrap_err();
    assert!(matches!(err, EngineError::ExecutionFailed { version: 2, .. }));
    assert_eq!(engine.store().read().await.unwrap(), VersionRecord::dirty(1));
    assert!(table_exists(&pool, "ydo_it_users").await);
    assert!(!table_exists(&pool, "ydo_it_partial").await);

    assert!(matches!(engine.up().await, Err(EngineError::Dirty { version: 1 })));

    engine.force(1).await.unwrap();
    assert_eq!(engine.store().read().await.unwrap(), VersionRecord::clean(1));
}

#[tokio::test]
#[serial]
async fn test_postgres_advisory_lock_is_exclusive() {
    let Some(pool) = test_pool().await else {
        return;
    };

    let first = PgAdvisoryLock::new(pool.clone(), TABLE);
    let second = PgAdvisoryLock::new(pool.clone(), TABLE);

    let handle = first.acquire().await.unwrap();
    assert!(matches!(
        second.acquire().await,
        Err(LockError::AlreadyLocked { .. })
    ));
    first.release(handle).await.unwrap();

    // A dropped handle closes its session, which frees the lock server-side
    let dropped = second.acquire().await.unwrap();
    drop(dropped);

    let waiting = first.with_policy(
        LockPolicy::wait(Duration::from_secs(5)).with_poll_interval(Duration::from_millis(20)),
    );
    let handle = waiting.acquire().await.unwrap();
    waiting.release(handle).await.unwrap();
}
