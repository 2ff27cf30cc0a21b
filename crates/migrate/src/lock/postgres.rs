//! PostgreSQL advisory lock
//!
//! Session-level advisory locks belong to a connection, so the handle pins
//! one pooled connection until release.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};

use super::{Attempts, LockManager, LockPolicy};
use crate::error::LockError;
use crate::targets;

/// Derive a stable advisory lock key from the database identity
pub fn advisory_lock_id(database: &str, schema: &str, table: &str) -> i64 {
    let mut hasher = blake3::Hasher::new();
    for part in [database, schema, table] {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }

    let digest = hasher.finalize();
    let mut key = [0u8; 8];
    key.copy_from_slice(&digest.as_bytes()[..8]);
    i64::from_be_bytes(key)
}

/// Cross-process lock keyed by database, schema and version table
#[derive(Debug, Clone)]
pub struct PgAdvisoryLock {
    pool: PgPool,
    table: String,
    policy: LockPolicy,
}

impl PgAdvisoryLock {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
            policy: LockPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: LockPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn lock_id(&self, conn: &mut PoolConnection<Postgres>) -> Result<i64, LockError> {
        let (database, schema): (String, Option<String>) =
            sqlx::query_as("SELECT current_database()::text, current_schema()::text")
                .fetch_one(&mut **conn)
                .await?;

        Ok(advisory_lock_id(
            &database,
            schema.as_deref().unwrap_or_default(),
            &self.table,
        ))
    }
}

/// Ownership of a [`PgAdvisoryLock`]
///
/// Dropping the handle without releasing it closes the pinned session, which
/// makes the server drop the lock.
#[derive(Debug)]
pub struct PgLockHandle {
    conn: Option<PoolConnection<Postgres>>,
    lock_id: i64,
}

impl PgLockHandle {
    pub fn lock_id(&self) -> i64 {
        self.lock_id
    }
}

impl Drop for PgLockHandle {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(
                target: targets::LOCK,
                lock_id = self.lock_id,
                "Migration lock handle dropped without release, closing its session"
            );
            drop(conn.detach());
        }
    }
}

#[async_trait]
impl LockManager for PgAdvisoryLock {
    type Handle = PgLockHandle;

    async fn acquire(&self) -> Result<PgLockHandle, LockError> {
        let mut conn = self.pool.acquire().await?;
        let lock_id = self.lock_id(&mut conn).await?;
        let attempts = Attempts::start(self.policy);

        loop {
            let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                .bind(lock_id)
                .fetch_one(&mut *conn)
                .await?;

            if locked {
                tracing::debug!(target: targets::LOCK, lock_id, "Migration lock acquired");
                return Ok(PgLockHandle {
                    conn: Some(conn),
                    lock_id,
                });
            }

            attempts.wait(lock_id).await?;
        }
    }

    async fn release(&self, mut handle: PgLockHandle) -> Result<(), LockError> {
        let lock_id = handle.lock_id;
        let Some(mut conn) = handle.conn.take() else {
            return Err(LockError::NotHeld { lock_id });
        };

        let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(lock_id)
            .fetch_one(&mut *conn)
            .await;

        match unlocked {
            Ok(true) => {
                tracing::debug!(target: targets::LOCK, lock_id, "Migration lock released");
                Ok(())
            }
            Ok(false) => Err(LockError::NotHeld { lock_id }),
            Err(err) => {
                // The session may still hold the lock; never hand it back to the pool.
                drop(conn.detach());
                Err(err.into())
            }
        }
    }
}
