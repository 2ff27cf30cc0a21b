//! PostgreSQL version store
//!
//! Keeps a single-row table. Postgres supports transactional DDL, so a
//! migration script and its version update commit together.

use async_trait::async_trait;
use sqlx::{Executor, PgPool};

use super::{VersionRecord, VersionStore};
use crate::error::{ApplyError, StoreError};
use crate::migrations::definitions::is_blank_script;
use crate::targets;

/// Version store backed by a table in the target database
#[derive(Debug, Clone)]
pub struct PgVersionStore {
    pool: PgPool,
    table: String,
}

impl PgVersionStore {
    pub const DEFAULT_TABLE: &'static str = "schema_migrations";

    /// Store using the default `schema_migrations` table
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            table: Self::DEFAULT_TABLE.to_string(),
        }
    }

    /// Store using a custom, optionally schema-qualified, table name
    pub fn with_table(pool: PgPool, table: impl Into<String>) -> Result<Self, StoreError> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { pool, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (id, version, dirty, updated_at) VALUES (1, $1, $2, now()) \
             ON CONFLICT (id) DO UPDATE SET version = EXCLUDED.version, dirty = EXCLUDED.dirty, updated_at = now()",
            self.table
        )
    }
}

fn to_db_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| {
        StoreError::InvalidRecord(format!("version {} does not fit in a BIGINT column", version))
    })
}

/// Accept `name` or `schema.name` made of `[A-Za-z_][A-Za-z0-9_]*` parts
fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let parts: Vec<&str> = table.split('.').collect();
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            && part.len() <= 63
    };

    if parts.len() > 2 || !parts.iter().all(|part| valid_part(part)) {
        return Err(StoreError::InvalidConfiguration(format!(
            "invalid migrations table name '{}'",
            table
        )));
    }
    Ok(())
}

#[async_trait]
impl VersionStore for PgVersionStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                id SMALLINT PRIMARY KEY DEFAULT 1 CHECK (id = 1), \
                version BIGINT NOT NULL, \
                dirty BOOLEAN NOT NULL, \
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()\
            )",
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;

        tracing::debug!(target: targets::STORE, table = %self.table, "Version table ready");
        Ok(())
    }

    async fn read(&self) -> Result<VersionRecord, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(&self.table)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Ok(VersionRecord::default());
        }

        let sql = format!("SELECT version, dirty FROM {} WHERE id = 1", self.table);
        let row: Option<(i64, bool)> = sqlx::query_as(&sql).fetch_optional(&self.pool).await?;

        let record = match row {
            None => VersionRecord::default(),
            Some((version, dirty)) => {
                let version = u64::try_from(version).map_err(|_| {
                    StoreError::InvalidRecord(format!("negative version {} in {}", version, self.table))
                })?;
                VersionRecord { version, dirty }
            }
        };

        tracing::trace!(target: targets::STORE, version = record.version, dirty = record.dirty, "Read version record");
        Ok(record)
    }

    async fn write(&self, record: VersionRecord) -> Result<(), StoreError> {
        sqlx::query(&self.upsert_sql())
            .bind(to_db_version(record.version)?)
            .bind(record.dirty)
            .execute(&self.pool)
            .await?;

        tracing::trace!(target: targets::STORE, version = record.version, dirty = record.dirty, "Wrote version record");
        Ok(())
    }

    async fn apply(&self, script: &str, record: VersionRecord) -> Result<(), ApplyError> {
        let version = to_db_version(record.version)?;
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        // A plain &str has no bind arguments, so it runs over the simple query
        // protocol and may contain several statements.
        if !is_blank_script(script) {
            (&mut *tx)
                .execute(script)
                .await
                .map_err(|e| ApplyError::Script(Box::new(e)))?;
        }

        sqlx::query(&self.upsert_sql())
            .bind(version)
            .bind(record.dirty)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;

        tx.commit()
            .await
            .map_err(|e| ApplyError::Script(Box::new(e)))?;

        tracing::trace!(target: targets::STORE, version = record.version, "Applied script and version record");
        Ok(())
    }
}
