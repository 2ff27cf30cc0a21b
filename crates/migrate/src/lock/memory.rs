//! In-process lock for tests and single-process embedding

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{advisory_lock_id, Attempts, LockManager, LockPolicy};
use crate::error::LockError;
use crate::targets;

/// Process-local lock; clones contend for the same lock
#[derive(Debug, Clone)]
pub struct MemoryLock {
    inner: Arc<Mutex<()>>,
    lock_id: i64,
    policy: LockPolicy,
}

/// Ownership of a [`MemoryLock`]; dropping it unlocks
#[derive(Debug)]
pub struct MemoryLockHandle {
    guard: OwnedMutexGuard<()>,
    lock_id: i64,
}

impl MemoryLockHandle {
    pub fn lock_id(&self) -> i64 {
        self.lock_id
    }
}

impl MemoryLock {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
            lock_id: advisory_lock_id("memory", "", name),
            policy: LockPolicy::default(),
        }
    }

    /// Same underlying lock with a different acquisition policy
    pub fn with_policy(mut self, policy: LockPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn lock_id(&self) -> i64 {
        self.lock_id
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

#[async_trait]
impl LockManager for MemoryLock {
    type Handle = MemoryLockHandle;

    async fn acquire(&self) -> Result<MemoryLockHandle, LockError> {
        let attempts = Attempts::start(self.policy);
        loop {
            if let Ok(guard) = Arc::clone(&self.inner).try_lock_owned() {
                tracing::debug!(target: targets::LOCK, lock_id = self.lock_id, "Memory lock acquired");
                return Ok(MemoryLockHandle {
                    guard,
                    lock_id: self.lock_id,
                });
            }
            attempts.wait(self.lock_id).await?;
        }
    }

    async fn release(&self, handle: MemoryLockHandle) -> Result<(), LockError> {
        if !Arc::ptr_eq(OwnedMutexGuard::mutex(&handle.guard), &self.inner) {
            return Err(LockError::NotHeld {
                lock_id: self.lock_id,
            });
        }
        drop(handle);
        tracing::debug!(target: targets::LOCK, lock_id = self.lock_id, "Memory lock released");
        Ok(())
    }
}
