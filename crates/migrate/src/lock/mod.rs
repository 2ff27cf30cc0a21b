//! Mutual exclusion between migration runs
//!
//! Acquisition fails fast by default. [`LockPolicy::wait`] makes it poll
//! until a timeout elapses instead.

use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::error::LockError;
use crate::targets;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryLock, MemoryLockHandle};
pub use postgres::{advisory_lock_id, PgAdvisoryLock, PgLockHandle};

/// Exclusive lock guarding the version store and script execution
///
/// A handle dropped without [`release`](LockManager::release) still frees the
/// lock, so a cancelled or panicking run cannot wedge later runs.
#[async_trait]
pub trait LockManager: Send + Sync {
    type Handle: Send;

    async fn acquire(&self) -> Result<Self::Handle, LockError>;

    async fn release(&self, handle: Self::Handle) -> Result<(), LockError>;
}

/// How long [`LockManager::acquire`] waits for a competing holder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// `None` fails on the first busy attempt
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl LockPolicy {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

    pub fn fail_fast() -> Self {
        Self {
            timeout: None,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn wait(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    /// `0` means fail fast
    pub fn from_timeout_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::fail_fast()
        } else {
            Self::wait(Duration::from_secs(secs))
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::fail_fast()
    }
}

/// Tracks one acquisition loop against a [`LockPolicy`]
pub(crate) struct Attempts {
    policy: LockPolicy,
    started: Instant,
}

impl Attempts {
    pub(crate) fn start(policy: LockPolicy) -> Self {
        Self {
            policy,
            started: Instant::now(),
        }
    }

    /// Sleep before the next attempt, or give up with `AlreadyLocked`
    pub(crate) async fn wait(&self, lock_id: i64) -> Result<(), LockError> {
        let waited = self.started.elapsed();
        match self.policy.timeout {
            Some(timeout) if waited < timeout => {
                tracing::debug!(target: targets::LOCK, lock_id, ?waited, "Migration lock busy, waiting");
                tokio::time::sleep(self.policy.poll_interval.min(timeout - waited)).await;
                Ok(())
            }
            _ => Err(LockError::AlreadyLocked { lock_id, waited }),
        }
    }
}
