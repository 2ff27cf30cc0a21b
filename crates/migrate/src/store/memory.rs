//! In-memory version store
//!
//! Scripts are handed to an optional executor closure instead of a database,
//! which makes the engine testable and usable for dry runs.

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{VersionRecord, VersionStore};
use crate::error::{ApplyError, StoreError};

type Executor = dyn Fn(&str) -> Result<(), String> + Send + Sync;

#[derive(Debug, Default)]
struct MemoryState {
    record: Option<VersionRecord>,
    initialized: bool,
    unavailable: bool,
    executed: Vec<String>,
    history: Vec<VersionRecord>,
}

/// Process-local [`VersionStore`]; clones share state
#[derive(Clone, Default)]
pub struct MemoryVersionStore {
    state: Arc<Mutex<MemoryState>>,
    executor: Option<Arc<Executor>>,
}

impl fmt::Debug for MemoryVersionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryVersionStore")
            .field("state", &self.state)
            .field("executor", &self.executor.is_some())
            .finish()
    }
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing record, as if a previous run wrote it
    pub fn with_record(record: VersionRecord) -> Self {
        let store = Self::default();
        store.state().record = Some(record);
        store
    }

    /// Run every script through `executor`; an `Err` fails the step
    pub fn with_executor<F>(mut self, executor: F) -> Self
    where
        F: Fn(&str) -> Result<(), String> + Send + Sync + 'static,
    {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Simulate losing (or regaining) the connection
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Current record without going through the async trait
    pub fn record(&self) -> VersionRecord {
        self.state().record.unwrap_or_default()
    }

    /// Scripts that ran successfully, in order
    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// Every record written, in order
    pub fn history(&self) -> Vec<VersionRecord> {
        self.state().history.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connected(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        let state = self.state();
        if state.unavailable {
            return Err(StoreError::ConnectionFailed("memory store is unavailable".into()));
        }
        Ok(state)
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        self.connected()?.initialized = true;
        Ok(())
    }

    async fn read(&self) -> Result<VersionRecord, StoreError> {
        Ok(self.connected()?.record.unwrap_or_default())
    }

    async fn write(&self, record: VersionRecord) -> Result<(), StoreError> {
        let mut state = self.connected()?;
        state.record = Some(record);
        state.history.push(record);
        Ok(())
    }

    async fn apply(&self, script: &str, record: VersionRecord) -> Result<(), ApplyError> {
        let mut state = self.connected()?;

        if let Some(executor) = &self.executor {
            executor(script).map_err(|cause| ApplyError::Script(cause.into()))?;
        }

        state.executed.push(script.to_string());
        state.record = Some(record);
        state.history.push(record);
        Ok(())
    }
}
