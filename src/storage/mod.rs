//! Persistence port for the conversation store.
//!
//! The store hands its full state to a [`StateStorage`] after every
//! successful mutation and reads it back once at startup.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::PersistedState;

pub mod json_file;

pub use json_file::JsonFileStorage;

/// Durable home of the single persisted state record.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Returns `None` on first run, when nothing has been saved yet.
    async fn load(&self) -> Result<Option<PersistedState>, AppError>;

    /// Replaces the stored record with `state`.
    async fn save(&self, state: &PersistedState) -> Result<(), AppError>;
}

/// Process-local storage, used in tests and as a throwaway backend.
#[derive(Default)]
pub struct InMemoryStorage {
    state: Mutex<Option<PersistedState>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self { state: Mutex::new(Some(state)), ..Self::default() }
    }

    /// Makes every subsequent `save` fail until switched back.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<PersistedState> {
        self.state.lock().ok().and_then(|s| s.clone())
    }
}

#[async_trait]
impl StateStorage for InMemoryStorage {
    async fn load(&self) -> Result<Option<PersistedState>, AppError> {
        let guard = self
            .state
            .lock()
            .map_err(|e| AppError::Unexpected(format!("storage lock poisoned: {e}")))?;
        Ok(guard.clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), AppError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AppError::storage_io(
                "in-memory save rejected",
                std::io::Error::new(std::io::ErrorKind::Other, "save disabled"),
            ));
        }
        let mut guard = self
            .state
            .lock()
            .map_err(|e| AppError::Unexpected(format!("storage lock poisoned: {e}")))?;
        *guard = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
