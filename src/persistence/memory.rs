//! In-memory persistence backend.

use super::{Persistence, PersistedState};
use crate::error::{Result, StoreError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Keeps the last saved state in memory.
///
/// Useful for hosts that persist elsewhere and for exercising the autosave
/// path; `set_failing(true)` makes every save fail.
#[derive(Default)]
pub struct MemoryBackend {
    saved: Mutex<Option<PersistedState>>,
    failing: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing state, as if it had been saved earlier.
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            saved: Mutex::new(Some(state)),
            ..Default::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn saved(&self) -> Option<PersistedState> {
        self.saved.lock().clone()
    }
}

impl Persistence for MemoryBackend {
    fn save(&self, state: &PersistedState) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "memory backend set to fail",
            )));
        }
        *self.saved.lock() = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>> {
        Ok(self.saved.lock().clone())
    }
}
