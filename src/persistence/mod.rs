//! Persistence for the branch store.
//!
//! The store hands its full state, as an [`ExportEnvelope`], to a
//! [`Persistence`] backend after mutations. Backends only need to store and
//! return that envelope; versioning and validation live in [`codec`].

mod autosave;
pub mod codec;
mod file;
mod memory;

pub use autosave::Autosaver;
pub use codec::{ExportEnvelope, FORMAT_VERSION};
pub use file::{FileBackend, FileFormat};
pub use memory::MemoryBackend;

use crate::error::Result;

/// State written by backends: the same envelope used for export.
pub type PersistedState = ExportEnvelope;

/// Storage for the store state.
pub trait Persistence: Send + Sync {
    /// Replace the stored state.
    fn save(&self, state: &PersistedState) -> Result<()>;

    /// Stored state, if any has been saved.
    fn load(&self) -> Result<Option<PersistedState>>;
}
