//! # Branch Store
//!
//! Git-like branching for conversation histories. A store keeps a tree of
//! named branches, each an ordered list of messages, with one branch
//! current at any time.
//!
//! ## Core Concepts
//!
//! - **Branches**: Forked from a parent at any message, isolated afterwards
//! - **Edits**: Editing a message forks a new branch by default
//! - **Merges**: Append, interleave, replace or smart strategies
//! - **Checkpoints**: Named snapshots of the whole store
//! - **Persistence**: Versioned export/import and best-effort autosave
//!
//! ## Example
//!
//! ```ignore
//! use branch_store::{BranchStore, ForkOptions, MessageInput, StoreConfig};
//!
//! let store = BranchStore::in_memory(StoreConfig::default());
//! store.add_message(MessageInput::user("Plan a trip to Lisbon"));
//! store.add_message(MessageInput::assistant("Here is a three day plan..."));
//!
//! // Explore an alternative without touching main
//! store.fork("budget", ForkOptions::from_message(0))?;
//! store.add_message(MessageInput::assistant("Here is a budget plan..."));
//!
//! let diff = store.compare_branches("main", "budget")?;
//! assert_eq!(diff.divergence_point, 1);
//! ```

pub mod branches;
pub mod checkpoints;
pub mod error;
pub mod persistence;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use branches::{
    BranchComparison, BranchManager, BranchTree, CreateBranchOptions, DeleteOutcome,
    EditOptions, EditOutcome, ForkOptions, MergeOptions, MergeOutcome, MAIN_BRANCH,
};
pub use checkpoints::{Checkpoint, CheckpointSummary, StoreSnapshot};
pub use error::{Result, StoreError};
pub use persistence::{
    Autosaver, ExportEnvelope, FileBackend, FileFormat, MemoryBackend, Persistence,
    FORMAT_VERSION,
};
pub use store::{BranchStore, StoreConfig};
pub use subscriptions::{
    BranchSummary, DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
pub use types::{
    Branch, BranchId, BranchMetadata, BranchStats, HistoryAction, HistoryEntry, MergeRecord,
    MergeStrategy, Message, MessageId, MessageInput, Role, StoreMetadata, StoreStats, Timestamp,
};
