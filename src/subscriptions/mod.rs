//! Subscription system for live store updates.
//!
//! This module provides in-process subscriptions to store events:
//! - Branch operations (create, switch, merge, delete)
//! - Message appends and edits
//! - Checkpoint restores and imports
//!
//! Subscriptions support:
//! - Filtering by event category and branch name
//! - Any number of subscribers, added and removed at runtime
//! - Bounded buffers with slow-subscriber dropping
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(SubscriptionConfig {
//!     filter: SubscriptionFilter::branches(),
//!     ..Default::default()
//! });
//!
//! while let Ok(event) = handle.recv() {
//!     match event {
//!         StoreEvent::BranchCreated { branch } => println!("new branch {}", branch.name),
//!         StoreEvent::Dropped { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    BranchSummary, DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter,
    SubscriptionHandle, SubscriptionId,
};
