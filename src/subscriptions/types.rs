//! Subscription types for live store updates.

use crate::types::{Branch, BranchId, Message, MergeStrategy, Timestamp};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::all(),
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Only events touching these branches (None = any branch).
    pub branches: Option<Vec<String>>,

    /// Include branch events (create, switch, merge, delete).
    pub include_branch_events: bool,

    /// Include message events (add, edit).
    pub include_message_events: bool,

    /// Include store-wide events (checkpoints, imports).
    pub include_store_events: bool,
}

impl SubscriptionFilter {
    /// Subscribe to branch events.
    pub fn branches() -> Self {
        Self {
            include_branch_events: true,
            ..Default::default()
        }
    }

    /// Subscribe to message events.
    pub fn messages() -> Self {
        Self {
            include_message_events: true,
            ..Default::default()
        }
    }

    /// Subscribe to everything.
    pub fn all() -> Self {
        Self {
            branches: None,
            include_branch_events: true,
            include_message_events: true,
            include_store_events: true,
        }
    }

    /// Restrict to events touching the given branches.
    pub fn on_branches(mut self, names: Vec<String>) -> Self {
        self.branches = Some(names);
        self
    }

    pub(crate) fn matches(&self, event: &StoreEvent) -> bool {
        let category = match event {
            StoreEvent::BranchCreated { .. }
            | StoreEvent::BranchSwitched { .. }
            | StoreEvent::BranchMerged { .. }
            | StoreEvent::BranchDeleted { .. } => self.include_branch_events,
            StoreEvent::MessageAdded { .. } | StoreEvent::MessageEdited { .. } => {
                self.include_message_events
            }
            StoreEvent::CheckpointCreated { .. }
            | StoreEvent::CheckpointRestored { .. }
            | StoreEvent::Imported { .. } => self.include_store_events,
            StoreEvent::Dropped { .. } => true,
        };
        if !category {
            return false;
        }

        match &self.branches {
            None => true,
            Some(names) => {
                let touched = event.branch_names();
                // Store-wide events touch every branch.
                touched.is_empty() || touched.iter().any(|b| names.iter().any(|n| n == b))
            }
        }
    }
}

/// Events emitted by subscriptions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    // --- Branch Events ---
    /// A new branch was created.
    BranchCreated {
        branch: BranchSummary,
    },

    /// The current branch changed.
    BranchSwitched {
        from: String,
        to: String,
    },

    /// `source` was merged into `target`.
    BranchMerged {
        source: String,
        target: String,
        strategy: MergeStrategy,
        /// Target messages after the merge.
        messages: Vec<Message>,
    },

    /// A branch was deleted.
    BranchDeleted {
        name: String,
    },

    // --- Message Events ---
    MessageAdded {
        branch: String,
        message: Message,
    },

    MessageEdited {
        branch: String,
        message: Message,
    },

    // --- Store Events ---
    CheckpointCreated {
        name: String,
    },

    /// Live state was rolled back to a checkpoint.
    CheckpointRestored {
        name: String,
        current_branch: String,
    },

    /// Live state was replaced by an import.
    Imported {
        branch_count: usize,
        current_branch: String,
    },

    // --- Lifecycle Events ---
    /// Subscription was dropped.
    Dropped {
        reason: DropReason,
    },
}

impl StoreEvent {
    /// Branches this event concerns (empty for store-wide events).
    pub fn branch_names(&self) -> Vec<&str> {
        match self {
            StoreEvent::BranchCreated { branch } => vec![branch.name.as_str()],
            StoreEvent::BranchSwitched { from, to } => vec![from.as_str(), to.as_str()],
            StoreEvent::BranchMerged { source, target, .. } => {
                vec![source.as_str(), target.as_str()]
            }
            StoreEvent::BranchDeleted { name } => vec![name.as_str()],
            StoreEvent::MessageAdded { branch, .. } | StoreEvent::MessageEdited { branch, .. } => {
                vec![branch.as_str()]
            }
            StoreEvent::CheckpointCreated { .. }
            | StoreEvent::CheckpointRestored { .. }
            | StoreEvent::Imported { .. }
            | StoreEvent::Dropped { .. } => Vec::new(),
        }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Summary of a branch (for events, avoids sending every message).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSummary {
    pub id: BranchId,
    pub name: String,
    pub parent: Option<String>,
    pub message_count: usize,
    pub created_at: Timestamp,
}

impl BranchSummary {
    pub fn from_branch(branch: &Branch) -> Self {
        Self {
            id: branch.id,
            name: branch.name.clone(),
            parent: branch.parent.clone(),
            message_count: branch.messages.len(),
            created_at: branch.created_at,
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain every event currently buffered.
    pub fn drain(&self) -> Vec<StoreEvent> {
        self.receiver.try_iter().collect()
    }
}
