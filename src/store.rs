//! Main BranchStore tying all components together.

use crate::branches::{
    BranchComparison, BranchManager, BranchTree, CreateBranchOptions, DeleteOutcome,
    EditOptions, EditOutcome, ForkOptions, MergeOptions, MergeOutcome, MAIN_BRANCH,
};
use crate::checkpoints::{CheckpointStore, CheckpointSummary};
use crate::error::{Result, StoreError};
use crate::persistence::codec::{decode_json, encode_json};
use crate::persistence::{Autosaver, ExportEnvelope, Persistence};
use crate::subscriptions::{
    BranchSummary, StoreEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
use crate::types::{
    Branch, HistoryAction, HistoryEntry, Message, MessageId, MessageInput, StoreStats,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Name of the protected root branch.
    pub root_branch: String,

    /// Maximum number of live branches, root included.
    pub max_branches: usize,

    /// Save after every mutation (requires a persistence backend).
    pub autosave: bool,

    /// Default buffer size for new subscriptions.
    pub event_buffer_size: usize,

    /// Author recorded in merge history when none is given.
    pub default_author: String,

    /// Audit history entries kept (oldest dropped first).
    pub max_history: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_branch: MAIN_BRANCH.to_string(),
            max_branches: 50,
            autosave: true,
            event_buffer_size: 1000,
            default_author: "user".to_string(),
            max_history: 1000,
        }
    }
}

/// Everything guarded by the store lock.
struct StoreState {
    branches: BranchManager,
    checkpoints: CheckpointStore,
    history: Vec<HistoryEntry>,
    max_history: usize,
}

impl StoreState {
    fn record(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
        if self.history.len() > self.max_history {
            let excess = self.history.len() - self.max_history;
            self.history.drain(..excess);
        }
    }

    fn record_delete(&mut self, outcome: &DeleteOutcome, events: &mut Vec<StoreEvent>) {
        if let Some(from) = &outcome.switched_from {
            let root = self.branches.root_name().to_string();
            self.record(
                HistoryEntry::new(HistoryAction::Switch, Some(root.as_str()))
                    .with_detail(format!("from {}", from)),
            );
            events.push(StoreEvent::BranchSwitched {
                from: from.clone(),
                to: root,
            });
        }
        self.record(HistoryEntry::new(HistoryAction::Delete, Some(outcome.name.as_str())));
        events.push(StoreEvent::BranchDeleted {
            name: outcome.name.clone(),
        });
    }
}

/// The conversation branch store.
///
/// Provides a unified interface for:
/// - Creating, forking, switching and deleting branches
/// - Appending and editing messages on the current branch
/// - Merging and comparing branches
/// - Checkpoints, export/import and autosave
///
/// Each call takes the store lock once, so every operation applies fully
/// or not at all. Events are broadcast and autosave is scheduled after the
/// lock is released.
pub struct BranchStore {
    /// Store configuration.
    config: StoreConfig,

    state: RwLock<StoreState>,

    subscriptions: SubscriptionManager,

    /// Present when the store has a persistence backend.
    persistence: Option<Autosaver>,
}

impl BranchStore {
    /// Create a store without persistence.
    pub fn in_memory(config: StoreConfig) -> Self {
        let state = Self::fresh_state(&config);
        Self {
            config,
            state: RwLock::new(state),
            subscriptions: SubscriptionManager::new(),
            persistence: None,
        }
    }

    /// Open a store backed by `backend`, loading its saved state if present.
    pub fn open(config: StoreConfig, backend: Arc<dyn Persistence>) -> Result<Self> {
        let state = match backend.load()? {
            Some(envelope) => {
                let (branches, history) =
                    envelope.into_parts(&config.root_branch, config.max_branches)?;
                info!(
                    branches = branches.branch_count(),
                    current = branches.current_name(),
                    "loaded persisted store"
                );
                StoreState {
                    branches,
                    checkpoints: CheckpointStore::new(),
                    history,
                    max_history: config.max_history,
                }
            }
            None => Self::fresh_state(&config),
        };

        Ok(Self {
            config,
            state: RwLock::new(state),
            subscriptions: SubscriptionManager::new(),
            persistence: Some(Autosaver::new(backend)),
        })
    }

    fn fresh_state(config: &StoreConfig) -> StoreState {
        StoreState {
            branches: BranchManager::new(&config.root_branch, config.max_branches),
            checkpoints: CheckpointStore::new(),
            history: Vec::new(),
            max_history: config.max_history,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // --- Branch Operations ---

    /// Create a branch, copying the parent's messages through `from_message_index`.
    pub fn create_branch(
        &self,
        name: &str,
        from_message_index: Option<usize>,
        options: CreateBranchOptions,
    ) -> Result<Branch> {
        self.mutate(|state, events| {
            let branch = state
                .branches
                .create_branch(name, from_message_index, options)?;

            state.record(
                HistoryEntry::new(HistoryAction::Create, Some(name))
                    .with_detail(format!("parent {}", branch.parent.as_deref().unwrap_or("-"))),
            );
            events.push(StoreEvent::BranchCreated {
                branch: BranchSummary::from_branch(&branch),
            });
            Ok(branch)
        })
    }

    /// Switch to a different branch.
    pub fn switch_branch(&self, name: &str) -> Result<Branch> {
        self.mutate(|state, events| {
            let previous = state.branches.switch_branch(name)?;

            state.record(
                HistoryEntry::new(HistoryAction::Switch, Some(name))
                    .with_detail(format!("from {}", previous)),
            );
            events.push(StoreEvent::BranchSwitched {
                from: previous,
                to: name.to_string(),
            });
            Ok(state.branches.current_branch().clone())
        })
    }

    /// Fork the current branch, switching to the fork unless told otherwise.
    pub fn fork(&self, name: &str, options: ForkOptions) -> Result<Branch> {
        self.mutate(|state, events| {
            let switch_to = options.switch_to;
            let previous = state.branches.current_name().to_string();
            let branch = state.branches.fork(name, options)?;

            state.record(
                HistoryEntry::new(HistoryAction::Create, Some(name))
                    .with_detail(format!("fork of {} ({} messages)", previous, branch.len())),
            );
            events.push(StoreEvent::BranchCreated {
                branch: BranchSummary::from_branch(&branch),
            });

            if switch_to {
                state.record(
                    HistoryEntry::new(HistoryAction::Switch, Some(name))
                        .with_detail(format!("from {}", previous)),
                );
                events.push(StoreEvent::BranchSwitched {
                    from: previous,
                    to: name.to_string(),
                });
            }
            Ok(branch)
        })
    }

    /// Delete a branch. Irreversible.
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        self.mutate(|state, events| {
            let outcome = state.branches.delete_branch(name)?;
            state.record_delete(&outcome, events);
            Ok(())
        })
    }

    /// Update a branch's description and/or tags.
    pub fn update_branch_metadata(
        &self,
        name: &str,
        description: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Result<Branch> {
        self.mutate(|state, _| {
            let branch = state.branches.update_metadata(name, description, tags)?;
            state.record(HistoryEntry::new(HistoryAction::UpdateMetadata, Some(name)));
            Ok(branch)
        })
    }

    /// Protect or unprotect a branch. The root always stays protected.
    pub fn set_branch_protected(&self, name: &str, protected: bool) -> Result<()> {
        self.mutate(|state, _| {
            state.branches.set_protected(name, protected)?;
            state.record(
                HistoryEntry::new(HistoryAction::UpdateMetadata, Some(name))
                    .with_detail(format!("protected={}", protected)),
            );
            Ok(())
        })
    }

    pub fn get_branch(&self, name: &str) -> Option<Branch> {
        self.state.read().branches.get_branch(name).cloned()
    }

    pub fn current_branch(&self) -> Branch {
        self.state.read().branches.current_branch().clone()
    }

    pub fn current_branch_name(&self) -> String {
        self.state.read().branches.current_name().to_string()
    }

    pub fn list_branches(&self) -> Vec<Branch> {
        self.state
            .read()
            .branches
            .list_branches()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn branch_count(&self) -> usize {
        self.state.read().branches.branch_count()
    }

    pub fn child_branches(&self, name: &str) -> Vec<Branch> {
        self.state
            .read()
            .branches
            .child_branches(name)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Branch and its ancestors, child first.
    pub fn ancestry(&self, name: &str) -> Result<Vec<Branch>> {
        let state = self.state.read();
        Ok(state
            .branches
            .ancestry(name)?
            .into_iter()
            .cloned()
            .collect())
    }

    // --- Message Operations ---

    /// Append a message to the current branch.
    pub fn add_message(&self, input: MessageInput) -> Message {
        let (message, persisted) = {
            let mut state = self.state.write();
            let message = state.branches.add_message(input);
            state.record(
                HistoryEntry::new(HistoryAction::AddMessage, Some(message.branch.as_str()))
                    .with_detail(message.id.to_string()),
            );
            (message, self.autosave_state(&state))
        };

        self.commit(
            vec![StoreEvent::MessageAdded {
                branch: message.branch.clone(),
                message: message.clone(),
            }],
            persisted,
        );
        message
    }

    /// Edit a message of the current branch (on a new branch by default).
    pub fn edit_message(
        &self,
        id: MessageId,
        new_content: impl Into<String>,
        options: EditOptions,
    ) -> Result<EditOutcome> {
        self.mutate(|state, events| {
            let outcome = state.branches.edit_message(id, new_content, options)?;

            if let Some(created) = &outcome.created {
                state.record(
                    HistoryEntry::new(HistoryAction::Create, Some(created.name.as_str()))
                        .with_detail(format!("edit of {} in {}", id, outcome.previous_branch)),
                );
                state.record(
                    HistoryEntry::new(HistoryAction::Switch, Some(created.name.as_str()))
                        .with_detail(format!("from {}", outcome.previous_branch)),
                );
                events.push(StoreEvent::BranchCreated {
                    branch: BranchSummary::from_branch(created),
                });
                events.push(StoreEvent::BranchSwitched {
                    from: outcome.previous_branch.clone(),
                    to: created.name.clone(),
                });
            }

            state.record(
                HistoryEntry::new(HistoryAction::EditMessage, Some(outcome.branch.as_str()))
                    .with_detail(id.to_string()),
            );
            events.push(StoreEvent::MessageEdited {
                branch: outcome.branch.clone(),
                message: outcome.message.clone(),
            });
            Ok(outcome)
        })
    }

    // --- Merge & Compare ---

    /// Merge `source` into `target`.
    pub fn merge_branches(
        &self,
        source: &str,
        target: &str,
        options: MergeOptions,
    ) -> Result<MergeOutcome> {
        self.mutate(|state, events| {
            let outcome =
                state
                    .branches
                    .merge_branches(source, target, options, &self.config.default_author)?;

            state.record(
                HistoryEntry::new(HistoryAction::Merge, Some(target))
                    .with_detail(format!("{} -> {} ({})", source, target, outcome.strategy)),
            );
            events.push(StoreEvent::BranchMerged {
                source: outcome.source.clone(),
                target: outcome.target.clone(),
                strategy: outcome.strategy,
                messages: outcome.messages.clone(),
            });

            if let Some(deleted) = &outcome.deleted {
                state.record_delete(deleted, events);
            }
            Ok(outcome)
        })
    }

    pub fn compare_branches(&self, a: &str, b: &str) -> Result<BranchComparison> {
        self.state.read().branches.compare_branches(a, b)
    }

    /// Branch hierarchy rooted at the root branch.
    pub fn visualize_branches(&self) -> Result<BranchTree> {
        self.state.read().branches.visualize()
    }

    // --- Checkpoints ---

    /// Snapshot the whole branch state under `name`, replacing any older one.
    pub fn create_checkpoint(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<CheckpointSummary> {
        if name.is_empty() {
            return Err(StoreError::InvalidOperation(
                "Checkpoint name must not be empty".into(),
            ));
        }

        self.mutate(|state, events| {
            let snapshot = state.branches.snapshot();
            let replaced = state
                .checkpoints
                .create(name, description.map(str::to_string), snapshot);
            if replaced.is_some() {
                debug!(checkpoint = name, "replaced existing checkpoint");
            }

            let summary = CheckpointSummary::from_checkpoint(state.checkpoints.get(name)?);
            state.record(
                HistoryEntry::new(HistoryAction::Checkpoint, None).with_detail(name),
            );
            events.push(StoreEvent::CheckpointCreated {
                name: name.to_string(),
            });

            info!(checkpoint = name, branches = summary.branch_count, "checkpoint created");
            Ok(summary)
        })
    }

    /// Roll the live state back to a checkpoint.
    pub fn restore_checkpoint(&self, name: &str) -> Result<()> {
        self.mutate(|state, events| {
            let snapshot = state.checkpoints.get(name)?.snapshot.clone();
            state.branches.restore(snapshot);

            let current = state.branches.current_name().to_string();
            state.record(
                HistoryEntry::new(HistoryAction::Restore, Some(current.as_str())).with_detail(name),
            );
            events.push(StoreEvent::CheckpointRestored {
                name: name.to_string(),
                current_branch: current,
            });

            info!(checkpoint = name, "checkpoint restored");
            Ok(())
        })
    }

    pub fn list_checkpoints(&self) -> Vec<CheckpointSummary> {
        self.state.read().checkpoints.list()
    }

    pub fn delete_checkpoint(&self, name: &str) -> Result<()> {
        self.state.write().checkpoints.delete(name)?;
        debug!(checkpoint = name, "checkpoint deleted");
        Ok(())
    }

    // --- Export / Import ---

    /// Current state as a versioned envelope.
    pub fn export_branches(&self) -> ExportEnvelope {
        let state = self.state.read();
        ExportEnvelope::from_manager(&state.branches, &state.history)
    }

    pub fn export_json(&self) -> Result<String> {
        let bytes = encode_json(&self.export_branches())?;
        String::from_utf8(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Replace the live state with `envelope`.
    ///
    /// Rejects any version other than the current one, and any envelope
    /// whose branches do not form a valid tree under the configured root.
    /// Checkpoints are cleared, since they describe the replaced state.
    pub fn import_branches(&self, envelope: ExportEnvelope) -> Result<()> {
        let (branches, history) =
            envelope.into_parts(&self.config.root_branch, self.config.max_branches)?;

        self.mutate(|state, events| {
            state.branches = branches;
            state.history = history;
            state.checkpoints = CheckpointStore::new();

            let count = state.branches.branch_count();
            let current = state.branches.current_name().to_string();
            state.record(
                HistoryEntry::new(HistoryAction::Import, Some(current.as_str()))
                    .with_detail(format!("{} branches", count)),
            );
            events.push(StoreEvent::Imported {
                branch_count: count,
                current_branch: current,
            });

            info!(branches = count, "branches imported");
            Ok(())
        })
    }

    pub fn import_json(&self, json: &str) -> Result<()> {
        self.import_branches(decode_json(json.as_bytes())?)
    }

    // --- Events ---

    /// Subscribe with the configured buffer size.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> SubscriptionHandle {
        self.subscriptions.subscribe(SubscriptionConfig {
            buffer_size: self.config.event_buffer_size,
            filter,
        })
    }

    pub fn subscribe_with(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.subscriptions.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    // --- Persistence ---

    /// Save the current state now, reporting any failure.
    ///
    /// A no-op without a persistence backend.
    pub fn flush(&self) -> Result<()> {
        let Some(saver) = &self.persistence else {
            return Ok(());
        };

        let (generation, envelope) = {
            let state = self.state.read();
            (
                saver.reserve_generation(),
                ExportEnvelope::from_manager(&state.branches, &state.history),
            )
        };
        saver.flush(generation, &envelope)
    }

    /// Block until queued autosaves have been attempted.
    pub fn wait_for_autosave(&self) {
        if let Some(saver) = &self.persistence {
            saver.wait_idle();
        }
    }

    /// Error from the most recent failed save, if it has not been superseded.
    pub fn last_save_error(&self) -> Option<String> {
        self.persistence.as_ref().and_then(Autosaver::last_error)
    }

    // --- Store Operations ---

    /// Audit history, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.read().history.clone()
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        let state = self.state.read();
        let branches = state.branches.list_branches();
        StoreStats {
            branch_count: branches.len(),
            message_count: branches.iter().map(|b| b.stats.message_count).sum(),
            token_count: branches.iter().map(|b| b.stats.token_count).sum(),
            checkpoint_count: state.checkpoints.len(),
            subscription_count: self.subscriptions.subscription_count(),
        }
    }

    /// Verify the branch tree invariants.
    pub fn check_invariants(&self) -> Result<()> {
        self.state.read().branches.check_invariants()
    }

    // --- Private Helpers ---

    /// Run `op` under the write lock, then broadcast and autosave on success.
    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut StoreState, &mut Vec<StoreEvent>) -> Result<T>,
    ) -> Result<T> {
        let mut events = Vec::new();
        let (value, persisted) = {
            let mut state = self.state.write();
            let value = op(&mut *state, &mut events)?;
            (value, self.autosave_state(&state))
        };

        self.commit(events, persisted);
        Ok(value)
    }

    /// Capture the state for autosave. Must run under the write lock so the
    /// reserved generation orders saves the same way as mutations.
    fn autosave_state(&self, state: &StoreState) -> Option<(u64, ExportEnvelope)> {
        let saver = self.persistence.as_ref().filter(|_| self.config.autosave)?;
        Some((
            saver.reserve_generation(),
            ExportEnvelope::from_manager(&state.branches, &state.history),
        ))
    }

    fn commit(&self, events: Vec<StoreEvent>, persisted: Option<(u64, ExportEnvelope)>) {
        self.subscriptions.broadcast_all(events);
        if let (Some(saver), Some((generation, envelope))) = (&self.persistence, persisted) {
            saver.schedule(generation, envelope);
        }
    }
}

impl Drop for BranchStore {
    fn drop(&mut self) {
        // Best-effort save on drop
        if self.config.autosave {
            let _ = self.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryBackend;
    use crate::types::MergeStrategy;

    fn test_store() -> BranchStore {
        BranchStore::in_memory(StoreConfig::default())
    }

    #[test]
    fn test_create_store() {
        let store = test_store();
        assert_eq!(store.branch_count(), 1);
        assert_eq!(store.current_branch_name(), MAIN_BRANCH);
        store.check_invariants().unwrap();
    }

    #[test]
    fn test_custom_root_name() {
        let store = BranchStore::in_memory(StoreConfig {
            root_branch: "trunk".into(),
            ..Default::default()
        });
        let root = store.get_branch("trunk").unwrap();
        assert!(root.is_root());
        assert!(root.is_protected());
    }

    #[test]
    fn test_branch_operations() {
        let store = test_store();
        store.add_message(MessageInput::user("hello"));

        let branch = store.fork("feature", ForkOptions::default()).unwrap();
        assert_eq!(branch.messages.len(), 1);
        assert_eq!(store.current_branch_name(), "feature");

        store.add_message(MessageInput::assistant("from feature"));
        assert_eq!(store.get_branch(MAIN_BRANCH).unwrap().messages.len(), 1);
        assert_eq!(store.current_branch().messages.len(), 2);

        let branches = store.list_branches();
        assert_eq!(branches.len(), 2);
        assert_eq!(store.child_branches(MAIN_BRANCH).len(), 1);
    }

    #[test]
    fn test_history_is_recorded_and_trimmed() {
        let store = BranchStore::in_memory(StoreConfig {
            max_history: 3,
            ..Default::default()
        });
        store.create_branch("a", None, CreateBranchOptions::default()).unwrap();
        store.switch_branch("a").unwrap();
        store.add_message(MessageInput::user("x"));
        store.switch_branch(MAIN_BRANCH).unwrap();

        let history = store.history();
        assert_eq!(history.len(), 3);
        let actions: Vec<HistoryAction> = history.iter().map(|h| h.action).collect();
        assert_eq!(
            actions,
            vec![HistoryAction::Switch, HistoryAction::AddMessage, HistoryAction::Switch]
        );
    }

    #[test]
    fn test_failed_operation_leaves_no_trace() {
        let store = test_store();
        let events = store.subscribe(SubscriptionFilter::all());

        assert!(store.switch_branch("missing").is_err());
        assert!(store.history().is_empty());
        assert!(events.drain().is_empty());
    }

    #[test]
    fn test_merge_events() {
        let store = test_store();
        store.fork("a", ForkOptions::default()).unwrap();
        store.add_message(MessageInput::user("x"));
        store.switch_branch(MAIN_BRANCH).unwrap();
        store.create_branch("b", None, CreateBranchOptions::default()).unwrap();

        let handle = store.subscribe(SubscriptionFilter::branches());
        store
            .merge_branches(
                "a",
                "b",
                MergeOptions {
                    strategy: MergeStrategy::Interleave,
                    delete_source: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let events = handle.drain();
        assert_eq!(events.len(), 2);
        match &events[0] {
            StoreEvent::BranchMerged {
                source,
                target,
                messages,
                ..
            } => {
                assert_eq!(source, "a");
                assert_eq!(target, "b");
                assert_eq!(messages.len(), 1);
            }
            other => panic!("Expected BranchMerged, got {:?}", other),
        }
        assert!(matches!(&events[1], StoreEvent::BranchDeleted { name } if name == "a"));
    }

    #[test]
    fn test_checkpoint_requires_name() {
        let store = test_store();
        assert!(matches!(
            store.create_checkpoint("", None),
            Err(StoreError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_autosave_disabled() {
        let backend = Arc::new(MemoryBackend::new());
        let store = BranchStore::open(
            StoreConfig {
                autosave: false,
                ..Default::default()
            },
            backend.clone(),
        )
        .unwrap();

        store.add_message(MessageInput::user("x"));
        store.wait_for_autosave();
        assert_eq!(backend.save_count(), 0);

        store.flush().unwrap();
        assert_eq!(backend.save_count(), 1);
    }

    #[test]
    fn test_stats() {
        let store = test_store();
        store.add_message(MessageInput::user("abcd"));
        store.fork("b", ForkOptions::default()).unwrap();
        store.create_checkpoint("c1", None).unwrap();

        let stats = store.stats();
        assert_eq!(stats.branch_count, 2);
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.token_count, 2);
        assert_eq!(stats.checkpoint_count, 1);
    }
}
