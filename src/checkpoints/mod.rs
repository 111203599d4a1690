//! Named full-state snapshots.
//!
//! A checkpoint captures every branch, the current-branch pointer and the
//! store metadata by value. Restoring one is a full rollback, not a merge.

use crate::error::{Result, StoreError};
use crate::types::{Branch, StoreMetadata, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Owned copy of the branch state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub branches: HashMap<String, Branch>,
    pub current_branch: String,
    pub metadata: StoreMetadata,
}

/// A named snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub name: String,
    pub description: Option<String>,
    pub created_at: Timestamp,
    pub snapshot: StoreSnapshot,
}

/// Summary of a checkpoint (for listings, avoids cloning the snapshot).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSummary {
    pub name: String,
    pub description: Option<String>,
    pub created_at: Timestamp,
    pub branch_count: usize,
    pub current_branch: String,
}

impl CheckpointSummary {
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            name: checkpoint.name.clone(),
            description: checkpoint.description.clone(),
            created_at: checkpoint.created_at,
            branch_count: checkpoint.snapshot.branches.len(),
            current_branch: checkpoint.snapshot.current_branch.clone(),
        }
    }
}

/// Checkpoints by name. Not subject to the branch limit.
#[derive(Clone, Debug, Default)]
pub struct CheckpointStore {
    checkpoints: HashMap<String, Checkpoint>,
    /// Insertion counter, so listings are stable even within one clock tick.
    order: HashMap<String, u64>,
    next_order: u64,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a checkpoint, replacing any existing one with the same name.
    ///
    /// Returns the replaced checkpoint, if any.
    pub fn create(
        &mut self,
        name: &str,
        description: Option<String>,
        snapshot: StoreSnapshot,
    ) -> Option<Checkpoint> {
        let checkpoint = Checkpoint {
            name: name.to_string(),
            description,
            created_at: Timestamp::now(),
            snapshot,
        };

        self.order.insert(name.to_string(), self.next_order);
        self.next_order += 1;
        self.checkpoints.insert(name.to_string(), checkpoint)
    }

    pub fn get(&self, name: &str) -> Result<&Checkpoint> {
        self.checkpoints
            .get(name)
            .ok_or_else(|| StoreError::CheckpointNotFound(name.to_string()))
    }

    pub fn delete(&mut self, name: &str) -> Result<Checkpoint> {
        self.order.remove(name);
        self.checkpoints
            .remove(name)
            .ok_or_else(|| StoreError::CheckpointNotFound(name.to_string()))
    }

    /// Checkpoints in creation order.
    pub fn list(&self) -> Vec<CheckpointSummary> {
        let mut list: Vec<&Checkpoint> = self.checkpoints.values().collect();
        list.sort_by_key(|c| self.order.get(&c.name).copied().unwrap_or(u64::MAX));
        list.into_iter().map(CheckpointSummary::from_checkpoint).collect()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(current: &str) -> StoreSnapshot {
        StoreSnapshot {
            branches: HashMap::new(),
            current_branch: current.to_string(),
            metadata: StoreMetadata::default(),
        }
    }

    #[test]
    fn test_create_and_get() {
        let mut store = CheckpointStore::new();
        assert!(store
            .create("c1", Some("first".into()), snapshot("main"))
            .is_none());

        let cp = store.get("c1").unwrap();
        assert_eq!(cp.description.as_deref(), Some("first"));
        assert_eq!(cp.snapshot.current_branch, "main");
    }

    #[test]
    fn test_create_replaces_existing() {
        let mut store = CheckpointStore::new();
        store.create("c1", None, snapshot("main"));
        let replaced = store.create("c1", None, snapshot("alt")).unwrap();

        assert_eq!(replaced.snapshot.current_branch, "main");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("c1").unwrap().snapshot.current_branch, "alt");
    }

    #[test]
    fn test_missing_checkpoint() {
        let mut store = CheckpointStore::new();
        assert!(matches!(
            store.get("nope"),
            Err(StoreError::CheckpointNotFound(_))
        ));
        assert!(matches!(
            store.delete("nope"),
            Err(StoreError::CheckpointNotFound(_))
        ));
    }

    #[test]
    fn test_list_in_creation_order() {
        let mut store = CheckpointStore::new();
        store.create("b", None, snapshot("main"));
        store.create("a", None, snapshot("main"));
        store.create("c", None, snapshot("main"));
        store.delete("a").unwrap();

        let names: Vec<String> = store.list().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["b".to_string(), "c".to_string()]);
    }
}
