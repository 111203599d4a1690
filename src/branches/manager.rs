//! Branch manager implementation.

use super::compare::{compare_branches, BranchComparison, BranchTree};
use super::merge::{merge_messages, MergeOptions};
use crate::checkpoints::StoreSnapshot;
use crate::error::{Result, StoreError};
use crate::types::{
    Branch, BranchId, BranchMetadata, BranchStats, Message, MessageId, MessageInput,
    MergeRecord, MergeStrategy, StoreMetadata, Timestamp,
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Name of the main branch.
pub const MAIN_BRANCH: &str = "main";

/// Options for creating a branch.
#[derive(Clone, Debug, Default)]
pub struct CreateBranchOptions {
    /// Parent branch (None = current branch).
    pub parent: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub experimental: bool,
    pub protected: bool,
}

/// Options for forking the current branch.
#[derive(Clone, Debug)]
pub struct ForkOptions {
    /// Last message index to copy (None = the current last message).
    pub from_message: Option<usize>,
    /// Switch to the new branch after creating it.
    pub switch_to: bool,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub experimental: bool,
}

impl Default for ForkOptions {
    fn default() -> Self {
        Self {
            from_message: None,
            switch_to: true,
            description: None,
            tags: Vec::new(),
            experimental: false,
        }
    }
}

impl ForkOptions {
    pub fn from_message(index: usize) -> Self {
        Self {
            from_message: Some(index),
            ..Default::default()
        }
    }
}

/// Options for editing a message.
#[derive(Clone, Debug)]
pub struct EditOptions {
    /// Fork an edit branch instead of mutating in place.
    pub create_branch: bool,
    /// Name for the edit branch (None = `edit-<millis>`).
    pub branch_name: Option<String>,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self {
            create_branch: true,
            branch_name: None,
        }
    }
}

impl EditOptions {
    pub fn in_place() -> Self {
        Self {
            create_branch: false,
            branch_name: None,
        }
    }
}

/// Result of an edit.
#[derive(Clone, Debug)]
pub struct EditOutcome {
    /// Branch holding the edited message.
    pub branch: String,
    /// Set when a new branch was forked for the edit.
    pub created: Option<Branch>,
    pub previous_branch: String,
    pub message: Message,
}

/// Result of a merge.
#[derive(Clone, Debug)]
pub struct MergeOutcome {
    pub source: String,
    pub target: String,
    pub strategy: MergeStrategy,
    pub messages: Vec<Message>,
    /// Set when `delete_source` removed the source branch.
    pub deleted: Option<DeleteOutcome>,
}

/// Result of a deletion.
#[derive(Clone, Debug)]
pub struct DeleteOutcome {
    pub name: String,
    /// Previous current branch, when the deletion forced a switch to the root.
    pub switched_from: Option<String>,
}

/// Owns the branch map and the current-branch pointer.
///
/// All methods validate before mutating, so a failed call leaves the
/// manager unchanged.
#[derive(Clone, Debug)]
pub struct BranchManager {
    /// All branches by name.
    branches: HashMap<String, Branch>,

    /// Current active branch.
    current: String,

    /// Name of the root branch.
    root: String,

    max_branches: usize,

    /// Next id for branches and messages.
    next_id: u64,

    metadata: StoreMetadata,
}

impl BranchManager {
    /// Create a new branch manager with a protected root branch.
    pub fn new(root: &str, max_branches: usize) -> Self {
        let now = Timestamp::now();
        let root_branch = Branch {
            id: BranchId(1),
            name: root.to_string(),
            parent: None,
            messages: Vec::new(),
            created_at: now,
            modified_at: now,
            metadata: BranchMetadata {
                description: Some("Root conversation".to_string()),
                protected: true,
                ..Default::default()
            },
            stats: BranchStats {
                last_activity: now,
                ..Default::default()
            },
        };

        let mut branches = HashMap::new();
        branches.insert(root.to_string(), root_branch);

        Self {
            branches,
            current: root.to_string(),
            root: root.to_string(),
            max_branches: max_branches.max(1),
            next_id: 2,
            metadata: StoreMetadata {
                created_at: now,
                modified_at: now,
                branches_created: 1,
                merges_performed: 0,
            },
        }
    }

    /// Rebuild a manager from a snapshot, validating every structural invariant.
    pub fn from_snapshot(
        snapshot: StoreSnapshot,
        root: &str,
        max_branches: usize,
        next_id: Option<u64>,
    ) -> Result<Self> {
        let derived_next = max_id(&snapshot.branches) + 1;
        let manager = Self {
            branches: snapshot.branches,
            current: snapshot.current_branch,
            root: root.to_string(),
            max_branches: max_branches.max(1),
            next_id: next_id.unwrap_or(derived_next).max(derived_next),
            metadata: snapshot.metadata,
        };
        manager.check_invariants()?;
        Ok(manager)
    }

    // --- Accessors ---

    pub fn root_name(&self) -> &str {
        &self.root
    }

    pub fn max_branches(&self) -> usize {
        self.max_branches
    }

    pub fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn current_name(&self) -> &str {
        &self.current
    }

    /// Get the current branch.
    pub fn current_branch(&self) -> &Branch {
        self.branches
            .get(&self.current)
            .expect("Current branch should always exist")
    }

    /// Get a branch by name.
    pub fn get_branch(&self, name: &str) -> Option<&Branch> {
        self.branches.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.branches.contains_key(name)
    }

    /// All branches, ordered by creation time then id.
    pub fn list_branches(&self) -> Vec<&Branch> {
        let mut list: Vec<&Branch> = self.branches.values().collect();
        list.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        list
    }

    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub(crate) fn branches(&self) -> &HashMap<String, Branch> {
        &self.branches
    }

    /// Branches whose parent is `name`.
    pub fn child_branches(&self, name: &str) -> Vec<&Branch> {
        let mut children: Vec<&Branch> = self
            .branches
            .values()
            .filter(|b| b.parent.as_deref() == Some(name))
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        children
    }

    /// Get branch ancestry (from child to root).
    pub fn ancestry(&self, name: &str) -> Result<Vec<&Branch>> {
        let mut ancestry = Vec::new();
        let mut current = Some(self.require(name)?);

        while let Some(branch) = current {
            ancestry.push(branch);
            if ancestry.len() > self.branches.len() {
                return Err(StoreError::InvalidFormat(format!(
                    "Parent cycle detected at {}",
                    name
                )));
            }
            current = branch
                .parent
                .as_deref()
                .and_then(|parent| self.branches.get(parent));
        }

        Ok(ancestry)
    }

    // --- Branch Operations ---

    /// Create a new branch.
    ///
    /// When `from_message_index` is given the parent's messages are copied
    /// up to and including that index.
    pub fn create_branch(
        &mut self,
        name: &str,
        from_message_index: Option<usize>,
        options: CreateBranchOptions,
    ) -> Result<Branch> {
        if self.branches.contains_key(name) {
            return Err(StoreError::BranchExists(name.to_string()));
        }
        if self.branches.len() >= self.max_branches {
            return Err(StoreError::BranchLimit {
                max: self.max_branches,
            });
        }

        let parent_name = options.parent.unwrap_or_else(|| self.current.clone());
        let parent = self.require(&parent_name)?;

        let messages = match from_message_index {
            Some(index) => {
                let end = (index + 1).min(parent.messages.len());
                parent.messages[..end].to_vec()
            }
            None => Vec::new(),
        };

        let now = Timestamp::now();
        let id = BranchId(self.alloc_id());
        let mut branch = Branch {
            id,
            name: name.to_string(),
            parent: Some(parent_name.clone()),
            messages,
            created_at: now,
            modified_at: now,
            metadata: BranchMetadata {
                description: options.description,
                tags: options.tags,
                protected: options.protected,
                experimental: options.experimental,
                merge_history: Vec::new(),
            },
            stats: BranchStats::default(),
        };
        branch.touch(now);

        self.branches.insert(name.to_string(), branch.clone());
        self.metadata.branches_created += 1;
        self.metadata.modified_at = now;

        info!(branch = name, parent = %parent_name, messages = branch.messages.len(), "branch created");
        Ok(branch)
    }

    /// Switch to a different branch, returning the previous current branch.
    pub fn switch_branch(&mut self, name: &str) -> Result<String> {
        let now = Timestamp::now();
        let branch = self
            .branches
            .get_mut(name)
            .ok_or_else(|| StoreError::BranchNotFound(name.to_string()))?;
        branch.stats.last_activity = now;

        let previous = std::mem::replace(&mut self.current, name.to_string());
        debug!(from = %previous, to = name, "switched branch");
        Ok(previous)
    }

    /// Create a branch from the current one and optionally switch to it.
    pub fn fork(&mut self, name: &str, options: ForkOptions) -> Result<Branch> {
        let fork_point = options
            .from_message
            .or_else(|| self.current_branch().messages.len().checked_sub(1));

        let branch = self.create_branch(
            name,
            fork_point,
            CreateBranchOptions {
                parent: Some(self.current.clone()),
                description: options.description,
                tags: options.tags,
                experimental: options.experimental,
                protected: false,
            },
        )?;

        if options.switch_to {
            self.switch_branch(name)?;
        }
        Ok(branch)
    }

    /// Check that a branch can be deleted.
    pub fn can_delete(&self, name: &str) -> Result<()> {
        let branch = self.require(name)?;
        if branch.is_protected() || branch.is_root() {
            return Err(StoreError::ProtectedBranch(name.to_string()));
        }

        let children: Vec<String> = self
            .child_branches(name)
            .into_iter()
            .map(|b| b.name.clone())
            .collect();
        if !children.is_empty() {
            return Err(StoreError::BranchHasChildren {
                name: name.to_string(),
                children,
            });
        }
        Ok(())
    }

    /// Delete a branch. Deleting the current branch switches to the root first.
    pub fn delete_branch(&mut self, name: &str) -> Result<DeleteOutcome> {
        self.can_delete(name)?;

        let switched_from = if self.current == name {
            let root = self.root.clone();
            Some(self.switch_branch(&root)?)
        } else {
            None
        };

        self.branches.remove(name);
        self.metadata.modified_at = Timestamp::now();

        info!(branch = name, "branch deleted");
        Ok(DeleteOutcome {
            name: name.to_string(),
            switched_from,
        })
    }

    /// Update description and/or tags of a branch.
    pub fn update_metadata(
        &mut self,
        name: &str,
        description: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Result<Branch> {
        let branch = self
            .branches
            .get_mut(name)
            .ok_or_else(|| StoreError::BranchNotFound(name.to_string()))?;

        if description.is_some() {
            branch.metadata.description = description;
        }
        if let Some(tags) = tags {
            branch.metadata.tags = tags;
        }
        Ok(branch.clone())
    }

    /// Toggle protection on a non-root branch.
    pub fn set_protected(&mut self, name: &str, protected: bool) -> Result<()> {
        if name == self.root && !protected {
            return Err(StoreError::ProtectedBranch(name.to_string()));
        }
        let branch = self
            .branches
            .get_mut(name)
            .ok_or_else(|| StoreError::BranchNotFound(name.to_string()))?;
        branch.metadata.protected = protected;
        Ok(())
    }

    // --- Message Operations ---

    /// Append a message to the current branch.
    pub fn add_message(&mut self, input: MessageInput) -> Message {
        let now = Timestamp::now();
        let id = MessageId(self.alloc_id());
        let current = self.current.clone();
        let branch = self
            .branches
            .get_mut(&current)
            .expect("Current branch should always exist");

        let message = Message {
            id,
            role: input.role,
            content: input.content,
            timestamp: input.timestamp.unwrap_or(now),
            branch: current,
            index: branch.messages.len(),
            edited: false,
            edited_at: None,
            original_content: None,
        };

        branch.messages.push(message.clone());
        branch.touch(now);
        self.metadata.modified_at = now;

        message
    }

    /// Edit a message of the current branch.
    ///
    /// By default the edit happens on a freshly forked branch and the
    /// original branch is left untouched.
    pub fn edit_message(
        &mut self,
        id: MessageId,
        new_content: impl Into<String>,
        options: EditOptions,
    ) -> Result<EditOutcome> {
        let new_content = new_content.into();
        let previous_branch = self.current.clone();
        let (index, _) = self
            .current_branch()
            .find_message(id)
            .ok_or(StoreError::MessageNotFound(id))?;

        let created = if options.create_branch {
            let name = match options.branch_name {
                Some(name) => name,
                None => self.edit_branch_name(),
            };
            Some(self.fork(&name, ForkOptions::from_message(index))?)
        } else {
            None
        };

        let now = Timestamp::now();
        let branch_name = self.current.clone();
        let branch = self
            .branches
            .get_mut(&branch_name)
            .expect("Current branch should always exist");

        let message = &mut branch.messages[index];
        if message.original_content.is_none() {
            message.original_content = Some(message.content.clone());
        }
        message.content = new_content;
        message.edited = true;
        message.edited_at = Some(now);
        let message = message.clone();

        branch.touch(now);
        self.metadata.modified_at = now;

        debug!(branch = %branch_name, message = %id, "message edited");
        Ok(EditOutcome {
            branch: branch_name,
            created,
            previous_branch,
            message,
        })
    }

    // --- Merge & Compare ---

    /// Merge `source` into `target`.
    pub fn merge_branches(
        &mut self,
        source: &str,
        target: &str,
        options: MergeOptions,
        default_author: &str,
    ) -> Result<MergeOutcome> {
        if source == target {
            return Err(StoreError::InvalidOperation(format!(
                "Cannot merge branch {} into itself",
                source
            )));
        }

        let source_branch = self.require(source)?;
        let target_branch = self.require(target)?;

        if target_branch.is_protected() && !options.force {
            return Err(StoreError::ProtectedBranch(target.to_string()));
        }
        if options.delete_source {
            self.can_delete(source)?;
        }

        let merged = merge_messages(
            options.strategy,
            &target_branch.messages,
            &source_branch.messages,
            options.merge_point,
        );

        let now = Timestamp::now();
        let author = options
            .author
            .unwrap_or_else(|| default_author.to_string());
        let target_branch = self
            .branches
            .get_mut(target)
            .ok_or_else(|| StoreError::BranchNotFound(target.to_string()))?;

        target_branch.messages = merged.clone();
        target_branch.touch(now);
        target_branch.metadata.merge_history.push(MergeRecord {
            from: source.to_string(),
            timestamp: now,
            strategy: options.strategy,
            author,
        });
        self.metadata.merges_performed += 1;
        self.metadata.modified_at = now;

        info!(
            source,
            target,
            strategy = %options.strategy,
            messages = merged.len(),
            "branches merged"
        );

        let deleted = if options.delete_source {
            Some(self.delete_branch(source)?)
        } else {
            None
        };

        Ok(MergeOutcome {
            source: source.to_string(),
            target: target.to_string(),
            strategy: options.strategy,
            messages: merged,
            deleted,
        })
    }

    pub fn compare_branches(&self, a: &str, b: &str) -> Result<BranchComparison> {
        let a = self.require(a)?;
        let b = self.require(b)?;
        Ok(compare_branches(a, b))
    }

    /// Tree of all branches rooted at the root branch.
    pub fn visualize(&self) -> Result<BranchTree> {
        BranchTree::build(&self.branches, &self.root)
            .ok_or_else(|| StoreError::BranchNotFound(self.root.clone()))
    }

    // --- Snapshots ---

    /// Copy of the branch map, current pointer and metadata.
    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            branches: self.branches.clone(),
            current_branch: self.current.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Replace live state with `snapshot`. Ids are never reused afterwards.
    pub fn restore(&mut self, snapshot: StoreSnapshot) {
        let derived_next = max_id(&snapshot.branches) + 1;
        self.branches = snapshot.branches;
        self.current = snapshot.current_branch;
        self.metadata = snapshot.metadata;
        self.next_id = self.next_id.max(derived_next);
    }

    /// Verify the structural invariants of the branch tree.
    pub fn check_invariants(&self) -> Result<()> {
        let roots: Vec<&Branch> = self.branches.values().filter(|b| b.is_root()).collect();
        match roots.as_slice() {
            [root] if root.name == self.root => {
                if !root.is_protected() {
                    return Err(StoreError::InvalidFormat(format!(
                        "Root branch {} is not protected",
                        root.name
                    )));
                }
            }
            _ => {
                return Err(StoreError::InvalidFormat(format!(
                    "Expected exactly one root branch named {}, found {:?}",
                    self.root,
                    roots.iter().map(|b| &b.name).collect::<Vec<_>>()
                )));
            }
        }

        for (key, branch) in &self.branches {
            if key != &branch.name {
                return Err(StoreError::InvalidFormat(format!(
                    "Branch key {} does not match name {}",
                    key, branch.name
                )));
            }
            if let Some(parent) = &branch.parent {
                if !self.branches.contains_key(parent) {
                    return Err(StoreError::InvalidFormat(format!(
                        "Branch {} has missing parent {}",
                        branch.name, parent
                    )));
                }
            }
            if branch.stats.message_count != branch.messages.len() {
                return Err(StoreError::InvalidFormat(format!(
                    "Branch {} stats out of sync",
                    branch.name
                )));
            }
            let tail = self.ancestry(&branch.name)?;
            if tail.last().map(|b| b.name.as_str()) != Some(self.root.as_str()) {
                return Err(StoreError::InvalidFormat(format!(
                    "Branch {} is not connected to the root",
                    branch.name
                )));
            }
        }

        if !self.branches.contains_key(&self.current) {
            return Err(StoreError::InvalidFormat(format!(
                "Current branch {} does not exist",
                self.current
            )));
        }
        if self.branches.len() > self.max_branches {
            return Err(StoreError::BranchLimit {
                max: self.max_branches,
            });
        }
        Ok(())
    }

    // --- Private Helpers ---

    fn require(&self, name: &str) -> Result<&Branch> {
        self.branches
            .get(name)
            .ok_or_else(|| StoreError::BranchNotFound(name.to_string()))
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn edit_branch_name(&self) -> String {
        let base = format!("edit-{}", Timestamp::now().as_millis());
        if !self.branches.contains_key(&base) {
            return base;
        }
        (2..)
            .map(|n| format!("{}-{}", base, n))
            .find(|name| !self.branches.contains_key(name))
            .unwrap_or(base)
    }
}

/// Highest branch or message id in use.
fn max_id(branches: &HashMap<String, Branch>) -> u64 {
    branches
        .values()
        .flat_map(|b| std::iter::once(b.id.0).chain(b.messages.iter().map(|m| m.id.0)))
        .max()
        .unwrap_or(0)
}
