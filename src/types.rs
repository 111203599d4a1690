//! Core types for the branch store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a branch.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchId(pub u64);

impl fmt::Debug for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BranchId({})", self.0)
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a message, shared by every copy of it across branches.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Timestamp(micros)
    }

    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis * 1000)
    }

    pub fn as_millis(self) -> i64 {
        self.0 / 1000
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// A message stored inside a branch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: Timestamp,

    /// Branch the message was authored on.
    pub branch: String,

    /// Position in the authoring branch at append time.
    pub index: usize,

    #[serde(default)]
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_content: Option<String>,
}

/// Input for appending a message (before id/index assigned).
#[derive(Clone, Debug)]
pub struct MessageInput {
    pub role: Role,
    pub content: String,
    /// Explicit timestamp; defaults to the time of the append.
    pub timestamp: Option<Timestamp>,
}

impl MessageInput {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Pin the message timestamp instead of stamping it at append time.
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// How a merge combines the source messages into the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Concatenate source after target.
    #[default]
    Append,
    /// Stable sort of target and source by timestamp.
    Interleave,
    /// Target prefix up to the merge point, then source from there.
    Replace,
    /// Shared prefix once, then interleave the diverged tails.
    Smart,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MergeStrategy::Append => "append",
            MergeStrategy::Interleave => "interleave",
            MergeStrategy::Replace => "replace",
            MergeStrategy::Smart => "smart",
        };
        f.write_str(s)
    }
}

/// One merge applied to a branch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRecord {
    pub from: String,
    pub timestamp: Timestamp,
    pub strategy: MergeStrategy,
    pub author: String,
}

/// Descriptive and policy metadata for a branch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchMetadata {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Protected branches cannot be deleted or merged into without `force`.
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub experimental: bool,
    #[serde(default)]
    pub merge_history: Vec<MergeRecord>,
}

/// Derived counters, kept consistent with `Branch::messages`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchStats {
    pub message_count: usize,
    pub token_count: usize,
    pub last_activity: Timestamp,
}

/// A named, ordered sequence of messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    /// `None` only for the root branch.
    pub parent: Option<String>,
    pub messages: Vec<Message>,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
    pub metadata: BranchMetadata,
    pub stats: BranchStats,
}

impl Branch {
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_protected(&self) -> bool {
        self.metadata.protected
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn find_message(&self, id: MessageId) -> Option<(usize, &Message)> {
        self.messages.iter().enumerate().find(|(_, m)| m.id == id)
    }

    /// Record a mutation of `messages` at `now`.
    pub(crate) fn touch(&mut self, now: Timestamp) {
        self.modified_at = now;
        self.stats.message_count = self.messages.len();
        self.stats.token_count = self
            .messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum();
        self.stats.last_activity = now;
    }
}

/// Kinds of audit history entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Create,
    Switch,
    Delete,
    Merge,
    AddMessage,
    EditMessage,
    UpdateMetadata,
    Checkpoint,
    Restore,
    Import,
}

/// Audit trail entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub branch: Option<String>,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HistoryEntry {
    pub fn new(action: HistoryAction, branch: Option<&str>) -> Self {
        Self {
            action,
            branch: branch.map(str::to_string),
            timestamp: Timestamp::now(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Store-wide metadata, captured by checkpoints and exports.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreMetadata {
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
    pub branches_created: u64,
    pub merges_performed: u64,
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub branch_count: usize,
    pub message_count: usize,
    pub token_count: usize,
    pub checkpoint_count: usize,
    pub subscription_count: usize,
}

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(content: &str) -> usize {
    content.chars().count().div_ceil(4)
}
