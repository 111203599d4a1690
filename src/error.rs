//! Error types for the branch store.

use crate::types::MessageId;
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Branch already exists: {0}")]
    BranchExists(String),

    #[error("Branch limit reached (max {max})")]
    BranchLimit { max: usize },

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Branch is protected: {0}")]
    ProtectedBranch(String),

    #[error("Branch {name} has child branches: {children:?}")]
    BranchHasChildren { name: String, children: Vec<String> },

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: String, got: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
