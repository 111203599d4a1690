//! Versioned export envelope and its JSON / MessagePack encodings.
//!
//! The branch map is flattened to `[name, branch]` pairs. Decoding checks
//! the version before anything else, then rebuilds and validates the tree.

use crate::branches::BranchManager;
use crate::checkpoints::StoreSnapshot;
use crate::error::{Result, StoreError};
use crate::types::{Branch, HistoryEntry, StoreMetadata};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current envelope format version.
pub const FORMAT_VERSION: &str = "1.0";

/// Portable form of the store state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportEnvelope {
    pub version: String,
    pub branches: Vec<(String, Branch)>,
    pub current_branch: String,
    pub metadata: StoreMetadata,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Next id to allocate; derived from the content when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<u64>,
}

impl ExportEnvelope {
    pub fn from_manager(manager: &BranchManager, history: &[HistoryEntry]) -> Self {
        let mut branches: Vec<(String, Branch)> = manager
            .branches()
            .iter()
            .map(|(name, branch)| (name.clone(), branch.clone()))
            .collect();
        branches.sort_by_key(|(_, b)| b.id);

        Self {
            version: FORMAT_VERSION.to_string(),
            branches,
            current_branch: manager.current_name().to_string(),
            metadata: manager.metadata().clone(),
            history: history.to_vec(),
            next_id: Some(manager.next_id()),
        }
    }

    pub fn check_version(&self) -> Result<()> {
        check_version(Some(self.version.as_str()))
    }

    /// Rebuild a validated manager and the audit history.
    pub fn into_parts(
        self,
        root: &str,
        max_branches: usize,
    ) -> Result<(BranchManager, Vec<HistoryEntry>)> {
        self.check_version()?;

        let mut branches = HashMap::with_capacity(self.branches.len());
        for (name, branch) in self.branches {
            if branches.insert(name.clone(), branch).is_some() {
                return Err(StoreError::InvalidFormat(format!(
                    "Duplicate branch name: {}",
                    name
                )));
            }
        }

        let snapshot = StoreSnapshot {
            branches,
            current_branch: self.current_branch,
            metadata: self.metadata,
        };
        let manager = BranchManager::from_snapshot(snapshot, root, max_branches, self.next_id)?;
        Ok((manager, self.history))
    }
}

fn check_version(version: Option<&str>) -> Result<()> {
    match version {
        Some(FORMAT_VERSION) => Ok(()),
        other => Err(StoreError::VersionMismatch {
            expected: FORMAT_VERSION.to_string(),
            got: other.unwrap_or("<missing>").to_string(),
        }),
    }
}

pub fn encode_json(envelope: &ExportEnvelope) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(envelope)?)
}

pub fn decode_json(bytes: &[u8]) -> Result<ExportEnvelope> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| StoreError::Deserialization(e.to_string()))?;
    check_version(value.get("version").and_then(|v| v.as_str()))?;

    serde_json::from_value(value).map_err(|e| StoreError::Deserialization(e.to_string()))
}

pub fn encode_msgpack(envelope: &ExportEnvelope) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(envelope)?)
}

pub fn decode_msgpack(bytes: &[u8]) -> Result<ExportEnvelope> {
    #[derive(Deserialize)]
    struct VersionProbe {
        #[serde(default)]
        version: Option<String>,
    }

    let probe: VersionProbe = rmp_serde::from_slice(bytes)?;
    check_version(probe.version.as_deref())?;

    Ok(rmp_serde::from_slice(bytes)?)
}
