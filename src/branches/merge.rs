//! Merge strategies over message sequences.
//!
//! These are pure functions: they never touch branch metadata or stats.
//! `BranchManager::merge_branches` validates preconditions and applies the
//! result.

use crate::types::{Message, MergeStrategy};

/// Options for merging one branch into another.
#[derive(Clone, Debug, Default)]
pub struct MergeOptions {
    pub strategy: MergeStrategy,
    /// Allow merging into a protected target.
    pub force: bool,
    /// Delete the source branch after a successful merge.
    pub delete_source: bool,
    /// Cut point for `Replace`; defaults to the common ancestor.
    pub merge_point: Option<usize>,
    /// Recorded in the target's merge history; defaults to the store author.
    pub author: Option<String>,
}

impl MergeOptions {
    pub fn with_strategy(strategy: MergeStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }
}

/// Last index at which both sequences carry the same message ids.
///
/// Returns `None` when the very first messages differ (or either side is empty).
pub fn common_ancestor(a: &[Message], b: &[Message]) -> Option<usize> {
    let shared = a
        .iter()
        .zip(b.iter())
        .take_while(|(x, y)| x.id == y.id)
        .count();

    shared.checked_sub(1)
}

/// Combine `target` and `source` according to `strategy`.
pub fn merge_messages(
    strategy: MergeStrategy,
    target: &[Message],
    source: &[Message],
    merge_point: Option<usize>,
) -> Vec<Message> {
    match strategy {
        MergeStrategy::Append => {
            let mut merged = Vec::with_capacity(target.len() + source.len());
            merged.extend_from_slice(target);
            merged.extend_from_slice(source);
            merged
        }
        MergeStrategy::Interleave => interleave(target, source),
        MergeStrategy::Replace => {
            let point = merge_point
                .or_else(|| common_ancestor(target, source))
                .unwrap_or(0);

            let mut merged = Vec::new();
            merged.extend_from_slice(&target[..point.min(target.len())]);
            merged.extend_from_slice(&source[point.min(source.len())..]);
            merged
        }
        MergeStrategy::Smart => match common_ancestor(target, source) {
            None => interleave(target, source),
            Some(ancestor) => {
                let split = ancestor + 1;
                let mut merged = target[..split].to_vec();
                merged.extend(interleave(&target[split..], &source[split..]));
                merged
            }
        },
    }
}

/// Stable merge by timestamp; ties keep target before source.
fn interleave(target: &[Message], source: &[Message]) -> Vec<Message> {
    let mut merged = Vec::with_capacity(target.len() + source.len());
    merged.extend_from_slice(target);
    merged.extend_from_slice(source);
    merged.sort_by_key(|m| m.timestamp);
    merged
}
