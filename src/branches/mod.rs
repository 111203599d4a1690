//! Branch management for conversation histories.
//!
//! Branches form a tree rooted at the protected main branch. A new branch
//! copies a prefix of its parent's messages, then diverges. Branches can be
//! compared, merged back with one of several strategies, and deleted once
//! they have no children.

mod compare;
mod manager;
pub mod merge;

pub use compare::{compare_branches, divergence_point, BranchComparison, BranchTree};
pub use manager::{
    BranchManager, CreateBranchOptions, DeleteOutcome, EditOptions, EditOutcome, ForkOptions,
    MergeOutcome, MAIN_BRANCH,
};
pub use merge::{common_ancestor, merge_messages, MergeOptions};
