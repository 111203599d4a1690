//! Branch comparison and tree rendering.

use crate::types::{Branch, Message};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Result of comparing two branches.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchComparison {
    pub branch_a: String,
    pub branch_b: String,
    /// First index where id or content differs.
    pub divergence_point: usize,
    pub unique_to_a: Vec<Message>,
    pub unique_to_b: Vec<Message>,
    /// Shared prefix ratio: `divergence_point / max(len_a, len_b)`.
    ///
    /// This is an approximation, not an edit distance: differences after
    /// the divergence point and tail-only additions are not weighed.
    pub similarity: f64,
}

/// First index at which the two sequences differ by id or content.
pub fn divergence_point(a: &[Message], b: &[Message]) -> usize {
    a.iter()
        .zip(b.iter())
        .position(|(x, y)| x.id != y.id || x.content != y.content)
        .unwrap_or_else(|| a.len().min(b.len()))
}

pub fn compare_branches(a: &Branch, b: &Branch) -> BranchComparison {
    let point = divergence_point(&a.messages, &b.messages);
    let total = a.messages.len().max(b.messages.len());

    // Two empty branches are identical.
    let similarity = if total == 0 {
        1.0
    } else {
        point as f64 / total as f64
    };

    BranchComparison {
        branch_a: a.name.clone(),
        branch_b: b.name.clone(),
        divergence_point: point,
        unique_to_a: a.messages[point..].to_vec(),
        unique_to_b: b.messages[point..].to_vec(),
        similarity,
    }
}

/// Rooted view of the branch hierarchy.
#[derive(Clone, Debug, Serialize)]
pub struct BranchTree {
    pub name: String,
    pub branch: Branch,
    pub children: Vec<BranchTree>,
}

impl BranchTree {
    /// Build the tree rooted at `root` by following parent pointers.
    ///
    /// Returns `None` if `root` is not in `branches`. Children are ordered
    /// by creation time, then name.
    pub fn build(branches: &HashMap<String, Branch>, root: &str) -> Option<Self> {
        let mut children_of: HashMap<&str, Vec<&Branch>> = HashMap::new();
        for branch in branches.values() {
            if let Some(parent) = branch.parent.as_deref() {
                children_of.entry(parent).or_default().push(branch);
            }
        }
        for children in children_of.values_mut() {
            children.sort_by(|x, y| {
                x.created_at
                    .cmp(&y.created_at)
                    .then_with(|| x.name.cmp(&y.name))
            });
        }

        let root = branches.get(root)?;
        Some(Self::build_node(root, &children_of))
    }

    fn build_node(branch: &Branch, children_of: &HashMap<&str, Vec<&Branch>>) -> Self {
        let children = children_of
            .get(branch.name.as_str())
            .map(|kids| {
                kids.iter()
                    .map(|kid| Self::build_node(kid, children_of))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: branch.name.clone(),
            branch: branch.clone(),
            children,
        }
    }

    /// Number of branches in this subtree, including the root.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(BranchTree::size).sum::<usize>()
    }

    pub fn find(&self, name: &str) -> Option<&BranchTree> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, prefix: &str, last: bool, root: bool) -> fmt::Result {
        if root {
            writeln!(f, "{} ({} messages)", self.name, self.branch.messages.len())?;
        } else {
            let connector = if last { "└── " } else { "├── " };
            writeln!(
                f,
                "{}{}{} ({} messages)",
                prefix,
                connector,
                self.name,
                self.branch.messages.len()
            )?;
        }

        let child_prefix = if root {
            String::new()
        } else if last {
            format!("{}    ", prefix)
        } else {
            format!("{}│   ", prefix)
        };

        for (i, child) in self.children.iter().enumerate() {
            child.render(f, &child_prefix, i + 1 == self.children.len(), false)?;
        }
        Ok(())
    }
}

impl fmt::Display for BranchTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, "", true, true)
    }
}
