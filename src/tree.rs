//! Postorder-indexed view of a phylogeny.
//!
//! # Overview
//! A [`TreeIndex`] is built once from a parsed tree and then shared, read-only,
//! across every sample propagation and pairwise comparison. It replaces the
//! pointer-chasing tree walk with three flat arrays (parent link, branch
//! length, leaf flag) numbered in postorder.
//!
//! # Why postorder?
//! Postorder numbering guarantees that every node's index is larger than all
//! of its descendants' indices. Subtree sums can therefore be computed with a
//! single forward pass over an array: add each node's value into its parent's
//! slot, and by the time a node is reached its own slot is already complete.
//!
//! # CRITICAL: Why we key leaves by taxon NAME not node ID
//! Node ids are assigned during parsing and carry no meaning across inputs.
//! The abundance table refers to features by name, so the index keeps a
//! name → postorder-index map for the leaves and rejects duplicate names.

use phylotree::tree::{Tree as PhyloTree, TreeError};
use std::collections::HashMap;
use thiserror::Error;

/// Sentinel parent index for the root node.
pub const NO_PARENT: usize = usize::MAX;

/// Structural defects that make a tree unusable for UniFrac.
///
/// All of these are detected while building the [`TreeIndex`], before any
/// heavy computation starts.
#[derive(Debug, Error)]
pub enum MalformedTreeError {
    #[error("tree has {leaves} leaves, at least 2 are required")]
    FewerThanTwoLeaves { leaves: usize },

    #[error("duplicate leaf name '{name}'")]
    DuplicateLeafName { name: String },

    #[error("tree contains an unnamed leaf")]
    UnnamedLeaf,

    #[error("tree contains a cycle")]
    Cycle,

    #[error("leaf '{name}' is not reachable from the root")]
    Disconnected { name: String },

    #[error("negative branch length {length} on the branch above '{node}'")]
    NegativeBranchLength { node: String, length: f64 },

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// What to do with negative branch lengths in the input tree.
///
/// Some tree inference tools emit slightly negative lengths. The default is
/// to reject them; [`BranchLengthPolicy::ClampToZero`] replaces them with 0
/// and logs how many were clamped.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BranchLengthPolicy {
    #[default]
    Reject,
    ClampToZero,
}

/// An immutable, postorder-numbered representation of a rooted phylogeny.
///
/// # Fields
/// - `parent[n]`: postorder index of `n`'s parent ([`NO_PARENT`] for the root)
/// - `length[n]`: length of the branch above `n` (0 for the root)
/// - `leaf_index`: taxon name → postorder index, leaves only
///
/// # Invariants
/// - `parent[n] > n` for every non-root node
/// - the root holds the final index, `node_count() - 1`
/// - branch lengths are non-negative (negative inputs either fail the build
///   or are clamped to zero, per [`BranchLengthPolicy`])
#[derive(Debug, Clone)]
pub struct TreeIndex {
    parent: Vec<usize>,
    length: Vec<f64>,
    leaf_index: HashMap<String, usize>,
    total_length: f64,
}

impl TreeIndex {
    /// Build an index from a parsed tree, rejecting negative branch lengths.
    pub fn from_tree(tree: &PhyloTree) -> Result<Self, MalformedTreeError> {
        Self::from_tree_with(tree, BranchLengthPolicy::Reject)
    }

    /// Build an index from a parsed tree with an explicit branch-length policy.
    ///
    /// # Algorithm
    /// Iterative postorder traversal from the root with an explicit work
    /// stack of `(node, next-child cursor)` frames. A node is assigned its
    /// index when its frame is popped, i.e. after all children completed,
    /// so children always precede parents in the numbering. No recursion,
    /// so tree depth is not limited by the call stack.
    ///
    /// # Errors
    /// See [`MalformedTreeError`]. Cycles are caught when a node is reached
    /// twice; leaves that the traversal never reaches are reported as
    /// disconnected.
    pub fn from_tree_with(
        tree: &PhyloTree,
        policy: BranchLengthPolicy,
    ) -> Result<Self, MalformedTreeError> {
        let root_id = tree.get_root()?;

        // Postorder index for every phylotree node id reached from the root.
        let mut position: HashMap<usize, usize> = HashMap::new();
        let mut order: Vec<usize> = Vec::new();
        let mut stack: Vec<(usize, usize)> = vec![(root_id, 0)];

        while let Some(frame) = stack.last_mut() {
            let node_id = frame.0;
            let node = tree.get(&node_id)?;
            if frame.1 < node.children.len() {
                let child_id = node.children[frame.1];
                frame.1 += 1;
                if position.contains_key(&child_id)
                    || stack.iter().any(|&(open, _)| open == child_id)
                {
                    return Err(MalformedTreeError::Cycle);
                }
                stack.push((child_id, 0));
            } else {
                stack.pop();
                position.insert(node_id, order.len());
                order.push(node_id);
            }
        }

        // Every leaf the parser knows about must have been reached.
        for leaf_id in tree.get_leaves() {
            if !position.contains_key(&leaf_id) {
                let name = tree
                    .get(&leaf_id)?
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("#{leaf_id}"));
                return Err(MalformedTreeError::Disconnected { name });
            }
        }

        let node_count = order.len();
        let mut parent = vec![NO_PARENT; node_count];
        let mut length = vec![0.0f64; node_count];
        let mut leaf_index = HashMap::new();
        let mut total_length = 0.0f64;
        let mut clamped = 0usize;

        for (idx, &node_id) in order.iter().enumerate() {
            let node = tree.get(&node_id)?;

            if node_id != root_id {
                // Guaranteed present: the traversal only reaches a node
                // through its parent.
                parent[idx] = node
                    .parent
                    .and_then(|p| position.get(&p).copied())
                    .ok_or(MalformedTreeError::Cycle)?;

                let mut branch = node.parent_edge.unwrap_or(0.0);
                if branch < 0.0 {
                    match policy {
                        BranchLengthPolicy::Reject => {
                            return Err(MalformedTreeError::NegativeBranchLength {
                                node: node.name.clone().unwrap_or_else(|| format!("#{node_id}")),
                                length: branch,
                            });
                        }
                        BranchLengthPolicy::ClampToZero => {
                            branch = 0.0;
                            clamped += 1;
                        }
                    }
                }
                length[idx] = branch;
                total_length += branch;
            }

            if node.children.is_empty() {
                let name = match &node.name {
                    Some(name) if !name.is_empty() => name.clone(),
                    _ => return Err(MalformedTreeError::UnnamedLeaf),
                };
                if leaf_index.insert(name.clone(), idx).is_some() {
                    return Err(MalformedTreeError::DuplicateLeafName { name });
                }
            }
        }

        if clamped > 0 {
            log::warn!("clamped {clamped} negative branch lengths to zero");
        }

        if leaf_index.len() < 2 {
            return Err(MalformedTreeError::FewerThanTwoLeaves {
                leaves: leaf_index.len(),
            });
        }

        Ok(TreeIndex {
            parent,
            length,
            leaf_index,
            total_length,
        })
    }

    /// Total number of nodes; the root holds index `node_count() - 1`.
    pub fn node_count(&self) -> usize {
        self.parent.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_index.len()
    }

    /// Sum of all branch lengths (the root contributes nothing).
    pub fn total_length(&self) -> f64 {
        self.total_length
    }

    /// Postorder index of the named leaf, if present.
    pub fn leaf(&self, name: &str) -> Option<usize> {
        self.leaf_index.get(name).copied()
    }

    /// Leaf names known to the tree, in no particular order.
    pub fn leaf_names(&self) -> impl Iterator<Item = &str> {
        self.leaf_index.keys().map(String::as_str)
    }

    /// Parent link per node, [`NO_PARENT`] for the root.
    pub fn parents(&self) -> &[usize] {
        &self.parent
    }

    /// Branch length above each node, 0 for the root.
    pub fn lengths(&self) -> &[f64] {
        &self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn five_leaf_tree() -> PhyloTree {
        PhyloTree::from_newick("((A:1,B:2):1,(C:3,(D:1,E:1):2):1);").unwrap()
    }

    #[test]
    fn postorder_invariant_holds() {
        let index = TreeIndex::from_tree(&five_leaf_tree()).unwrap();
        let n = index.node_count();

        assert_eq!(n, 9);
        assert_eq!(index.leaf_count(), 5);

        // Children strictly precede parents; the root is last.
        for (node, &parent) in index.parents().iter().enumerate() {
            if parent == NO_PARENT {
                assert_eq!(node, n - 1);
            } else {
                assert!(parent > node);
            }
        }
    }

    #[test]
    fn branch_lengths_sum_over_non_root_branches() {
        let index = TreeIndex::from_tree(&five_leaf_tree()).unwrap();

        // 1+2+1 + 3+1+1+2+1 = 12, root excluded.
        assert!((index.total_length() - 12.0).abs() < 1e-12);
        assert_eq!(index.lengths()[index.node_count() - 1], 0.0);
    }

    #[test]
    fn leaves_are_keyed_by_name() {
        let index = TreeIndex::from_tree(&five_leaf_tree()).unwrap();

        for name in ["A", "B", "C", "D", "E"] {
            let leaf = index.leaf(name).unwrap();
            assert_ne!(index.parents()[leaf], NO_PARENT);
        }
        assert_eq!(index.leaf("F"), None);
    }

    #[test]
    fn duplicate_leaf_names_are_rejected() {
        let tree = PhyloTree::from_newick("((A:1,A:2):1,C:1);").unwrap();
        let err = TreeIndex::from_tree(&tree).unwrap_err();
        assert!(matches!(
            err,
            MalformedTreeError::DuplicateLeafName { name } if name == "A"
        ));
    }

    #[test]
    fn single_leaf_tree_is_rejected() {
        let tree = PhyloTree::from_newick("(A:1);").unwrap();
        assert!(matches!(
            TreeIndex::from_tree(&tree),
            Err(MalformedTreeError::FewerThanTwoLeaves { leaves: 1 })
        ));
    }

    #[test]
    fn negative_branch_lengths_reject_or_clamp() {
        let tree = PhyloTree::from_newick("((A:1,B:-0.5):1,C:1);").unwrap();

        assert!(matches!(
            TreeIndex::from_tree(&tree),
            Err(MalformedTreeError::NegativeBranchLength { .. })
        ));

        let index = TreeIndex::from_tree_with(&tree, BranchLengthPolicy::ClampToZero).unwrap();
        let leaf_b = index.leaf("B").unwrap();
        assert_eq!(index.lengths()[leaf_b], 0.0);
        assert!((index.total_length() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn multifurcations_are_supported() {
        let tree = PhyloTree::from_newick("(A:1,B:1,C:1,(D:1,E:1,F:1):2);").unwrap();
        let index = TreeIndex::from_tree(&tree).unwrap();

        assert_eq!(index.leaf_count(), 6);
        assert_eq!(index.node_count(), 8);
        assert!((index.total_length() - 8.0).abs() < 1e-12);
    }
}
