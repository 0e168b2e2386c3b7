//! Per-sample abundance propagation.
//!
//! # Overview
//! Every UniFrac variant needs, for each tree node, the total abundance of
//! the sample's features beneath that node. Because the [`TreeIndex`]
//! numbers nodes in postorder, this is a single forward pass over a flat
//! array: scatter the leaf abundances, then add each node's value into its
//! parent's slot. When the pass reaches a node, its own slot already holds
//! the complete subtree sum.
//!
//! Weighted variants propagate real-valued mass ([`propagate_mass`], raw or
//! relativized); the unweighted variant propagates presence bits
//! ([`propagate_presence`]).

use crate::align::FeatureMap;
use crate::bitset::Bitset;
use crate::tree::{NO_PARENT, TreeIndex};

/// One sample's propagated abundance, indexed by postorder node.
///
/// `mass[n]` is the total descendant abundance at node `n`; the root slot
/// equals the sample total (1 after relativization). Immutable once built,
/// shared read-only across all pairwise evaluations.
#[derive(Debug, Clone)]
pub struct MassVector {
    pub mass: Vec<f64>,
    /// Aligned leaf total before any relativization.
    pub total: f64,
}

impl MassVector {
    /// True when no aligned feature carried abundance.
    pub fn is_empty(&self) -> bool {
        self.total == 0.0
    }
}

/// Propagate one sample's abundances to per-node subtree mass.
///
/// `row` is the sample's sparse `(feature column, abundance)` entries;
/// columns without a tree leaf (dropped under the intersect policy) are
/// skipped. With `relativize`, leaf values are first rescaled to sum to 1;
/// an all-zero sample is left at zero rather than divided.
pub fn propagate_mass(
    index: &TreeIndex,
    map: &FeatureMap,
    row: &[(usize, f64)],
    relativize: bool,
) -> MassVector {
    let n = index.node_count();
    let mut mass = vec![0.0f64; n];
    let mut total = 0.0f64;

    for &(column, value) in row {
        if let Some(leaf) = map.leaf_for_column(column) {
            mass[leaf] += value;
            total += value;
        }
    }

    if relativize && total > 0.0 {
        for value in &mut mass {
            *value /= total;
        }
    }

    // Single forward pass; the root (last index) has no parent.
    let parents = index.parents();
    for node in 0..n - 1 {
        let parent = parents[node];
        debug_assert_ne!(parent, NO_PARENT);
        mass[parent] += mass[node];
    }

    MassVector { mass, total }
}

/// Propagate one sample's presence/absence to per-node bits.
///
/// A node's bit is set when any leaf beneath it has abundance > 0. Same
/// forward pass as [`propagate_mass`], with bitwise accumulation.
pub fn propagate_presence(index: &TreeIndex, map: &FeatureMap, row: &[(usize, f64)]) -> Bitset {
    let n = index.node_count();
    let mut bits = Bitset::zeros(Bitset::words_for(n));

    for &(column, value) in row {
        if value > 0.0 {
            if let Some(leaf) = map.leaf_for_column(column) {
                bits.set(leaf);
            }
        }
    }

    let parents = index.parents();
    for node in 0..n - 1 {
        if bits.get(node) {
            bits.set(parents[node]);
        }
    }

    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::{AlignmentPolicy, align_features};
    use phylotree::tree::Tree as PhyloTree;

    fn setup() -> (TreeIndex, FeatureMap, Vec<String>) {
        let tree = PhyloTree::from_newick("((A:1,B:2):1,(C:3,(D:1,E:1):2):1);").unwrap();
        let index = TreeIndex::from_tree(&tree).unwrap();
        let features: Vec<String> = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let map = align_features(&index, &features, AlignmentPolicy::Strict).unwrap();
        (index, map, features)
    }

    #[test]
    fn subtree_sums_reach_the_root() {
        let (index, map, _) = setup();
        // A=2, B=2, C=4
        let row = [(0, 2.0), (1, 2.0), (2, 4.0)];
        let vector = propagate_mass(&index, &map, &row, false);

        assert_eq!(vector.total, 8.0);
        let root = index.node_count() - 1;
        assert!((vector.mass[root] - 8.0).abs() < 1e-12);

        // The A/B cherry holds A + B.
        let ab = index.parents()[index.leaf("A").unwrap()];
        assert_eq!(ab, index.parents()[index.leaf("B").unwrap()]);
        assert!((vector.mass[ab] - 4.0).abs() < 1e-12);

        // The D/E cherry carries nothing for this sample.
        let de = index.parents()[index.leaf("D").unwrap()];
        assert_eq!(vector.mass[de], 0.0);
    }

    #[test]
    fn relativized_mass_sums_to_one() {
        let (index, map, _) = setup();
        let row = [(0, 2.0), (1, 2.0), (2, 4.0)];
        let vector = propagate_mass(&index, &map, &row, true);

        let root = index.node_count() - 1;
        assert!((vector.mass[root] - 1.0).abs() < 1e-12);
        assert!((vector.mass[index.leaf("C").unwrap()] - 0.5).abs() < 1e-12);
        // Raw total is preserved for empty-sample detection.
        assert_eq!(vector.total, 8.0);
    }

    #[test]
    fn empty_sample_propagates_as_zero() {
        let (index, map, _) = setup();
        let vector = propagate_mass(&index, &map, &[], true);

        assert!(vector.is_empty());
        assert!(vector.mass.iter().all(|&m| m == 0.0));

        let bits = propagate_presence(&index, &map, &[]);
        assert_eq!(bits.count_ones(), 0);
    }

    #[test]
    fn presence_marks_every_ancestor() {
        let (index, map, _) = setup();
        // Only D present.
        let bits = propagate_presence(&index, &map, &[(3, 5.0)]);

        let d = index.leaf("D").unwrap();
        let de = index.parents()[d];
        let cde = index.parents()[de];
        let root = index.node_count() - 1;

        assert!(bits.get(d));
        assert!(bits.get(de));
        assert!(bits.get(cde));
        assert!(bits.get(root));
        assert_eq!(bits.count_ones(), 4);
        assert!(!bits.get(index.leaf("A").unwrap()));
    }

    #[test]
    fn zero_abundance_is_not_presence() {
        let (index, map, _) = setup();
        let bits = propagate_presence(&index, &map, &[(0, 0.0), (3, 1.0)]);
        assert!(!bits.get(index.leaf("A").unwrap()));
        assert!(bits.get(index.leaf("D").unwrap()));
    }
}
