//! Feature-to-leaf alignment.
//!
//! The abundance table and the tree name their features independently; this
//! module reconciles the two sets before any computation starts. The result
//! is a [`FeatureMap`] from table column to tree leaf index plus a
//! [`AlignmentReport`] of what did not line up.

use crate::tree::TreeIndex;
use std::collections::HashSet;
use thiserror::Error;

/// How to treat features present on only one side.
///
/// `Intersect` is the conventional default for ecological analyses: restrict
/// the computation to the shared features. `Strict` treats any mismatch as
/// fatal.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AlignmentPolicy {
    Strict,
    #[default]
    Intersect,
}

/// Features that exist on only one side of the alignment, sorted by name.
#[derive(Debug, Clone, Default)]
pub struct AlignmentReport {
    /// Feature ids in the table with no matching tree leaf.
    pub table_only: Vec<String>,
    /// Tree leaf names with no matching table feature.
    pub tree_only: Vec<String>,
}

impl AlignmentReport {
    pub fn is_clean(&self) -> bool {
        self.table_only.is_empty() && self.tree_only.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum FeatureMismatchError {
    #[error(
        "feature sets differ under strict alignment: {} table-only, {} tree-only features",
        .report.table_only.len(),
        .report.tree_only.len()
    )]
    Mismatch { report: AlignmentReport },

    #[error("table and tree share no features")]
    EmptyIntersection { report: AlignmentReport },
}

impl FeatureMismatchError {
    /// The mismatch report attached to either variant.
    pub fn report(&self) -> &AlignmentReport {
        match self {
            FeatureMismatchError::Mismatch { report } => report,
            FeatureMismatchError::EmptyIntersection { report } => report,
        }
    }
}

/// Injective map from table feature columns to tree leaf indices.
///
/// Columns for features the tree does not know map to `None` (only possible
/// under [`AlignmentPolicy::Intersect`]); their abundance is dropped during
/// propagation. Injectivity comes for free: the tree rejects duplicate leaf
/// names and the table rejects duplicate feature ids, so no two columns can
/// reach the same leaf.
#[derive(Debug, Clone)]
pub struct FeatureMap {
    leaf_by_column: Vec<Option<usize>>,
    report: AlignmentReport,
}

impl FeatureMap {
    pub fn leaf_for_column(&self, column: usize) -> Option<usize> {
        self.leaf_by_column[column]
    }

    pub fn report(&self) -> &AlignmentReport {
        &self.report
    }

    /// Number of table columns with a matching tree leaf.
    pub fn mapped_count(&self) -> usize {
        self.leaf_by_column.iter().flatten().count()
    }
}

/// Align the table's feature ids onto the tree's leaves.
///
/// Pure with respect to the tree: nothing is mutated, the outcome is the map
/// and its report. Under `Strict` any mismatch is fatal and the report rides
/// along on the error; under `Intersect` only an empty overlap is fatal.
pub fn align_features(
    index: &TreeIndex,
    feature_ids: &[String],
    policy: AlignmentPolicy,
) -> Result<FeatureMap, FeatureMismatchError> {
    let leaf_by_column: Vec<Option<usize>> = feature_ids
        .iter()
        .map(|id| index.leaf(id))
        .collect();

    let table_set: HashSet<&str> = feature_ids.iter().map(String::as_str).collect();

    let mut table_only: Vec<String> = feature_ids
        .iter()
        .zip(&leaf_by_column)
        .filter(|(_, leaf)| leaf.is_none())
        .map(|(id, _)| id.clone())
        .collect();
    table_only.sort_unstable();

    let mut tree_only: Vec<String> = index
        .leaf_names()
        .filter(|name| !table_set.contains(name))
        .map(str::to_string)
        .collect();
    tree_only.sort_unstable();

    let report = AlignmentReport {
        table_only,
        tree_only,
    };

    let mapped = leaf_by_column.iter().flatten().count();
    if mapped == 0 {
        return Err(FeatureMismatchError::EmptyIntersection { report });
    }

    match policy {
        AlignmentPolicy::Strict if !report.is_clean() => {
            Err(FeatureMismatchError::Mismatch { report })
        }
        _ => {
            if !report.table_only.is_empty() {
                log::warn!(
                    "dropping {} table features absent from the tree",
                    report.table_only.len()
                );
            }
            Ok(FeatureMap {
                leaf_by_column,
                report,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phylotree::tree::Tree as PhyloTree;

    fn index() -> TreeIndex {
        let tree = PhyloTree::from_newick("((A:1,B:2):1,(C:3,D:1):1);").unwrap();
        TreeIndex::from_tree(&tree).unwrap()
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match_is_clean_under_both_policies() {
        let index = index();
        for policy in [AlignmentPolicy::Strict, AlignmentPolicy::Intersect] {
            let map = align_features(&index, &ids(&["A", "B", "C", "D"]), policy).unwrap();
            assert!(map.report().is_clean());
            assert_eq!(map.mapped_count(), 4);
        }
    }

    #[test]
    fn strict_rejects_any_mismatch() {
        let index = index();

        let err = align_features(
            &index,
            &ids(&["A", "B", "C", "D", "X"]),
            AlignmentPolicy::Strict,
        )
        .unwrap_err();

        match err {
            FeatureMismatchError::Mismatch { report } => {
                assert_eq!(report.table_only, ids(&["X"]));
                assert!(report.tree_only.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }

        // Tree-only features are mismatches too.
        assert!(align_features(&index, &ids(&["A", "B", "C"]), AlignmentPolicy::Strict).is_err());
    }

    #[test]
    fn intersect_drops_unmatched_columns() {
        let index = index();
        let map = align_features(
            &index,
            &ids(&["X", "A", "B", "Y"]),
            AlignmentPolicy::Intersect,
        )
        .unwrap();

        assert_eq!(map.leaf_for_column(0), None);
        assert!(map.leaf_for_column(1).is_some());
        assert_eq!(map.mapped_count(), 2);
        assert_eq!(map.report().table_only, ids(&["X", "Y"]));
        assert_eq!(map.report().tree_only, ids(&["C", "D"]));
    }

    #[test]
    fn disjoint_sets_are_fatal_even_under_intersect() {
        let index = index();
        let err =
            align_features(&index, &ids(&["X", "Y"]), AlignmentPolicy::Intersect).unwrap_err();
        assert!(matches!(err, FeatureMismatchError::EmptyIntersection { .. }));
    }
}
