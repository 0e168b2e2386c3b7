//! UniFrac distance metrics over propagated sample vectors.
//!
//! This module implements four phylogenetic beta-diversity measures between
//! pairs of samples:
//!
//! 1. **Unweighted**: Fraction of branch length leading to features found in
//!    exactly one of the two samples. Range: [0, 1].
//!
//! 2. **Weighted unnormalized**: Branch-length-weighted sum of absolute
//!    abundance differences, over raw abundances. Range: [0, ∞).
//!
//! 3. **Weighted normalized**: Like weighted unnormalized but over relative
//!    abundances, divided by the branch-length-weighted total mass of both
//!    samples. Range: [0, 1].
//!
//! 4. **Generalized**: The α-parameterized family interpolating between
//!    presence-driven and abundance-driven weighting; α = 1 recovers the
//!    weighted normalized measure. Range: [0, 1].
//!
//! Every measure consumes per-node subtree state produced by the
//! [`propagate`](crate::propagate) pass over a shared [`TreeIndex`]; a pair
//! evaluation is a single read-only sweep over the node arrays.

use crate::align::{AlignmentPolicy, FeatureMap, FeatureMismatchError, align_features};
use crate::bitset::Bitset;
use crate::propagate::{MassVector, propagate_mass, propagate_presence};
use crate::table::{FeatureTable, TableError};
use crate::tree::{MalformedTreeError, TreeIndex};
use phylotree::tree::Tree as PhyloTree;
use rayon::prelude::*;
use std::str::FromStr;
use thiserror::Error;

#[cfg(test)]
use itertools::Itertools;

/// The UniFrac variant to compute.
///
/// A closed enumeration, matched exhaustively by the evaluator; string
/// selection (CLI, bindings) goes through [`FromStr`] and fails with
/// [`InvalidMetricError`] before any computation starts.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Metric {
    Unweighted,
    WeightedNormalized,
    WeightedUnnormalized,
    /// Generalized UniFrac with abundance exponent `alpha`; `alpha = 1`
    /// is equivalent to [`Metric::WeightedNormalized`].
    Generalized { alpha: f64 },
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Unweighted => "unweighted",
            Metric::WeightedNormalized => "weighted_normalized",
            Metric::WeightedUnnormalized => "weighted_unnormalized",
            Metric::Generalized { .. } => "generalized",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unrecognized UniFrac metric '{name}'")]
pub struct InvalidMetricError {
    pub name: String,
}

impl FromStr for Metric {
    type Err = InvalidMetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unweighted" => Ok(Metric::Unweighted),
            "weighted_normalized" => Ok(Metric::WeightedNormalized),
            "weighted_unnormalized" => Ok(Metric::WeightedUnnormalized),
            "generalized" => Ok(Metric::Generalized { alpha: 1.0 }),
            other => Err(InvalidMetricError {
                name: other.to_string(),
            }),
        }
    }
}

/// Setup failures surfaced by [`compute`] and [`compute_row`].
///
/// Everything fatal is raised here, before the propagation and evaluation
/// phases run; those phases cannot fail.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error(transparent)]
    MalformedTree(#[from] MalformedTreeError),

    #[error(transparent)]
    FeatureMismatch(#[from] FeatureMismatchError),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// Compute unweighted UniFrac from two propagated presence bitsets.
///
/// # Algorithm
/// distance = Σ length[n] over nodes covered by exactly one sample
///          / Σ length[n] over nodes covered by at least one sample
///
/// The scan is word-at-a-time: per 64-node word, `union = a | b` drives the
/// set-bit iteration and `a ^ b` flags the unshared nodes. The root is bit
/// `node_count - 1` and carries length 0, so it never moves either sum.
///
/// # Edge case
/// Both samples empty (or all covered branches of length 0) leaves the
/// denominator at 0; the distance is then 0 by convention, not an error.
pub fn unweighted_from_presence(index: &TreeIndex, a: &Bitset, b: &Bitset) -> f64 {
    let lengths = index.lengths();
    let mut unique = 0.0f64;
    let mut shared_or_unique = 0.0f64;

    for (word_idx, (&wa, &wb)) in a.words().iter().zip(b.words()).enumerate() {
        let sym = wa ^ wb;
        let mut union = wa | wb;
        while union != 0 {
            let bit = union.trailing_zeros() as usize;
            let length = lengths[(word_idx << 6) | bit];
            shared_or_unique += length;
            if (sym >> bit) & 1 != 0 {
                unique += length;
            }
            union &= union - 1;
        }
    }

    if shared_or_unique == 0.0 {
        0.0
    } else {
        unique / shared_or_unique
    }
}

/// Compute weighted unnormalized UniFrac from two raw mass vectors.
///
/// # Algorithm
/// distance = Σ length[n] × |a[n] − b[n]|
///
/// Inputs are the raw propagated abundances, so the result scales with
/// sample depth and has no fixed upper bound.
pub fn weighted_unnormalized_from_mass(index: &TreeIndex, a: &MassVector, b: &MassVector) -> f64 {
    index
        .lengths()
        .iter()
        .zip(&a.mass)
        .zip(&b.mass)
        .map(|((&length, &x), &y)| length * (x - y).abs())
        .sum()
}

/// Compute weighted normalized UniFrac from two relative mass vectors.
///
/// # Algorithm
/// distance = Σ length[n] × |a[n] − b[n]|  /  Σ length[n] × (a[n] + b[n])
///
/// With per-sample relative abundances the denominator bounds the numerator,
/// so the result lies in [0, 1].
///
/// # Edge case
/// Denominator 0 (both samples empty) gives distance 0 by convention.
pub fn weighted_normalized_from_mass(index: &TreeIndex, a: &MassVector, b: &MassVector) -> f64 {
    let mut diff = 0.0f64;
    let mut mass = 0.0f64;

    for ((&length, &x), &y) in index.lengths().iter().zip(&a.mass).zip(&b.mass) {
        diff += length * (x - y).abs();
        mass += length * (x + y);
    }

    if mass == 0.0 { 0.0 } else { diff / mass }
}

/// Compute generalized UniFrac from two relative mass vectors.
///
/// # Algorithm
/// distance = Σ length[n] × (a+b)^α × |a−b| / (a+b)
///          / Σ length[n] × (a+b)^α
///
/// restricted to nodes with a + b > 0. α tunes how much abundant lineages
/// dominate: α = 1 reduces to the weighted normalized measure, smaller α
/// upweights rare lineages.
pub fn generalized_from_mass(
    index: &TreeIndex,
    a: &MassVector,
    b: &MassVector,
    alpha: f64,
) -> f64 {
    let mut diff = 0.0f64;
    let mut mass = 0.0f64;

    for ((&length, &x), &y) in index.lengths().iter().zip(&a.mass).zip(&b.mass) {
        let sum = x + y;
        if sum > 0.0 {
            let weight = length * sum.powf(alpha);
            diff += weight * (x - y).abs() / sum;
            mass += weight;
        }
    }

    if mass == 0.0 { 0.0 } else { diff / mass }
}

/// A symmetric sample-by-sample distance matrix with zero diagonal.
///
/// Row and column order is the caller-supplied sample order of the input
/// table, never resorted, so indices can be matched back to external labels.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    sample_ids: Vec<String>,
    data: Vec<Vec<f64>>,
}

impl DistanceMatrix {
    /// Assemble from upper-triangle `(i, j, distance)` entries.
    ///
    /// Each pair is evaluated once and mirrored, which makes symmetry exact
    /// rather than a floating-point accident; the diagonal stays 0.
    pub fn from_pairs(sample_ids: Vec<String>, pairs: Vec<(usize, usize, f64)>) -> Self {
        let n = sample_ids.len();
        let mut data = vec![vec![0.0f64; n]; n];
        for (i, j, distance) in pairs {
            data[i][j] = distance;
            data[j][i] = distance;
        }
        DistanceMatrix { sample_ids, data }
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i][j]
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.data
    }
}

/// Evaluate all upper-triangle pairs in parallel.
///
/// Exactly n(n−1)/2 invocations of `distance`, never with i == j; the pair
/// set is partitioned across rayon workers and each evaluation only reads
/// shared immutable state, so no locking is involved. Completion order is
/// irrelevant: the triples carry their own coordinates.
pub fn pairwise_parallel<F>(n: usize, distance: F) -> Vec<(usize, usize, f64)>
where
    F: Fn(usize, usize) -> f64 + Sync,
{
    (0..n)
        .into_par_iter()
        .flat_map_iter(|i| (i + 1..n).map(move |j| (i, j)))
        .map(|(i, j)| (i, j, distance(i, j)))
        .collect()
}

fn warn_empty_samples<I>(sample_ids: &[String], empty: I)
where
    I: IntoIterator<Item = bool>,
{
    for (id, is_empty) in sample_ids.iter().zip(empty) {
        if is_empty {
            log::warn!("sample '{id}' has zero total abundance after alignment");
        }
    }
}

fn build_presence_states(
    index: &TreeIndex,
    map: &FeatureMap,
    table: &FeatureTable,
) -> Vec<Bitset> {
    let states: Vec<Bitset> = (0..table.n_samples())
        .into_par_iter()
        .map(|sample| propagate_presence(index, map, table.row(sample)))
        .collect();
    warn_empty_samples(
        table.sample_ids(),
        states.iter().map(|bits| bits.count_ones() == 0),
    );
    states
}

fn build_mass_states(
    index: &TreeIndex,
    map: &FeatureMap,
    table: &FeatureTable,
    relativize: bool,
) -> Vec<MassVector> {
    let states: Vec<MassVector> = (0..table.n_samples())
        .into_par_iter()
        .map(|sample| propagate_mass(index, map, table.row(sample), relativize))
        .collect();
    warn_empty_samples(table.sample_ids(), states.iter().map(MassVector::is_empty));
    states
}

/// Compute the full pairwise UniFrac distance matrix.
///
/// Pipeline: index the tree, align features under `policy`, propagate every
/// sample once (in parallel), then evaluate the n(n−1)/2 pairs in parallel
/// and mirror into a symmetric matrix. All fatal conditions surface before
/// propagation begins; a returned matrix is always complete.
pub fn compute(
    tree: &PhyloTree,
    table: &FeatureTable,
    metric: Metric,
    policy: AlignmentPolicy,
) -> Result<DistanceMatrix, ComputeError> {
    let index = TreeIndex::from_tree(tree)?;
    compute_from_index(&index, table, metric, policy)
}

/// [`compute`] over a prebuilt [`TreeIndex`].
///
/// Lets callers that index the tree themselves (for branch-length clamping,
/// or to amortize the build over several tables) reuse it.
pub fn compute_from_index(
    index: &TreeIndex,
    table: &FeatureTable,
    metric: Metric,
    policy: AlignmentPolicy,
) -> Result<DistanceMatrix, ComputeError> {
    let map = align_features(index, table.feature_ids(), policy)?;
    let n = table.n_samples();

    let pairs = match metric {
        Metric::Unweighted => {
            let states = build_presence_states(index, &map, table);
            pairwise_parallel(n, |i, j| unweighted_from_presence(index, &states[i], &states[j]))
        }
        Metric::WeightedUnnormalized => {
            let states = build_mass_states(index, &map, table, false);
            pairwise_parallel(n, |i, j| {
                weighted_unnormalized_from_mass(index, &states[i], &states[j])
            })
        }
        Metric::WeightedNormalized => {
            let states = build_mass_states(index, &map, table, true);
            pairwise_parallel(n, |i, j| {
                weighted_normalized_from_mass(index, &states[i], &states[j])
            })
        }
        Metric::Generalized { alpha } => {
            let states = build_mass_states(index, &map, table, true);
            pairwise_parallel(n, |i, j| {
                generalized_from_mass(index, &states[i], &states[j], alpha)
            })
        }
    };

    Ok(DistanceMatrix::from_pairs(
        table.sample_ids().to_vec(),
        pairs,
    ))
}

/// Compute one sample's distances to every other sample.
///
/// The reduced mode for large tables: returns a single row, ordered like the
/// table's samples, with 0 at the reference position.
pub fn compute_row(
    tree: &PhyloTree,
    table: &FeatureTable,
    reference: &str,
    metric: Metric,
    policy: AlignmentPolicy,
) -> Result<Vec<f64>, ComputeError> {
    let index = TreeIndex::from_tree(tree)?;
    compute_row_from_index(&index, table, reference, metric, policy)
}

/// [`compute_row`] over a prebuilt [`TreeIndex`].
pub fn compute_row_from_index(
    index: &TreeIndex,
    table: &FeatureTable,
    reference: &str,
    metric: Metric,
    policy: AlignmentPolicy,
) -> Result<Vec<f64>, ComputeError> {
    let map = align_features(index, table.feature_ids(), policy)?;
    let r = table.sample_position(reference)?;
    let n = table.n_samples();

    let row = match metric {
        Metric::Unweighted => {
            let states = build_presence_states(index, &map, table);
            (0..n)
                .into_par_iter()
                .map(|j| {
                    if j == r {
                        0.0
                    } else {
                        unweighted_from_presence(index, &states[r], &states[j])
                    }
                })
                .collect()
        }
        Metric::WeightedUnnormalized => {
            let states = build_mass_states(index, &map, table, false);
            (0..n)
                .into_par_iter()
                .map(|j| {
                    if j == r {
                        0.0
                    } else {
                        weighted_unnormalized_from_mass(index, &states[r], &states[j])
                    }
                })
                .collect()
        }
        Metric::WeightedNormalized => {
            let states = build_mass_states(index, &map, table, true);
            (0..n)
                .into_par_iter()
                .map(|j| {
                    if j == r {
                        0.0
                    } else {
                        weighted_normalized_from_mass(index, &states[r], &states[j])
                    }
                })
                .collect()
        }
        Metric::Generalized { alpha } => {
            let states = build_mass_states(index, &map, table, true);
            (0..n)
                .into_par_iter()
                .map(|j| {
                    if j == r {
                        0.0
                    } else {
                        generalized_from_mass(index, &states[r], &states[j], alpha)
                    }
                })
                .collect()
        }
    };

    Ok(row)
}
