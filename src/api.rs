//! Python binding layer for UniFrac calculations.
//!
//! Provides one Python function per metric, each taking a table path and a
//! tree path and returning `(sample_ids, distance_matrix)`. The function
//! names match the method names the surrounding tooling expects.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::align::AlignmentPolicy;
use crate::distances::{Metric, compute};
use crate::io::read_table_tsv;

/// Compute pairwise unweighted UniFrac distances.
///
/// Args:
///     table: Path to the sample-by-feature abundance table (TSV)
///     phylogeny: Path to the rooted Newick tree
///     policy: Feature alignment policy, "intersect" (default) or "strict"
///
/// Returns:
///     A tuple of (sample_ids, distance_matrix) where:
///     - sample_ids is the table's sample ordering
///     - distance_matrix is a symmetric 2D list of distances
///
/// Raises:
///     ValueError: If an input cannot be read, the tree is malformed, or the
///     feature sets cannot be aligned under the chosen policy
#[pyfunction]
#[pyo3(signature = (table, phylogeny, policy="intersect"))]
fn unweighted(
    table: String,
    phylogeny: String,
    policy: &str,
) -> PyResult<(Vec<String>, Vec<Vec<f64>>)> {
    run(&table, &phylogeny, Metric::Unweighted, policy)
}

/// Compute pairwise weighted normalized UniFrac distances.
///
/// Same arguments and return shape as [`unweighted`]; distances lie in [0, 1].
#[pyfunction]
#[pyo3(signature = (table, phylogeny, policy="intersect"))]
fn weighted_normalized(
    table: String,
    phylogeny: String,
    policy: &str,
) -> PyResult<(Vec<String>, Vec<Vec<f64>>)> {
    run(&table, &phylogeny, Metric::WeightedNormalized, policy)
}

/// Compute pairwise weighted unnormalized UniFrac distances.
///
/// Same arguments and return shape as [`unweighted`]; distances are
/// non-negative and scale with sample depth.
#[pyfunction]
#[pyo3(signature = (table, phylogeny, policy="intersect"))]
fn weighted_unnormalized(
    table: String,
    phylogeny: String,
    policy: &str,
) -> PyResult<(Vec<String>, Vec<Vec<f64>>)> {
    run(&table, &phylogeny, Metric::WeightedUnnormalized, policy)
}

fn run(
    table_fp: &str,
    tree_fp: &str,
    metric: Metric,
    policy: &str,
) -> PyResult<(Vec<String>, Vec<Vec<f64>>)> {
    let policy = match policy {
        "strict" => AlignmentPolicy::Strict,
        "intersect" => AlignmentPolicy::Intersect,
        other => {
            return Err(PyValueError::new_err(format!(
                "unrecognized alignment policy '{other}'"
            )));
        }
    };

    let tree = phylotree::tree::Tree::from_file(std::path::Path::new(tree_fp))
        .map_err(|e| PyValueError::new_err(format!("failed to read tree '{tree_fp}': {e}")))?;
    let table = read_table_tsv(table_fp)
        .map_err(|e| PyValueError::new_err(format!("failed to read table '{table_fp}': {e}")))?;

    let matrix = compute(&tree, &table, metric, policy)
        .map_err(|e| PyValueError::new_err(format!("{metric} computation failed: {e}")))?;

    Ok((matrix.sample_ids().to_vec(), matrix.rows().to_vec()))
}

/// Python module definition
#[pymodule]
fn unifrac(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(unweighted, m)?)?;
    m.add_function(wrap_pyfunction!(weighted_normalized, m)?)?;
    m.add_function(wrap_pyfunction!(weighted_unnormalized, m)?)?;
    Ok(())
}
