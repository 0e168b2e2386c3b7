//! Sparse sample-by-feature abundance table.
//!
//! The table arrives already parsed: an ordered list of sample ids, an
//! ordered list of feature ids, and per-sample sparse rows of
//! `(feature column, abundance)`. Sample order is preserved end to end so
//! the output matrix rows line up with the caller's labels.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("duplicate sample id '{id}'")]
    DuplicateSampleId { id: String },

    #[error("duplicate feature id '{id}'")]
    DuplicateFeatureId { id: String },

    #[error("sample '{sample}' references feature column {column}, table has {columns}")]
    ColumnOutOfRange {
        sample: String,
        column: usize,
        columns: usize,
    },

    #[error("sample '{sample}' has invalid abundance {value} (must be finite and >= 0)")]
    InvalidAbundance { sample: String, value: f64 },

    #[error("table has {rows} rows for {samples} sample ids")]
    RowCountMismatch { samples: usize, rows: usize },

    #[error("unknown sample id '{id}'")]
    UnknownSampleId { id: String },
}

/// A validated sparse abundance table.
///
/// Rows are sample-major: `rows[s]` lists the nonzero `(feature column,
/// abundance)` entries for sample `s`. Construction checks id uniqueness,
/// column bounds and abundance validity once; everything downstream trusts
/// the table.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    sample_ids: Vec<String>,
    feature_ids: Vec<String>,
    rows: Vec<Vec<(usize, f64)>>,
}

impl FeatureTable {
    pub fn new(
        sample_ids: Vec<String>,
        feature_ids: Vec<String>,
        rows: Vec<Vec<(usize, f64)>>,
    ) -> Result<Self, TableError> {
        if sample_ids.len() != rows.len() {
            return Err(TableError::RowCountMismatch {
                samples: sample_ids.len(),
                rows: rows.len(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(TableError::DuplicateSampleId { id: id.clone() });
            }
        }
        seen.clear();
        for id in &feature_ids {
            if !seen.insert(id.as_str()) {
                return Err(TableError::DuplicateFeatureId { id: id.clone() });
            }
        }

        for (sample, row) in sample_ids.iter().zip(&rows) {
            for &(column, value) in row {
                if column >= feature_ids.len() {
                    return Err(TableError::ColumnOutOfRange {
                        sample: sample.clone(),
                        column,
                        columns: feature_ids.len(),
                    });
                }
                if !value.is_finite() || value < 0.0 {
                    return Err(TableError::InvalidAbundance {
                        sample: sample.clone(),
                        value,
                    });
                }
            }
        }

        Ok(FeatureTable {
            sample_ids,
            feature_ids,
            rows,
        })
    }

    /// Build a table from dense rows, keeping only nonzero entries.
    ///
    /// Convenient for tests and small inputs; `rows[s][f]` is the abundance
    /// of feature `f` in sample `s`.
    pub fn from_dense(
        sample_ids: Vec<String>,
        feature_ids: Vec<String>,
        dense: Vec<Vec<f64>>,
    ) -> Result<Self, TableError> {
        let rows = dense
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .enumerate()
                    .filter(|&(_, v)| v != 0.0)
                    .collect()
            })
            .collect();
        Self::new(sample_ids, feature_ids, rows)
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn n_features(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn feature_ids(&self) -> &[String] {
        &self.feature_ids
    }

    /// Position of a sample id in the caller-supplied ordering.
    pub fn sample_position(&self, id: &str) -> Result<usize, TableError> {
        self.sample_ids
            .iter()
            .position(|s| s == id)
            .ok_or_else(|| TableError::UnknownSampleId { id: id.to_string() })
    }

    /// Sparse `(feature column, abundance)` entries for one sample.
    pub fn row(&self, sample: usize) -> &[(usize, f64)] {
        &self.rows[sample]
    }
}
