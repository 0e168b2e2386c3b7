use std::fs;
use std::io::{self, Write};
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use thiserror::Error;

use crate::distances::DistanceMatrix;
use crate::table::{FeatureTable, TableError};

#[derive(Debug, Error)]
pub enum TableReadError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error(transparent)]
    Table(#[from] TableError),
}

/// Read a sample-by-feature abundance table from a TSV file.
///
/// Expected layout mirrors the matrix writer: a header row whose first cell
/// is ignored and whose remaining cells are feature ids, then one row per
/// sample starting with the sample id. Zero entries are not stored.
pub fn read_table_tsv<P: AsRef<Path>>(path: P) -> Result<FeatureTable, TableReadError> {
    let content = fs::read_to_string(path.as_ref())?;
    let mut lines = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header) = lines.next().ok_or(TableReadError::Parse {
        line: 1,
        message: "empty table file".to_string(),
    })?;
    let feature_ids: Vec<String> = header
        .split('\t')
        .skip(1)
        .map(|id| id.trim().to_string())
        .collect();
    if feature_ids.is_empty() {
        return Err(TableReadError::Parse {
            line: 1,
            message: "header declares no features".to_string(),
        });
    }

    let mut sample_ids = Vec::new();
    let mut rows = Vec::new();

    for (idx, line) in lines {
        let line_no = idx + 1;
        let mut fields = line.split('\t');
        let sample_id = fields
            .next()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| TableReadError::Parse {
                line: line_no,
                message: "missing sample id".to_string(),
            })?;

        let mut row = Vec::new();
        let mut columns = 0;
        for (column, field) in fields.enumerate() {
            let value: f64 = field.trim().parse().map_err(|_| TableReadError::Parse {
                line: line_no,
                message: format!("invalid abundance '{}'", field.trim()),
            })?;
            if value != 0.0 {
                row.push((column, value));
            }
            columns += 1;
        }
        if columns != feature_ids.len() {
            return Err(TableReadError::Parse {
                line: line_no,
                message: format!(
                    "expected {} abundance values, found {columns}",
                    feature_ids.len()
                ),
            });
        }

        sample_ids.push(sample_id.to_string());
        rows.push(row);
    }

    Ok(FeatureTable::new(sample_ids, feature_ids, rows)?)
}

/// Write a labeled square matrix as TSV to a file.
/// If `path` ends with `.gz`, the output is gzip-compressed.
pub fn write_matrix_tsv<P: AsRef<Path>>(path: P, matrix: &DistanceMatrix) -> io::Result<()> {
    write_labeled_rows(path, matrix.sample_ids(), matrix.sample_ids(), matrix.rows())
}

/// Write a one-vs-all result as a single labeled row, with the full sample
/// ordering as the header.
pub fn write_row_tsv<P: AsRef<Path>>(
    path: P,
    sample_ids: &[String],
    reference: &str,
    row: &[f64],
) -> io::Result<()> {
    let row_id = reference.to_string();
    let values = row.to_vec();
    write_labeled_rows(
        path,
        sample_ids,
        std::slice::from_ref(&row_id),
        std::slice::from_ref(&values),
    )
}

fn write_labeled_rows<P: AsRef<Path>>(
    path: P,
    column_ids: &[String],
    row_ids: &[String],
    rows: &[Vec<f64>],
) -> io::Result<()> {
    use std::fs::File;
    use std::io::BufWriter;

    let p = path.as_ref();
    let is_gz = p.to_string_lossy().ends_with(".gz");

    let mut out: Box<dyn Write> = if is_gz {
        let f = File::create(p)?;
        let enc = GzEncoder::new(f, Compression::default());
        Box::new(BufWriter::new(enc))
    } else {
        Box::new(BufWriter::new(File::create(p)?))
    };

    // Header row
    for name in column_ids {
        write!(&mut out, "\t{name}")?;
    }
    writeln!(&mut out)?;

    // Rows
    for (id, row) in row_ids.iter().zip(rows) {
        write!(&mut out, "{id}")?;
        for val in row {
            write!(&mut out, "\t{val}")?;
        }
        writeln!(&mut out)?;
    }

    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("unifrac-io-test-{name}"))
    }

    #[test]
    fn table_round_trips_through_tsv() {
        let path = temp_path("table.tsv");
        fs::write(
            &path,
            "\tA\tB\tC\nS1\t1\t0\t2.5\nS2\t0\t0\t0\n",
        )
        .unwrap();

        let table = read_table_tsv(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(table.sample_ids(), &["S1".to_string(), "S2".to_string()]);
        assert_eq!(table.n_features(), 3);
        assert_eq!(table.row(0), &[(0, 1.0), (2, 2.5)]);
        assert!(table.row(1).is_empty());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let path = temp_path("ragged.tsv");
        fs::write(&path, "\tA\tB\nS1\t1\n").unwrap();

        let err = read_table_tsv(&path).unwrap_err();
        fs::remove_file(&path).unwrap();

        assert!(matches!(err, TableReadError::Parse { line: 2, .. }));
    }

    #[test]
    fn matrix_writes_labeled_tsv() {
        let path = temp_path("matrix.tsv");
        let matrix = DistanceMatrix::from_pairs(
            vec!["S1".to_string(), "S2".to_string()],
            vec![(0, 1, 0.5)],
        );

        write_matrix_tsv(&path, &matrix).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(written, "\tS1\tS2\nS1\t0\t0.5\nS2\t0.5\t0\n");
    }
}
