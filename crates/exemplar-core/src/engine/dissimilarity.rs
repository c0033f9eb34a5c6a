//! Dissimilarity input for the factor graph.
//!
//! The matrix is validated once at construction and shared read-only by
//! every factor for the lifetime of a run; the engine never mutates it.

use crate::engine::errors::PropagationError;

/// An immutable M×N dissimilarity matrix in row-major storage.
///
/// Rows index points, columns index candidate exemplars. Entries must be
/// finite; the message updates negate them where a similarity term is
/// needed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DissimilarityMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl DissimilarityMatrix {
    /// Builds a matrix from row slices.
    ///
    /// Rejects empty input and ragged rows with a validation error and
    /// non-finite entries with a numerical error.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, PropagationError> {
        let row_count = rows.len();
        let col_count = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(row_count * col_count);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != col_count {
                return Err(PropagationError::Validation(format!(
                    "ragged dissimilarity input: row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    col_count
                )));
            }
            data.extend_from_slice(row);
        }
        Self::from_flat(data, row_count, col_count)
    }

    /// Builds a matrix from a row-major buffer of `rows * cols` entries.
    pub fn from_flat(
        data: Vec<f64>,
        rows: usize,
        cols: usize,
    ) -> Result<Self, PropagationError> {
        if rows == 0 || cols == 0 {
            return Err(PropagationError::Validation(
                "dissimilarity matrix must have at least one row and one column".into(),
            ));
        }
        if data.len() != rows * cols {
            return Err(PropagationError::Validation(format!(
                "dissimilarity buffer holds {} entries, expected {} ({}x{})",
                data.len(),
                rows * cols,
                rows,
                cols
            )));
        }
        if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
            return Err(PropagationError::Numerical(format!(
                "dissimilarity entry ({}, {}) is not finite",
                pos / cols,
                pos % cols
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Number of points (rows).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of candidate exemplars (columns).
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Dissimilarity between point `row` and candidate `col`.
    ///
    /// # Panics
    ///
    /// Panics if `row` or `col` is out of range.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        assert!(row < self.rows && col < self.cols, "index out of range");
        self.data[row * self.cols + col]
    }
}
