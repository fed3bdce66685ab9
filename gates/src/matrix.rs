//! Matrix operations for compensation and ellipsoid gates
//!
//! Inversion and factorisation go through `ndarray-linalg` (LAPACK); this
//! module adds the singularity and symmetry checks gating needs on top.

use anyhow::{Result, anyhow};
use ndarray::{Array2, ArrayView2, Axis};
use ndarray_linalg::{Cholesky, Inverse, UPLO};

/// Reciprocal condition estimate below which a matrix is treated as singular
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Matrix operations for compensation and covariance handling
pub struct MatrixOps;

impl MatrixOps {
    /// Invert a square matrix using ndarray-linalg.
    ///
    /// Fails when the matrix is not square, contains non-finite values, or is
    /// singular (including numerically singular matrices LAPACK still inverts).
    pub fn invert_matrix(matrix: &Array2<f64>) -> Result<Array2<f64>> {
        Self::check_square(matrix)?;
        let inverse = matrix
            .inv()
            .map_err(|e| anyhow!("Failed to invert matrix: {:?}", e))?;

        let norm = Self::max_row_sum(matrix.view());
        let inverse_norm = Self::max_row_sum(inverse.view());
        if !inverse_norm.is_finite() || norm * inverse_norm * SINGULAR_TOLERANCE > 1.0 {
            return Err(anyhow!("Matrix is numerically singular"));
        }
        Ok(inverse)
    }

    /// Lower-triangular Cholesky factor `L` with `L · Lᵀ = A`.
    ///
    /// Fails unless the matrix is square, symmetric and positive-definite.
    pub fn cholesky(matrix: &Array2<f64>) -> Result<Array2<f64>> {
        Self::check_square(matrix)?;
        let scale = matrix.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let n = matrix.nrows();
        for i in 0..n {
            for j in (i + 1)..n {
                if (matrix[[i, j]] - matrix[[j, i]]).abs() > 1e-9 * scale.max(1.0) {
                    return Err(anyhow!("Matrix is not symmetric at ({i}, {j})"));
                }
            }
        }
        let lower = matrix
            .cholesky(UPLO::Lower)
            .map_err(|e| anyhow!("Matrix is not positive-definite: {:?}", e))?;

        // potrf accepts diagonals that are positive only by rounding
        if lower.diag().iter().any(|d| d * d <= SINGULAR_TOLERANCE * scale) {
            return Err(anyhow!("Matrix is not positive-definite"));
        }
        Ok(lower)
    }

    #[inline]
    pub fn is_positive_definite(matrix: &Array2<f64>) -> bool {
        Self::cholesky(matrix).is_ok()
    }

    fn check_square(matrix: &Array2<f64>) -> Result<()> {
        let (rows, cols) = matrix.dim();
        if rows == 0 || rows != cols {
            return Err(anyhow!("Expected a non-empty square matrix, got {rows}x{cols}"));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("Matrix contains non-finite values"));
        }
        Ok(())
    }

    /// Infinity norm (largest absolute row sum)
    fn max_row_sum(matrix: ArrayView2<'_, f64>) -> f64 {
        matrix
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max)
    }

    /// Compensate selected columns of an event matrix.
    ///
    /// Input: events `[n_events × n_channels]`, the column index of each detector,
    /// and the inverted spillover `[n_detectors × n_detectors]`.
    /// Output: a copy of `events` where the detector columns are replaced by
    /// `events[:, detectors] · inverse`.
    pub fn compensate_columns(
        events: ArrayView2<'_, f64>,
        detector_columns: &[usize],
        inverse: &Array2<f64>,
    ) -> Array2<f64> {
        let selected = events.select(Axis(1), detector_columns);
        let compensated = selected.dot(inverse);

        let mut result = events.to_owned();
        for (j, &col) in detector_columns.iter().enumerate() {
            result.column_mut(col).assign(&compensated.column(j));
        }
        result
    }
}
