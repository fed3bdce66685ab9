use crate::error::{GatingError, Result};
use crate::matrix::MatrixOps;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Compensation reference meaning "leave the data as acquired"
pub const UNCOMPENSATED: &str = "uncompensated";
/// Compensation reference meaning "use the spillover carried by the sample"
pub const SAMPLE_SPILLOVER: &str = "FCS";

/// Spillover matrix used to unmix fluorescence overlap between detectors
///
/// Row `i` of the spillover holds the fraction of detector `i`'s signal seen in
/// every other detector. Compensation multiplies the detector columns of the
/// event matrix by the inverse spillover. The inverse is computed when the
/// matrix is built, so an invalid matrix never reaches evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MatrixDefinition", into = "MatrixDefinition")]
pub struct Matrix {
    id: Arc<str>,
    detectors: Vec<Arc<str>>,
    spillover: Array2<f64>,
    inverse: Array2<f64>,
}

/// Serialized form of a [`Matrix`]: spillover as a list of rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixDefinition {
    pub id: Arc<str>,
    pub detectors: Vec<Arc<str>>,
    pub spillover: Vec<Vec<f64>>,
}

impl Matrix {
    pub fn new(
        id: impl Into<Arc<str>>,
        detectors: Vec<Arc<str>>,
        spillover: Array2<f64>,
    ) -> Result<Self> {
        let id = id.into();
        let n = detectors.len();
        if n == 0 {
            return Err(GatingError::invalid_matrix(id, "no detectors"));
        }
        if spillover.dim() != (n, n) {
            return Err(GatingError::invalid_matrix(
                id,
                format!(
                    "spillover is {}x{} but {} detectors are listed",
                    spillover.nrows(),
                    spillover.ncols(),
                    n
                ),
            ));
        }
        let mut seen = rustc_hash::FxHashSet::default();
        if let Some(dup) = detectors.iter().find(|d| !seen.insert(*d)) {
            return Err(GatingError::invalid_matrix(
                id,
                format!("detector '{dup}' is listed twice"),
            ));
        }
        let inverse = MatrixOps::invert_matrix(&spillover).map_err(|e| {
            GatingError::invalid_matrix(id.clone(), format!("spillover is not invertible: {e}"))
        })?;

        Ok(Self {
            id,
            detectors,
            spillover,
            inverse,
        })
    }

    /// Build from a list of rows
    pub fn from_rows<S: Into<Arc<str>>>(
        id: impl Into<Arc<str>>,
        detectors: impl IntoIterator<Item = S>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let id = id.into();
        let detectors: Vec<Arc<str>> = detectors.into_iter().map(Into::into).collect();
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, |r| r.len());
        if rows.iter().any(|r| r.len() != n_cols) {
            return Err(GatingError::invalid_matrix(id, "spillover rows differ in length"));
        }
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let spillover = Array2::from_shape_vec((n_rows, n_cols), flat)
            .map_err(|e| GatingError::invalid_matrix(id.clone(), e.to_string()))?;
        Self::new(id, detectors, spillover)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn detectors(&self) -> &[Arc<str>] {
        &self.detectors
    }

    pub fn spillover(&self) -> &Array2<f64> {
        &self.spillover
    }

    pub fn inverse(&self) -> &Array2<f64> {
        &self.inverse
    }

    /// Return a copy of the same matrix under another id
    pub fn with_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.id = id.into();
        self
    }

    /// Compensate an event matrix `[events × channels]`.
    ///
    /// Every detector must be one of `channel_labels`. Columns that are not
    /// detectors are copied through unchanged.
    pub fn apply(&self, events: ArrayView2<'_, f64>, channel_labels: &[String]) -> Result<Array2<f64>> {
        let columns = self
            .detectors
            .iter()
            .map(|detector| {
                channel_labels
                    .iter()
                    .position(|label| label.as_str() == detector.as_ref())
                    .ok_or_else(|| {
                        GatingError::unknown_channel(
                            detector.clone(),
                            format!("compensation matrix '{}'", self.id),
                        )
                    })
            })
            .collect::<Result<Vec<usize>>>()?;

        Ok(MatrixOps::compensate_columns(events, &columns, &self.inverse))
    }
}

impl TryFrom<MatrixDefinition> for Matrix {
    type Error = GatingError;

    fn try_from(def: MatrixDefinition) -> Result<Self> {
        Matrix::from_rows(def.id, def.detectors, def.spillover)
    }
}

impl From<Matrix> for MatrixDefinition {
    fn from(matrix: Matrix) -> Self {
        let spillover = matrix
            .spillover
            .rows()
            .into_iter()
            .map(|row| row.to_vec())
            .collect();
        Self {
            id: matrix.id,
            detectors: matrix.detectors,
            spillover,
        }
    }
}
