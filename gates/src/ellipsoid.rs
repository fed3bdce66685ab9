use crate::error::{GatingError, Result};
use crate::matrix::MatrixOps;
use ndarray::Array2;

/// Validated ellipsoid parameters with the inverse covariance precomputed
#[derive(Debug, Clone)]
pub struct EllipsoidGeometry {
    pub center: Vec<f64>,
    pub inverse_covariance: Array2<f64>,
    pub distance_square: f64,
}

impl EllipsoidGeometry {
    /// Validate the definition and invert its covariance.
    ///
    /// The covariance must be square, match the dimension count and be
    /// positive-definite.
    pub fn build(
        gate_id: &str,
        n_dimensions: usize,
        center: &[f64],
        covariance: &[Vec<f64>],
        distance_square: f64,
    ) -> Result<Self> {
        if n_dimensions < 2 {
            return Err(GatingError::invalid_geometry(
                gate_id,
                format!("Ellipsoid gate requires at least 2 dimensions, got {n_dimensions}"),
            ));
        }
        if center.len() != n_dimensions {
            return Err(GatingError::invalid_geometry(
                gate_id,
                format!(
                    "Ellipsoid center has {} coordinates for {} dimensions",
                    center.len(),
                    n_dimensions
                ),
            ));
        }
        if covariance.len() != n_dimensions || covariance.iter().any(|row| row.len() != n_dimensions) {
            return Err(GatingError::invalid_geometry(
                gate_id,
                format!("Covariance matrix must be {n_dimensions}x{n_dimensions}"),
            ));
        }
        if !distance_square.is_finite() || distance_square <= 0.0 {
            return Err(GatingError::invalid_geometry(
                gate_id,
                format!("Distance square must be positive, got {distance_square}"),
            ));
        }

        let cov = Array2::from_shape_fn((n_dimensions, n_dimensions), |(i, j)| covariance[i][j]);
        if !MatrixOps::is_positive_definite(&cov) {
            return Err(GatingError::NonInvertibleCovariance {
                gate_id: gate_id.into(),
            });
        }
        let inverse_covariance =
            MatrixOps::invert_matrix(&cov).map_err(|_| GatingError::NonInvertibleCovariance {
                gate_id: gate_id.into(),
            })?;

        Ok(Self {
            center: center.to_vec(),
            inverse_covariance,
            distance_square,
        })
    }

    /// Squared Mahalanobis distance of `point` from the center
    pub fn mahalanobis_square(&self, point: &[f64]) -> f64 {
        let n = self.center.len();
        let mut total = 0.0;
        for i in 0..n {
            let di = point[i] - self.center[i];
            for j in 0..n {
                let dj = point[j] - self.center[j];
                total += di * self.inverse_covariance[[i, j]] * dj;
            }
        }
        total
    }

    #[inline]
    pub fn contains(&self, point: &[f64]) -> bool {
        self.mahalanobis_square(point) <= self.distance_square
    }

    /// Membership mask over one resolved column per dimension
    pub fn mask(&self, columns: &[&[f64]]) -> Vec<bool> {
        let n_events = columns.first().map_or(0, |c| c.len());
        let mut point = vec![0.0; columns.len()];

        (0..n_events)
            .map(|event| {
                for (coord, column) in point.iter_mut().zip(columns) {
                    *coord = column[event];
                }
                self.contains(&point)
            })
            .collect()
    }
}
