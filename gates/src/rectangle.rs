use crate::error::{GatingError, Result};
use crate::types::Dimension;

/// Half-open range along one dimension: `min <= value < max`
///
/// A missing bound is unbounded on that side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeBound {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl RangeBound {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value < max)
    }
}

/// Check that a rectangle gate has at least one dimension and every dimension is bounded
pub(crate) fn validate(gate_id: &str, dimensions: &[Dimension]) -> Result<()> {
    range_bounds(gate_id, dimensions).map(|_| ())
}

/// Extract one [`RangeBound`] per dimension
pub fn range_bounds(gate_id: &str, dimensions: &[Dimension]) -> Result<Vec<RangeBound>> {
    if dimensions.is_empty() {
        return Err(GatingError::invalid_geometry(
            gate_id,
            "Rectangle gate requires at least one dimension",
        ));
    }

    dimensions
        .iter()
        .map(|dim| {
            if dim.min.is_none() && dim.max.is_none() {
                return Err(GatingError::MissingBounds {
                    gate_id: gate_id.into(),
                    channel: dim.channel.clone(),
                });
            }
            Ok(RangeBound::new(dim.min, dim.max))
        })
        .collect()
}

/// Membership mask for a hyper-rectangle.
///
/// `columns[i]` holds the resolved values for `bounds[i]`. An event is inside
/// when it falls in every range.
pub fn rectangle_mask(bounds: &[RangeBound], columns: &[&[f64]]) -> Vec<bool> {
    let n_events = columns.first().map_or(0, |c| c.len());
    let mut mask = vec![true; n_events];

    for (bound, column) in bounds.iter().zip(columns) {
        for (inside, &value) in mask.iter_mut().zip(column.iter()) {
            *inside = *inside && bound.contains(value);
        }
    }

    mask
}
