//! Quadrant gates.
//!
//! A quadrant gate cuts its dimensions with one or more dividers and names
//! the resulting regions. Each quadrant declares a location relative to each
//! divider; the two split points straddling that location become the quadrant's
//! half-open `[min, max)` range along the divider's dimension.

use crate::error::{GatingError, Result};
use crate::rectangle::RangeBound;
use crate::types::{Dimension, Divider, Quadrant};
use itertools::Itertools;
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Resolved range of one quadrant along one divider
#[derive(Debug, Clone, PartialEq)]
pub struct QuadrantBound {
    pub divider_id: Arc<str>,
    pub dimension: Dimension,
    pub location: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl QuadrantBound {
    pub fn range(&self) -> RangeBound {
        RangeBound::new(self.min, self.max)
    }
}

/// Divider values as a sorted, deduplicated set
pub fn sorted_split_points(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .copied()
        .sorted_by(f64::total_cmp)
        .dedup()
        .collect()
}

/// Bounds straddling `location`: the largest split point `<= location` and the
/// smallest split point `> location`
pub fn straddling_bounds(split_points: &[f64], location: f64) -> (Option<f64>, Option<f64>) {
    let idx = split_points.partition_point(|&v| v <= location);
    let min = idx.checked_sub(1).map(|i| split_points[i]);
    let max = split_points.get(idx).copied();
    (min, max)
}

/// Derive the per-divider bounds of one quadrant
pub fn derive_bounds(
    gate_id: &str,
    dividers: &[Divider],
    quadrant: &Quadrant,
) -> Result<Vec<QuadrantBound>> {
    quadrant
        .positions
        .iter()
        .map(|position| {
            let divider = dividers
                .iter()
                .find(|d| d.id == position.divider_ref)
                .ok_or_else(|| {
                    GatingError::invalid_geometry(
                        gate_id,
                        format!(
                            "Quadrant '{}' references unknown divider '{}'",
                            quadrant.id, position.divider_ref
                        ),
                    )
                })?;
            let split_points = sorted_split_points(&divider.values);
            let (min, max) = straddling_bounds(&split_points, position.location);
            Ok(QuadrantBound {
                divider_id: divider.id.clone(),
                dimension: divider.dimension.clone(),
                location: position.location,
                min,
                max,
            })
        })
        .collect()
}

pub(crate) fn validate(gate_id: &str, dividers: &[Divider], quadrants: &[Quadrant]) -> Result<()> {
    if dividers.is_empty() {
        return Err(GatingError::invalid_geometry(
            gate_id,
            "Quadrant gate requires at least one divider",
        ));
    }
    if quadrants.is_empty() {
        return Err(GatingError::invalid_geometry(
            gate_id,
            "Quadrant gate requires at least one quadrant",
        ));
    }

    let mut divider_ids = FxHashSet::default();
    for divider in dividers {
        if !divider_ids.insert(divider.id.clone()) {
            return Err(GatingError::invalid_geometry(
                gate_id,
                format!("Duplicate divider id '{}'", divider.id),
            ));
        }
        if divider.values.is_empty() || divider.values.iter().any(|v| !v.is_finite()) {
            return Err(GatingError::invalid_geometry(
                gate_id,
                format!("Divider '{}' requires finite split values", divider.id),
            ));
        }
    }

    let mut quadrant_ids = FxHashSet::default();
    for quadrant in quadrants {
        if !quadrant_ids.insert(quadrant.id.clone()) {
            return Err(GatingError::invalid_geometry(
                gate_id,
                format!("Duplicate quadrant id '{}'", quadrant.id),
            ));
        }
        if quadrant.positions.is_empty() {
            return Err(GatingError::invalid_geometry(
                gate_id,
                format!("Quadrant '{}' declares no positions", quadrant.id),
            ));
        }
        if let Some(dup) = quadrant.positions.iter().map(|p| &p.divider_ref).duplicates().next() {
            return Err(GatingError::invalid_geometry(
                gate_id,
                format!("Quadrant '{}' references divider '{dup}' twice", quadrant.id),
            ));
        }
        if quadrant.positions.iter().any(|p| !p.location.is_finite()) {
            return Err(GatingError::invalid_geometry(
                gate_id,
                format!("Quadrant '{}' has a non-finite location", quadrant.id),
            ));
        }
        derive_bounds(gate_id, dividers, quadrant)?;
    }

    Ok(())
}

/// One mask per quadrant, in declaration order.
///
/// `divider_columns[i]` holds the resolved values for `dividers[i].dimension`.
pub fn quadrant_masks(
    gate_id: &str,
    dividers: &[Divider],
    quadrants: &[Quadrant],
    divider_columns: &[&[f64]],
) -> Result<Vec<(Arc<str>, Vec<bool>)>> {
    let n_events = divider_columns.first().map_or(0, |c| c.len());

    quadrants
        .iter()
        .map(|quadrant| {
            let bounds = derive_bounds(gate_id, dividers, quadrant)?;
            let mut mask = vec![true; n_events];
            for bound in &bounds {
                let column_idx = dividers
                    .iter()
                    .position(|d| d.id == bound.divider_id)
                    .ok_or_else(|| {
                        GatingError::invalid_geometry(
                            gate_id,
                            format!("Unknown divider '{}'", bound.divider_id),
                        )
                    })?;
                let range = bound.range();
                for (inside, &value) in mask.iter_mut().zip(divider_columns[column_idx]) {
                    *inside = *inside && range.contains(value);
                }
            }
            Ok((quadrant.id.clone(), mask))
        })
        .collect()
}
