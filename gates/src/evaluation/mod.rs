//! Sample evaluation.
//!
//! This module turns a [`GatingStrategy`] and one sample's events into
//! [`GatingResults`]. Evaluation is single-threaded per sample and runs in
//! dependency order: a gate is evaluated once its parent and (for boolean gates)
//! every operand have been evaluated. Gates that are not ready are deferred to
//! the next pass; a pass that makes no progress means the remaining gates depend
//! on each other and the sample fails with [`GatingError::CyclicGateDependency`].
//!
//! Stored masks are each gate's own predicate over all events. Restricting a
//! population to its ancestors happens only when results are reported or queried.
//!
//! Dimension columns (after compensation and transformation) are resolved once
//! per evaluation through a [`DimensionCache`].

pub mod cache;

pub use cache::{DimensionCache, DimensionKey};

use crate::boolean;
use crate::compensation::SAMPLE_SPILLOVER;
use crate::ellipsoid::EllipsoidGeometry;
use crate::error::{GatingError, Result};
use crate::polygon::polygon_mask;
use crate::quadrant::quadrant_masks;
use crate::rectangle::{range_bounds, rectangle_mask};
use crate::results::{GatingResults, PopulationResult};
use crate::sample::SampleData;
use crate::strategy::{GateEntry, GatingStrategy};
use crate::transforms::Transformable;
use crate::types::{Dimension, GateKind, GatePath};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Evaluate a strategy against one sample.
///
/// With `gate_id` (and optionally the gate's full `gate_path` to disambiguate),
/// only that gate and the gates it transitively depends on are evaluated.
/// Otherwise every gate is evaluated.
///
/// Any error aborts the whole evaluation; no partial results are returned.
pub fn evaluate<S: SampleData + ?Sized>(
    strategy: &GatingStrategy,
    sample: &S,
    gate_id: Option<&str>,
    gate_path: Option<&GatePath>,
) -> Result<GatingResults> {
    evaluate_with(strategy, sample, gate_id, gate_path, false)
}

/// [`evaluate`] with per-gate `info` logging when `verbose` is set
pub fn evaluate_with<S: SampleData + ?Sized>(
    strategy: &GatingStrategy,
    sample: &S,
    gate_id: Option<&str>,
    gate_path: Option<&GatePath>,
    verbose: bool,
) -> Result<GatingResults> {
    let target = match (gate_id, gate_path) {
        (None, None) => None,
        (Some(id), path) => Some(resolve_target(strategy, id, path)?),
        (None, Some(path)) => Some(resolve_target(strategy, path.gate_id(), Some(path))?),
    };
    Evaluator::new(strategy, sample).verbose(verbose).run(target.as_ref())
}

/// Find the gate a target id names; quadrant ids select their quadrant gate
fn resolve_target(strategy: &GatingStrategy, gate_id: &str, gate_path: Option<&GatePath>) -> Result<GatePath> {
    match strategy.resolve_gate_path(gate_id, gate_path) {
        Err(GatingError::UnknownGate { .. }) => {
            let population = strategy
                .resolve_population(gate_id, gate_path)?
                .into_iter()
                .next()
                .ok_or_else(|| GatingError::unknown_gate(gate_id, gate_path))?;
            strategy
                .population_source(&population)
                .map(|src| strategy.entries()[src.entry].path.clone())
                .ok_or_else(|| GatingError::unknown_gate(gate_id, gate_path))
        }
        resolved => resolved,
    }
}

/// Evaluation of one strategy against one sample
pub struct Evaluator<'a, S: SampleData + ?Sized> {
    strategy: &'a GatingStrategy,
    sample: &'a S,
    verbose: bool,
    cache: DimensionCache,
}

impl<'a, S: SampleData + ?Sized> Evaluator<'a, S> {
    pub fn new(strategy: &'a GatingStrategy, sample: &'a S) -> Self {
        Self {
            strategy,
            sample,
            verbose: false,
            cache: DimensionCache::new(),
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Run the evaluation, optionally limited to the gate registered at
    /// `target` and its dependencies
    pub fn run(mut self, target: Option<&GatePath>) -> Result<GatingResults> {
        self.check_sample()?;
        let strategy = self.strategy;
        let sample_id: Arc<str> = self.sample.sample_id().into();
        let event_count = self.sample.event_count();

        let mut pending = match target {
            Some(path) => {
                let entry = strategy
                    .entry_index(path)
                    .ok_or_else(|| GatingError::unknown_gate(path.gate_id(), Some(path)))?;
                self.dependency_closure(entry)?
            }
            None => (0..strategy.entries().len()).collect(),
        };
        debug!(sample = %sample_id, gates = pending.len(), "Evaluation plan");

        let mut done: FxHashSet<usize> = FxHashSet::default();
        let mut populations: Vec<PopulationResult> = Vec::new();
        let mut computed: FxHashMap<GatePath, usize> = FxHashMap::default();

        while !pending.is_empty() {
            let mut deferred = Vec::new();

            for entry_idx in pending.iter().copied() {
                let ready = self
                    .dependencies(entry_idx)?
                    .iter()
                    .all(|dep| done.contains(dep));
                if !ready {
                    deferred.push(entry_idx);
                    continue;
                }

                let entry = &strategy.entries()[entry_idx];
                for (path, quadrant_parent, mask) in self.evaluate_gate(entry, &computed, &populations)? {
                    if self.verbose {
                        let inside = mask.iter().filter(|&&b| b).count();
                        info!(sample = %sample_id, gate_path = %path, events = inside, "Gated population");
                    }
                    computed.insert(path.clone(), populations.len());
                    populations.push(PopulationResult {
                        path,
                        gate_type: entry.gate.gate_type_name(),
                        quadrant_parent,
                        mask,
                    });
                }
                done.insert(entry_idx);
            }

            if deferred.len() == pending.len() {
                return Err(GatingError::CyclicGateDependency {
                    gates: deferred
                        .iter()
                        .map(|&i| strategy.entries()[i].path.clone())
                        .collect(),
                });
            }
            pending = deferred;
        }

        let (hits, misses) = self.cache.stats();
        debug!(sample = %sample_id, hits, misses, "Dimension cache");

        Ok(GatingResults::new(sample_id, event_count, populations))
    }

    fn check_sample(&self) -> Result<()> {
        let events = self.sample.raw_events();
        let labels = self.sample.channel_labels();
        if events.ncols() != labels.len() {
            return Err(GatingError::invalid_sample(
                self.sample.sample_id(),
                format!(
                    "event matrix has {} columns but {} channel labels",
                    events.ncols(),
                    labels.len()
                ),
            ));
        }
        Ok(())
    }

    /// Entries that must be evaluated before `entry_idx`: its parent's gate and
    /// the gates producing each boolean operand
    fn dependencies(&self, entry_idx: usize) -> Result<Vec<usize>> {
        let strategy = self.strategy;
        let entry = &strategy.entries()[entry_idx];
        let mut deps = Vec::new();

        if let Some(parent) = entry.path.parent() {
            let src = strategy.population_source(&parent).ok_or_else(|| GatingError::ParentNotFound {
                gate_id: entry.gate.id.clone(),
                parent_id: parent.gate_id().into(),
            })?;
            deps.push(src.entry);
        }

        if let GateKind::Boolean { operands, .. } = &entry.gate.kind {
            for operand in operands {
                let path = strategy.resolve_reference(&entry.gate.id, operand)?;
                let src = strategy.population_source(&path).ok_or_else(|| {
                    GatingError::UnresolvedGateReference {
                        gate_id: entry.gate.id.clone(),
                        reference: operand.to_string(),
                    }
                })?;
                deps.push(src.entry);
            }
        }

        Ok(deps)
    }

    /// The target plus everything it transitively depends on, in insertion order
    fn dependency_closure(&self, target: usize) -> Result<Vec<usize>> {
        let mut selected = FxHashSet::default();
        let mut stack = vec![target];

        while let Some(entry_idx) = stack.pop() {
            if selected.insert(entry_idx) {
                stack.extend(self.dependencies(entry_idx)?);
            }
        }

        let mut ordered: Vec<usize> = selected.into_iter().collect();
        ordered.sort_unstable();
        Ok(ordered)
    }

    /// Compensated, transformed values of one dimension
    fn resolve(&mut self, dimension: &Dimension) -> Result<Arc<Vec<f64>>> {
        let key = DimensionKey::new(dimension);
        if let Some(column) = self.cache.get_column(&key) {
            return Ok(column);
        }

        let channel_idx = self.sample.channel_index(&dimension.channel).ok_or_else(|| {
            GatingError::unknown_channel(
                dimension.channel.clone(),
                format!("sample '{}'", self.sample.sample_id()),
            )
        })?;

        let mut column = match &key.compensation_ref {
            None => self.sample.raw_events().column(channel_idx).to_vec(),
            Some(reference) => self.compensated(reference)?.column(channel_idx).to_vec(),
        };

        if let Some(reference) = &dimension.transform_ref {
            let transform = self
                .strategy
                .get_transform(reference)
                .ok_or_else(|| GatingError::UnknownTransformRef {
                    reference: reference.clone(),
                })?;
            column = transform.apply(&column);
        }

        Ok(self.cache.insert_column(key, column))
    }

    fn compensated(&mut self, reference: &Arc<str>) -> Result<Arc<ndarray::Array2<f64>>> {
        if let Some(events) = self.cache.get_compensated(reference) {
            return Ok(events);
        }

        let matrix = if reference.as_ref() == SAMPLE_SPILLOVER {
            self.sample.spillover()
        } else {
            self.strategy.get_comp_matrix(reference)
        }
        .ok_or_else(|| GatingError::UnknownCompensationRef {
            reference: reference.clone(),
        })?;

        debug!(sample = self.sample.sample_id(), matrix = matrix.id(), "Compensating events");
        let events = matrix.apply(self.sample.raw_events(), self.sample.channel_labels())?;
        Ok(self.cache.insert_compensated(reference.clone(), events))
    }

    fn resolve_all(&mut self, dimensions: &[Dimension]) -> Result<Vec<Arc<Vec<f64>>>> {
        dimensions.iter().map(|d| self.resolve(d)).collect()
    }

    /// Masks produced by one gate: one for most gates, one per quadrant for quadrant gates
    fn evaluate_gate(
        &mut self,
        entry: &GateEntry,
        computed: &FxHashMap<GatePath, usize>,
        populations: &[PopulationResult],
    ) -> Result<Vec<(GatePath, Option<Arc<str>>, Vec<bool>)>> {
        let gate_id = entry.gate.id.as_ref();
        let n_events = self.sample.event_count();

        let mask = match &entry.gate.kind {
            GateKind::Rectangle { dimensions } => {
                let bounds = range_bounds(gate_id, dimensions)?;
                let columns = self.resolve_all(dimensions)?;
                rectangle_mask(&bounds, &as_slices(&columns))
            }
            GateKind::Polygon {
                dimensions,
                vertices,
            } => {
                let columns = self.resolve_all(dimensions)?;
                polygon_mask(vertices, &columns[0], &columns[1])
            }
            GateKind::Ellipsoid {
                dimensions,
                center,
                covariance,
                distance_square,
            } => {
                let geometry = EllipsoidGeometry::build(
                    gate_id,
                    dimensions.len(),
                    center,
                    covariance,
                    *distance_square,
                )?;
                let columns = self.resolve_all(dimensions)?;
                geometry.mask(&as_slices(&columns))
            }
            GateKind::Quadrant {
                dividers,
                quadrants,
            } => {
                let columns = dividers
                    .iter()
                    .map(|d| self.resolve(&d.dimension))
                    .collect::<Result<Vec<_>>>()?;
                let masks = quadrant_masks(gate_id, dividers, quadrants, &as_slices(&columns))?;
                return Ok(masks
                    .into_iter()
                    .map(|(quadrant_id, mask)| (entry.path.sibling(quadrant_id), Some(entry.gate.id.clone()), mask))
                    .collect());
            }
            GateKind::Boolean {
                operation,
                operands,
            } => {
                let resolved = operands
                    .iter()
                    .map(|operand| {
                        let path = self.strategy.resolve_reference(gate_id, operand)?;
                        let idx = computed.get(&path).ok_or_else(|| {
                            GatingError::UnresolvedGateReference {
                                gate_id: entry.gate.id.clone(),
                                reference: operand.to_string(),
                            }
                        })?;
                        Ok((populations[*idx].mask.as_slice(), operand.complement))
                    })
                    .collect::<Result<Vec<_>>>()?;
                boolean::combine(*operation, &resolved, n_events)
            }
        };

        Ok(vec![(entry.path.clone(), None, mask)])
    }
}

fn as_slices(columns: &[Arc<Vec<f64>>]) -> Vec<&[f64]> {
    columns.iter().map(|c| c.as_slice()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compensation::Matrix;
    use crate::sample::Sample;
    use crate::transforms::Transform;
    use crate::types::{BooleanOperation, Gate, GateReference};

    fn sample() -> Sample {
        Sample::from_columns(
            "s1",
            vec![("X", vec![5.0, 15.0, 5.0, 5.0]), ("Y", vec![5.0, 5.0, 5.0, 50.0])],
        )
        .expect("valid sample")
    }

    fn r_and_p() -> GatingStrategy {
        let mut s = GatingStrategy::new();
        s.add_gate(
            Gate::rectangle("R", None, [Dimension::new("X").with_min(0.0).with_max(10.0)]),
            None,
        )
        .expect("add R");
        s.add_gate(
            Gate::polygon(
                "P",
                Some("R"),
                [Dimension::new("X"), Dimension::new("Y")],
                vec![(0.0, 0.0), (10.0, 0.0), (5.0, 10.0)],
            ),
            None,
        )
        .expect("add P");
        s
    }

    #[test]
    fn test_stored_masks_are_unrestricted() {
        let results = evaluate(&r_and_p(), &sample(), None, None).expect("evaluation");
        assert_eq!(results.get_mask("R", None).expect("R"), &[true, false, true, true]);
        assert_eq!(results.get_mask("P", None).expect("P"), &[true, false, true, false]);
    }

    #[test]
    fn test_report_count_uses_parent_intersection() {
        let results = evaluate(&r_and_p(), &sample(), None, None).expect("evaluation");
        assert_eq!(results.get_mask("P", None).expect("P"), &[true, false, true, false]);
        assert_eq!(results.get_count("R", None).expect("R"), 3);
        assert_eq!(results.get_count("P", None).expect("P"), 2);
        assert_eq!(
            results.get_hierarchy_mask("P", None).expect("P"),
            vec![true, false, true, false]
        );

        // R narrowed to [0, 5) excludes every event; P's stored mask is unchanged
        let mut narrow = GatingStrategy::new();
        narrow
            .add_gate(
                Gate::rectangle("R", None, [Dimension::new("X").with_min(0.0).with_max(5.0)]),
                None,
            )
            .expect("add R");
        for entry in r_and_p().entries().iter().skip(1) {
            narrow.add_gate(entry.gate.clone(), None).expect("add P");
        }
        let results = evaluate(&narrow, &sample(), None, None).expect("evaluation");
        assert_eq!(results.get_mask("R", None).expect("R"), &[false, false, false, false]);
        assert_eq!(results.get_mask("P", None).expect("P"), &[true, false, true, false]);
        assert_eq!(results.get_count("P", None).expect("P"), 0);
        assert_eq!(results.get_relative_percent("P", None).expect("P"), 0.0);
        let p_row = &results.report().rows()[1];
        assert_eq!(p_row.gate_path.to_string(), "/R/P");
        assert_eq!(p_row.count, 0);
    }

    #[test]
    fn test_run_rejects_unregistered_target() {
        let s = r_and_p();
        let missing = GatePath::root("R").child("missing");
        assert!(matches!(
            Evaluator::new(&s, &sample()).run(Some(&missing)),
            Err(GatingError::UnknownGate { .. })
        ));

        let p = GatePath::root("R").child("P");
        let results = Evaluator::new(&s, &sample()).run(Some(&p)).expect("evaluation");
        assert_eq!(results.get_count("P", None).expect("P"), 2);
    }

    #[test]
    fn test_target_evaluates_dependencies_only() {
        let mut s = r_and_p();
        s.add_gate(
            Gate::rectangle("other", None, [Dimension::new("Y").with_max(1.0)]),
            None,
        )
        .expect("add");

        let results = evaluate(&s, &sample(), Some("P"), None).expect("evaluation");
        let paths: Vec<String> = results.gate_paths().map(|p| p.to_string()).collect();
        assert_eq!(paths, vec!["/R", "/R/P"]);
    }

    #[test]
    fn test_unknown_channel() {
        let mut s = GatingStrategy::new();
        s.add_gate(Gate::rectangle("R", None, [Dimension::new("Z").with_min(0.0)]), None)
            .expect("add");
        assert!(matches!(
            evaluate(&s, &sample(), None, None),
            Err(GatingError::UnknownChannel { .. })
        ));
    }

    #[test]
    fn test_unknown_references() {
        let mut s = GatingStrategy::new();
        s.add_gate(
            Gate::rectangle(
                "R",
                None,
                [Dimension::new("X").with_min(0.0).with_transform("missing")],
            ),
            None,
        )
        .expect("add");
        assert!(matches!(
            evaluate(&s, &sample(), None, None),
            Err(GatingError::UnknownTransformRef { .. })
        ));

        let mut s = GatingStrategy::new();
        s.add_gate(
            Gate::rectangle("R", None, [Dimension::new("X").with_min(0.0).with_compensation("FCS")]),
            None,
        )
        .expect("add");
        assert!(matches!(
            evaluate(&s, &sample(), None, None),
            Err(GatingError::UnknownCompensationRef { .. })
        ));
    }

    #[test]
    fn test_compensation_then_transform() {
        let mut s = GatingStrategy::new();
        s.add_comp_matrix(
            Matrix::from_rows("spill", ["X", "Y"], vec![vec![1.0, 0.5], vec![0.0, 1.0]]).expect("matrix"),
        )
        .expect("add");
        s.add_transform("half", Transform::Linear { t: 2.0, a: 0.0 }).expect("add");
        // compensated Y = Y - 0.5 X, then halved
        s.add_gate(
            Gate::rectangle(
                "R",
                None,
                [Dimension::new("Y")
                    .with_compensation("spill")
                    .with_transform("half")
                    .with_min(0.0)
                    .with_max(1.5)],
            ),
            None,
        )
        .expect("add");

        // Y' = [2.5, -2.5, 2.5, 47.5] -> halved [1.25, -1.25, 1.25, 23.75]
        let results = evaluate(&s, &sample(), None, None).expect("evaluation");
        assert_eq!(results.get_mask("R", None).expect("R"), &[true, false, true, false]);
    }

    #[test]
    fn test_sample_spillover_reference() {
        let spill = Matrix::from_rows("acquired", ["X", "Y"], vec![vec![1.0, 0.5], vec![0.0, 1.0]])
            .expect("matrix");
        let sample = sample().with_spillover(spill);
        let mut s = GatingStrategy::new();
        s.add_gate(
            Gate::rectangle(
                "R",
                None,
                [Dimension::new("Y").with_compensation("FCS").with_max(0.0)],
            ),
            None,
        )
        .expect("add");

        let results = evaluate(&s, &sample, None, None).expect("evaluation");
        assert_eq!(results.get_mask("R", None).expect("R"), &[false, true, false, false]);
    }

    #[test]
    fn test_boolean_cycle_detected() {
        let mut s = GatingStrategy::new();
        s.add_gate(
            Gate::boolean("A", None, BooleanOperation::Not, vec![GateReference::new("B")]),
            None,
        )
        .expect("add A");
        s.add_gate(
            Gate::boolean("B", None, BooleanOperation::Not, vec![GateReference::new("A")]),
            None,
        )
        .expect("add B");

        match evaluate(&s, &sample(), None, None) {
            Err(GatingError::CyclicGateDependency { gates }) => assert_eq!(gates.len(), 2),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_boolean_sees_unrestricted_masks() {
        let mut s = r_and_p();
        // P is restricted to R in reports, but NOT(P) must complement P's own mask
        s.add_gate(
            Gate::boolean("notP", None, BooleanOperation::Not, vec![GateReference::new("P")]),
            None,
        )
        .expect("add");
        let results = evaluate(&s, &sample(), None, None).expect("evaluation");
        assert_eq!(results.get_mask("notP", None).expect("notP"), &[false, true, false, true]);
    }

    #[test]
    fn test_unresolved_operand() {
        let mut s = GatingStrategy::new();
        s.add_gate(
            Gate::boolean("A", None, BooleanOperation::And, vec![GateReference::new("ghost")]),
            None,
        )
        .expect("add");
        assert!(matches!(
            evaluate(&s, &sample(), None, None),
            Err(GatingError::UnresolvedGateReference { .. })
        ));
    }

    #[test]
    fn test_sample_shape_checked() {
        struct Broken;
        impl SampleData for Broken {
            fn sample_id(&self) -> &str {
                "broken"
            }
            fn channel_labels(&self) -> &[String] {
                &[]
            }
            fn raw_events(&self) -> ndarray::ArrayView2<'_, f64> {
                ndarray::ArrayView2::from_shape((1, 1), &[1.0]).expect("1x1 view")
            }
        }
        assert!(matches!(
            evaluate(&r_and_p(), &Broken, None, None),
            Err(GatingError::InvalidSample { .. })
        ));
    }
}
