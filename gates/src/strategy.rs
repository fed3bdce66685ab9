//! Gating strategies.
//!
//! A [`GatingStrategy`] owns a set of gates keyed by [`GatePath`], plus the
//! transform and compensation registries their dimensions refer to. It is the
//! template that samples are evaluated against; [`GatingStrategy::for_sample`]
//! produces an independent per-sample copy for batch evaluation.

use crate::compensation::{Matrix, SAMPLE_SPILLOVER, UNCOMPENSATED};
use crate::error::{GatingError, Result};
use crate::evaluation::Evaluator;
use crate::hierarchy::GateHierarchy;
use crate::linking::GateLinks;
use crate::results::GatingResults;
use crate::sample::SampleData;
use crate::transforms::Transform;
use crate::types::{Gate, GateKind, GatePath, GateReference};
use itertools::Itertools;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

/// A gate together with the path it was registered under
#[derive(Debug, Clone)]
pub struct GateEntry {
    pub path: GatePath,
    pub gate: Gate,
}

/// Which gate produces a population, and which quadrant of it
#[derive(Debug, Clone)]
pub(crate) struct PopulationSource {
    pub entry: usize,
    pub quadrant: Option<Arc<str>>,
}

/// A gating strategy: gates, transforms and compensation matrices.
///
/// Gates must be added parent first. Every gate is keyed by its full
/// [`GatePath`]; the same gate id may appear under different parents, and any
/// lookup by bare id that matches more than one path is an
/// [`GatingError::AmbiguousGateId`] error.
///
/// Quadrant gates register one population per quadrant. The quadrant gate id
/// names the gate, the quadrant ids name populations, and children of a quadrant
/// use the quadrant id as their parent.
///
/// # Example
///
/// ```rust
/// use flow_gating::{Dimension, Gate, GatingStrategy};
///
/// let mut strategy = GatingStrategy::new();
/// strategy.add_gate(
///     Gate::rectangle("R", None, [Dimension::new("X").with_min(0.0).with_max(10.0)]),
///     None,
/// )?;
/// strategy.add_gate(
///     Gate::polygon(
///         "P",
///         Some("R"),
///         [Dimension::new("X"), Dimension::new("Y")],
///         vec![(0.0, 0.0), (10.0, 0.0), (5.0, 10.0)],
///     ),
///     None,
/// )?;
///
/// assert_eq!(strategy.get_root_gate_ids()[0].as_ref(), "R");
/// assert_eq!(strategy.find_gate_paths("P")[0].to_string(), "/R/P");
/// # Ok::<(), flow_gating::GatingError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct GatingStrategy {
    entries: Vec<GateEntry>,
    /// Gate path -> entry index
    index: FxHashMap<GatePath, usize>,
    /// Population path -> producing gate
    populations: FxHashMap<GatePath, PopulationSource>,
    hierarchy: GateHierarchy,
    transformations: FxHashMap<Arc<str>, Transform>,
    comp_matrices: FxHashMap<Arc<str>, Matrix>,
}

impl GatingStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a gate to the strategy
    ///
    /// Without an explicit `gate_path` the gate is placed under the single
    /// population whose id matches `gate.parent` (or at the root). An explicit
    /// path (ancestors plus the gate's own id) is required when the parent id
    /// appears under more than one path.
    ///
    /// Returns the path the gate was registered under.
    pub fn add_gate(&mut self, gate: Gate, gate_path: Option<GatePath>) -> Result<GatePath> {
        gate.validate()?;

        let path = match gate_path {
            Some(path) => self.check_explicit_path(&gate, path)?,
            None => self.derive_path(&gate)?,
        };

        let population_paths: Vec<(GatePath, Option<Arc<str>>)> = match &gate.kind {
            GateKind::Quadrant { quadrants, .. } => quadrants
                .iter()
                .map(|q| (path.sibling(q.id.clone()), Some(q.id.clone())))
                .collect(),
            _ => vec![(path.clone(), None)],
        };

        if self.index.contains_key(&path) || self.populations.contains_key(&path) {
            return Err(GatingError::DuplicateGatePath { path });
        }
        let is_quadrant = matches!(gate.kind, GateKind::Quadrant { .. });
        for (pop_path, _) in &population_paths {
            if (is_quadrant && pop_path == &path)
                || self.index.contains_key(pop_path)
                || self.populations.contains_key(pop_path)
            {
                return Err(GatingError::DuplicateGatePath {
                    path: pop_path.clone(),
                });
            }
        }
        if let Some(dup) = population_paths.iter().map(|(p, _)| p).duplicates().next() {
            return Err(GatingError::DuplicateGatePath { path: dup.clone() });
        }

        let entry = self.entries.len();
        for (pop_path, quadrant) in population_paths {
            self.hierarchy.add_node(pop_path.clone());
            self.populations
                .insert(pop_path, PopulationSource { entry, quadrant });
        }

        debug!(gate_path = %path, gate_type = gate.gate_type_name(), "Added gate");
        self.index.insert(path.clone(), entry);
        self.entries.push(GateEntry {
            path: path.clone(),
            gate,
        });
        Ok(path)
    }

    fn derive_path(&self, gate: &Gate) -> Result<GatePath> {
        let Some(parent_id) = &gate.parent else {
            return Ok(GatePath::root(gate.id.clone()));
        };

        let candidates = self.find_population_paths(parent_id);
        match candidates.as_slice() {
            [] => Err(GatingError::ParentNotFound {
                gate_id: gate.id.clone(),
                parent_id: parent_id.clone(),
            }),
            [parent] => Ok(parent.child(gate.id.clone())),
            _ => Err(GatingError::AmbiguousGateId {
                gate_id: parent_id.clone(),
                paths: candidates,
            }),
        }
    }

    fn check_explicit_path(&self, gate: &Gate, path: GatePath) -> Result<GatePath> {
        if path.gate_id() != gate.id.as_ref() {
            return Err(GatingError::invalid_geometry(
                gate.id.clone(),
                format!("gate path '{path}' does not end with the gate id"),
            ));
        }

        match (path.parent(), &gate.parent) {
            (None, None) => Ok(path),
            (Some(parent_path), Some(parent_id))
                if parent_path.gate_id() == parent_id.as_ref()
                    && self.populations.contains_key(&parent_path) =>
            {
                Ok(path)
            }
            (_, Some(parent_id)) => Err(GatingError::ParentNotFound {
                gate_id: gate.id.clone(),
                parent_id: parent_id.clone(),
            }),
            (Some(parent_path), None) => Err(GatingError::invalid_geometry(
                gate.id.clone(),
                format!("root-level gate given the nested path '{path}' (parent '{parent_path}')"),
            )),
        }
    }

    /// Register a transform under `transform_id`
    pub fn add_transform(&mut self, transform_id: impl Into<Arc<str>>, transform: Transform) -> Result<()> {
        let transform_id = transform_id.into();
        transform.validate(&transform_id)?;
        if self.transformations.contains_key(&transform_id) {
            return Err(GatingError::DuplicateRegistration {
                registry: "Transform",
                id: transform_id,
            });
        }
        self.transformations.insert(transform_id, transform);
        Ok(())
    }

    /// Register a compensation matrix under its own id
    pub fn add_comp_matrix(&mut self, matrix: Matrix) -> Result<()> {
        let id: Arc<str> = matrix.id().into();
        if id.as_ref() == SAMPLE_SPILLOVER || id.as_ref() == UNCOMPENSATED {
            return Err(GatingError::invalid_matrix(
                id,
                "this id is reserved for built-in compensation references",
            ));
        }
        if self.comp_matrices.contains_key(&id) {
            return Err(GatingError::DuplicateRegistration {
                registry: "Compensation matrix",
                id,
            });
        }
        self.comp_matrices.insert(id, matrix);
        Ok(())
    }

    pub fn get_transform(&self, transform_id: &str) -> Option<&Transform> {
        self.transformations.get(transform_id)
    }

    pub fn get_comp_matrix(&self, matrix_id: &str) -> Option<&Matrix> {
        self.comp_matrices.get(matrix_id)
    }

    /// Paths of all gates with the given id, in insertion order
    pub fn find_gate_paths(&self, gate_id: &str) -> Vec<GatePath> {
        self.entries
            .iter()
            .filter(|e| e.gate.id.as_ref() == gate_id)
            .map(|e| e.path.clone())
            .collect()
    }

    /// Paths of all populations with the given id, in insertion order
    ///
    /// Populations are every non-quadrant gate plus each quadrant of a quadrant gate.
    pub fn find_population_paths(&self, population_id: &str) -> Vec<GatePath> {
        self.hierarchy
            .nodes()
            .iter()
            .filter(|p| p.gate_id() == population_id)
            .cloned()
            .collect()
    }

    /// Resolve a gate id (and optional full path) to the path of a single gate
    pub fn resolve_gate_path(&self, gate_id: &str, gate_path: Option<&GatePath>) -> Result<GatePath> {
        if let Some(path) = gate_path {
            if path.gate_id() == gate_id && self.index.contains_key(path) {
                return Ok(path.clone());
            }
            return Err(GatingError::unknown_gate(gate_id, Some(path)));
        }

        let mut paths = self.find_gate_paths(gate_id);
        match paths.len() {
            0 => Err(GatingError::unknown_gate(gate_id, None)),
            1 => Ok(paths.remove(0)),
            _ => Err(GatingError::AmbiguousGateId {
                gate_id: gate_id.into(),
                paths,
            }),
        }
    }

    /// Resolve a boolean operand to the path of the population it names
    pub fn resolve_reference(&self, referencing_gate: &str, reference: &GateReference) -> Result<GatePath> {
        let unresolved = || GatingError::UnresolvedGateReference {
            gate_id: referencing_gate.into(),
            reference: reference.to_string(),
        };

        if let Some(path) = &reference.gate_path {
            if path.gate_id() == reference.gate_id.as_ref() && self.populations.contains_key(path) {
                return Ok(path.clone());
            }
            return Err(unresolved());
        }

        let mut paths = self.find_population_paths(&reference.gate_id);
        match paths.len() {
            0 => Err(unresolved()),
            1 => Ok(paths.remove(0)),
            _ => Err(GatingError::AmbiguousGateId {
                gate_id: reference.gate_id.clone(),
                paths,
            }),
        }
    }

    /// Get a gate by id, with an optional full path to disambiguate
    pub fn get_gate(&self, gate_id: &str, gate_path: Option<&GatePath>) -> Result<&Gate> {
        let path = self.resolve_gate_path(gate_id, gate_path)?;
        self.entry(&path)
            .map(|e| &e.gate)
            .ok_or_else(|| GatingError::unknown_gate(gate_id, Some(&path)))
    }

    /// Every gate as `(gate id, gate path)`, in insertion order
    pub fn get_gate_ids(&self) -> Vec<(Arc<str>, GatePath)> {
        self.entries
            .iter()
            .map(|e| (e.gate.id.clone(), e.path.clone()))
            .collect()
    }

    pub fn get_parent_gate_id(&self, gate_id: &str, gate_path: Option<&GatePath>) -> Result<Option<Arc<str>>> {
        Ok(self.get_gate(gate_id, gate_path)?.parent.clone())
    }

    /// Ids and paths of the gates directly below a gate.
    ///
    /// For a quadrant gate these are its quadrants. `gate_id` may also name a
    /// quadrant, in which case the gates using it as their parent are returned.
    pub fn get_child_gate_ids(
        &self,
        gate_id: &str,
        gate_path: Option<&GatePath>,
    ) -> Result<Vec<(Arc<str>, GatePath)>> {
        let populations: Vec<GatePath> = match self.resolve_gate_path(gate_id, gate_path) {
            Ok(path) => {
                let entry = self.entry(&path).ok_or_else(|| GatingError::unknown_gate(gate_id, Some(&path)))?;
                match &entry.gate.kind {
                    GateKind::Quadrant { .. } => {
                        return Ok(entry
                            .gate
                            .quadrant_ids()
                            .into_iter()
                            .map(|q| (q.clone(), path.sibling(q)))
                            .collect());
                    }
                    _ => vec![path],
                }
            }
            Err(GatingError::UnknownGate { .. }) => self.resolve_population(gate_id, gate_path)?,
            Err(err) => return Err(err),
        };

        Ok(populations
            .iter()
            .flat_map(|p| self.hierarchy.get_children(p))
            .filter_map(|child| self.populations.get(child))
            .map(|src| {
                // quadrant populations list their owning quadrant gate instead
                let entry = &self.entries[src.entry];
                (entry.gate.id.clone(), entry.path.clone())
            })
            .unique()
            .collect())
    }

    pub(crate) fn resolve_population(&self, population_id: &str, gate_path: Option<&GatePath>) -> Result<Vec<GatePath>> {
        if let Some(path) = gate_path {
            if path.gate_id() == population_id && self.populations.contains_key(path) {
                return Ok(vec![path.clone()]);
            }
            return Err(GatingError::unknown_gate(population_id, Some(path)));
        }
        let paths = self.find_population_paths(population_id);
        match paths.len() {
            0 => Err(GatingError::unknown_gate(population_id, None)),
            1 => Ok(paths),
            _ => Err(GatingError::AmbiguousGateId {
                gate_id: population_id.into(),
                paths,
            }),
        }
    }

    /// Ids of root-level gates in insertion order
    pub fn get_root_gate_ids(&self) -> Vec<Arc<str>> {
        self.entries
            .iter()
            .filter(|e| e.path.depth() == 0)
            .map(|e| e.gate.id.clone())
            .collect()
    }

    /// Paths of the boolean gates whose operands resolve to the population
    /// `population_id` (with an optional full path to disambiguate)
    pub fn get_referencing_gates(
        &self,
        population_id: &str,
        gate_path: Option<&GatePath>,
    ) -> Result<Vec<GatePath>> {
        let targets = self.resolve_population(population_id, gate_path)?;
        let links = self.links();
        Ok(targets
            .iter()
            .flat_map(|target| links.get_links(target))
            .cloned()
            .collect())
    }

    /// Boolean reference links, keyed by the population each operand resolves to
    ///
    /// Operands that do not resolve (yet) are left out; evaluation reports them.
    pub fn links(&self) -> GateLinks {
        let mut links = GateLinks::new();
        for entry in &self.entries {
            if let GateKind::Boolean { operands, .. } = &entry.gate.kind {
                for operand in operands {
                    if let Ok(target) = self.resolve_reference(&entry.gate.id, operand) {
                        links.add_link(target, entry.path.clone());
                    }
                }
            }
        }
        links
    }

    pub fn hierarchy(&self) -> &GateHierarchy {
        &self.hierarchy
    }

    /// Gates in insertion order
    pub fn entries(&self) -> &[GateEntry] {
        &self.entries
    }

    pub fn entry(&self, path: &GatePath) -> Option<&GateEntry> {
        self.index.get(path).map(|&i| &self.entries[i])
    }

    pub(crate) fn entry_index(&self, path: &GatePath) -> Option<usize> {
        self.index.get(path).copied()
    }

    pub(crate) fn population_source(&self, path: &GatePath) -> Option<&PopulationSource> {
        self.populations.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Text rendering of the population tree
    ///
    /// ```text
    /// root
    /// ╰── R
    ///     ╰── P
    /// ```
    pub fn hierarchy_ascii(&self) -> String {
        let mut out = String::from("root\n");
        for path in self.hierarchy.depth_first() {
            let indent = "    ".repeat(path.depth());
            let _ = write!(out, "{indent}╰── {}", path.gate_id());
            if let Some(src) = self.populations.get(&path).filter(|src| src.quadrant.is_some()) {
                let _ = write!(out, " ({})", self.entries[src.entry].gate.id);
            }
            out.push('\n');
        }
        out
    }

    /// Independent copy of this strategy bound to one sample
    pub fn for_sample(&self, sample_id: impl Into<Arc<str>>) -> SampleGatingStrategy {
        SampleGatingStrategy {
            sample_id: sample_id.into(),
            strategy: self.clone(),
        }
    }

    /// Evaluate every gate against a sample
    pub fn gate_sample<S: SampleData + ?Sized>(&self, sample: &S, verbose: bool) -> Result<GatingResults> {
        Evaluator::new(self, sample).verbose(verbose).run(None)
    }

    /// Build a strategy from a definition document
    ///
    /// Gates may be listed in any order; a gate whose parent has not been added
    /// yet is retried after the others. A parent named by bare id must match a
    /// single population across the whole definition, so the result does not
    /// depend on the order of the gate list.
    pub fn from_definition(definition: StrategyDefinition) -> Result<Self> {
        let mut strategy = Self::new();
        for (id, transform) in definition.transforms {
            strategy.add_transform(id, transform)?;
        }
        for matrix in definition.comp_matrices {
            strategy.add_comp_matrix(matrix)?;
        }

        let bare_parents: Vec<Arc<str>> = definition
            .gates
            .iter()
            .filter(|def| def.gate_path.is_none())
            .filter_map(|def| def.gate.parent.clone())
            .unique()
            .collect();

        let mut pending = definition.gates;
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            let mut first_error = None;

            for def in pending {
                match strategy.add_gate(def.gate.clone(), def.gate_path.clone()) {
                    Ok(_) => {}
                    Err(err @ GatingError::ParentNotFound { .. }) => {
                        first_error.get_or_insert(err);
                        deferred.push(def);
                    }
                    Err(err) => return Err(err),
                }
            }

            if deferred.len() == before {
                if let Some(err) = first_error {
                    return Err(err);
                }
            }
            pending = deferred;
        }

        // a bare parent may have resolved before a same-named population was added
        for parent_id in bare_parents {
            let paths = strategy.find_population_paths(&parent_id);
            if paths.len() > 1 {
                return Err(GatingError::AmbiguousGateId {
                    gate_id: parent_id,
                    paths,
                });
            }
        }

        Ok(strategy)
    }

    /// Definition document describing this strategy
    pub fn to_definition(&self) -> StrategyDefinition {
        StrategyDefinition {
            gates: self
                .entries
                .iter()
                .map(|e| GateDefinition {
                    gate: e.gate.clone(),
                    gate_path: Some(e.path.clone()),
                })
                .collect(),
            transforms: self
                .transformations
                .iter()
                .map(|(id, t)| (id.clone(), t.clone()))
                .collect(),
            comp_matrices: self
                .comp_matrices
                .values()
                .sorted_by(|a, b| a.id().cmp(b.id()))
                .cloned()
                .collect(),
        }
    }
}

/// A strategy copy owned by a single sample.
///
/// Mutating one copy never affects the template or other samples.
#[derive(Debug, Clone)]
pub struct SampleGatingStrategy {
    sample_id: Arc<str>,
    strategy: GatingStrategy,
}

impl SampleGatingStrategy {
    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn strategy(&self) -> &GatingStrategy {
        &self.strategy
    }

    pub fn strategy_mut(&mut self) -> &mut GatingStrategy {
        &mut self.strategy
    }

    pub fn into_strategy(self) -> GatingStrategy {
        self.strategy
    }
}

/// Serializable description of a gating strategy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyDefinition {
    pub gates: Vec<GateDefinition>,
    #[serde(default)]
    pub transforms: BTreeMap<Arc<str>, Transform>,
    #[serde(default)]
    pub comp_matrices: Vec<Matrix>,
}

/// A gate with an optional explicit path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDefinition {
    #[serde(flatten)]
    pub gate: Gate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_path: Option<GatePath>,
}

impl From<Gate> for GateDefinition {
    fn from(gate: Gate) -> Self {
        Self {
            gate,
            gate_path: None,
        }
    }
}
