use crate::error::{GatingError, Result};
use crate::report::{GatingReport, ReportRow, percent};
use crate::types::GatePath;
use itertools::Itertools;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// The unrestricted mask of one evaluated population
#[derive(Debug, Clone)]
pub(crate) struct PopulationResult {
    pub path: GatePath,
    pub gate_type: &'static str,
    /// Id of the quadrant gate when this population is a quadrant
    pub quadrant_parent: Option<Arc<str>>,
    /// The gate's own predicate over all events, not restricted by ancestors
    pub mask: Vec<bool>,
}

/// Results of evaluating a gating strategy against one sample.
///
/// Holds each population's own mask and the report derived from them. Values
/// are never modified after creation; clone to get an owned copy.
#[derive(Debug, Clone)]
pub struct GatingResults {
    sample_id: Arc<str>,
    event_count: usize,
    populations: Vec<PopulationResult>,
    index: FxHashMap<GatePath, usize>,
    report: GatingReport,
}

impl GatingResults {
    /// Assemble results from populations in evaluation order.
    ///
    /// Rows follow the order of `populations`. Ancestor restriction is
    /// resolved shallowest first, so parents may appear in any position.
    pub(crate) fn new(sample_id: Arc<str>, event_count: usize, populations: Vec<PopulationResult>) -> Self {
        let index: FxHashMap<GatePath, usize> = populations
            .iter()
            .enumerate()
            .map(|(i, p)| (p.path.clone(), i))
            .collect();
        let parent_index = |population: &PopulationResult| {
            population.path.parent().and_then(|p| index.get(&p).copied())
        };

        let mut restricted_masks: Vec<Vec<bool>> = vec![Vec::new(); populations.len()];
        for i in (0..populations.len()).sorted_by_key(|&i| populations[i].path.depth()) {
            let population = &populations[i];
            restricted_masks[i] = match parent_index(population) {
                Some(pi) => population
                    .mask
                    .iter()
                    .zip(&restricted_masks[pi])
                    .map(|(own, parent)| *own && *parent)
                    .collect(),
                None => population.mask.clone(),
            };
        }
        let restricted_counts: Vec<usize> = restricted_masks
            .iter()
            .map(|mask| mask.iter().filter(|&&b| b).count())
            .collect();

        let rows = populations
            .iter()
            .enumerate()
            .map(|(i, population)| {
                let count = restricted_counts[i];
                let parent_count = parent_index(population).map_or(event_count, |pi| restricted_counts[pi]);
                ReportRow {
                    sample: sample_id.clone(),
                    gate_path: population.path.clone(),
                    gate_id: population.path.gate_id().into(),
                    gate_type: population.gate_type.into(),
                    quadrant_parent: population.quadrant_parent.clone(),
                    parent: population.path.parent(),
                    count,
                    absolute_percent: percent(count, event_count),
                    relative_percent: percent(count, parent_count),
                    level: population.path.depth() + 1,
                }
            })
            .collect();

        Self {
            sample_id,
            event_count,
            populations,
            index,
            report: GatingReport::new(rows),
        }
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    pub fn report(&self) -> &GatingReport {
        &self.report
    }

    /// Paths of the evaluated populations, in evaluation order
    pub fn gate_paths(&self) -> impl Iterator<Item = &GatePath> {
        self.populations.iter().map(|p| &p.path)
    }

    fn lookup(&self, gate_id: &str, gate_path: Option<&GatePath>) -> Result<usize> {
        if let Some(path) = gate_path {
            return match self.index.get(path) {
                Some(&i) if path.gate_id() == gate_id => Ok(i),
                _ => Err(GatingError::unknown_gate(gate_id, Some(path))),
            };
        }

        let matches: Vec<usize> = self
            .populations
            .iter()
            .enumerate()
            .filter(|(_, p)| p.path.gate_id() == gate_id)
            .map(|(i, _)| i)
            .collect();
        match matches.as_slice() {
            [] => Err(GatingError::unknown_gate(gate_id, None)),
            [i] => Ok(*i),
            _ => Err(GatingError::AmbiguousGateId {
                gate_id: gate_id.into(),
                paths: matches.iter().map(|&i| self.populations[i].path.clone()).collect(),
            }),
        }
    }

    /// The population's own mask, not restricted by its ancestors
    ///
    /// `gate_path` is the population's full path and disambiguates repeated ids.
    pub fn get_mask(&self, gate_id: &str, gate_path: Option<&GatePath>) -> Result<&[bool]> {
        let i = self.lookup(gate_id, gate_path)?;
        Ok(&self.populations[i].mask)
    }

    /// The population's mask intersected with every evaluated ancestor
    pub fn get_hierarchy_mask(&self, gate_id: &str, gate_path: Option<&GatePath>) -> Result<Vec<bool>> {
        let i = self.lookup(gate_id, gate_path)?;
        let mut mask = self.populations[i].mask.clone();

        let mut ancestor = self.populations[i].path.parent();
        while let Some(path) = ancestor {
            if let Some(&ai) = self.index.get(&path) {
                for (m, a) in mask.iter_mut().zip(&self.populations[ai].mask) {
                    *m = *m && *a;
                }
            }
            ancestor = path.parent();
        }

        Ok(mask)
    }

    fn row(&self, gate_id: &str, gate_path: Option<&GatePath>) -> Result<&ReportRow> {
        let i = self.lookup(gate_id, gate_path)?;
        // rows are built one per population, in the same order
        Ok(&self.report.rows()[i])
    }

    /// Events inside the population and all its ancestors
    pub fn get_count(&self, gate_id: &str, gate_path: Option<&GatePath>) -> Result<usize> {
        Ok(self.row(gate_id, gate_path)?.count)
    }

    pub fn get_absolute_percent(&self, gate_id: &str, gate_path: Option<&GatePath>) -> Result<f64> {
        Ok(self.row(gate_id, gate_path)?.absolute_percent)
    }

    pub fn get_relative_percent(&self, gate_id: &str, gate_path: Option<&GatePath>) -> Result<f64> {
        Ok(self.row(gate_id, gate_path)?.relative_percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn population(path: &str, mask: Vec<bool>) -> PopulationResult {
        PopulationResult {
            path: path.parse().expect("path"),
            gate_type: "RectangleGate",
            quadrant_parent: None,
            mask,
        }
    }

    fn results() -> GatingResults {
        GatingResults::new(
            "s1".into(),
            4,
            vec![
                population("/R", vec![true, false, true, true]),
                population("/R/P", vec![true, true, true, false]),
                population("/R/P/live", vec![true, true, false, false]),
                population("/other", vec![false, false, false, false]),
                population("/other/live", vec![true, true, true, true]),
            ],
        )
    }

    #[test]
    fn test_parent_listed_after_child() {
        let r = GatingResults::new(
            "s1".into(),
            2,
            vec![population("/R/P", vec![true, true]), population("/R", vec![true, false])],
        );
        assert_eq!(r.get_count("R", None).expect("R"), 1);
        assert_eq!(r.get_count("P", None).expect("P"), 1);
        assert_eq!(r.get_hierarchy_mask("P", None).expect("P"), vec![true, false]);
        assert_eq!(r.report().rows()[0].gate_path.to_string(), "/R/P");
    }

    #[test]
    fn test_counts_use_ancestor_intersection() {
        let r = results();
        let p_path: GatePath = "/R/P".parse().expect("path");
        assert_eq!(r.get_count("P", None).expect("P"), 2);
        assert_relative_eq!(r.get_relative_percent("P", None).expect("P"), 200.0 / 3.0);
        assert_relative_eq!(r.get_absolute_percent("P", Some(&p_path)).expect("P"), 50.0);

        let live: GatePath = "/R/P/live".parse().expect("path");
        assert_eq!(r.get_count("live", Some(&live)).expect("live"), 1);
        assert_eq!(
            r.get_hierarchy_mask("live", Some(&live)).expect("live"),
            vec![true, false, false, false]
        );
    }

    #[test]
    fn test_zero_parent_gives_zero_percent() {
        let r = results();
        let live: GatePath = "/other/live".parse().expect("path");
        assert_eq!(r.get_count("live", Some(&live)).expect("live"), 0);
        assert_eq!(r.get_relative_percent("live", Some(&live)).expect("live"), 0.0);
    }

    #[test]
    fn test_ambiguous_and_unknown_lookups() {
        let r = results();
        assert!(matches!(
            r.get_mask("live", None),
            Err(GatingError::AmbiguousGateId { ref paths, .. }) if paths.len() == 2
        ));
        assert!(matches!(r.get_mask("nope", None), Err(GatingError::UnknownGate { .. })));

        // path must name the requested gate
        let p_path: GatePath = "/R/P".parse().expect("path");
        assert!(matches!(
            r.get_mask("R", Some(&p_path)),
            Err(GatingError::UnknownGate { .. })
        ));
        assert_eq!(r.get_mask("P", Some(&p_path)).expect("P"), &[true, true, true, false]);
    }

    #[test]
    fn test_report_rows_in_order() {
        let r = results();
        let rows = r.report().rows();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].relative_percent, 75.0);
        assert_eq!(rows[2].level, 3);
        assert_eq!(rows[2].parent.as_ref().map(|p| p.to_string()), Some("/R/P".to_string()));
    }
}
