use crate::types::GatePath;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Counts for one gated population of one sample.
///
/// `count` is the number of events inside the population *and* all of its
/// ancestors. Percentages are on a 0-100 scale; a zero denominator gives `0.0`.
///
/// # Example
///
/// ```rust
/// use flow_gating::{Dimension, Gate, GatingStrategy, Sample};
///
/// let mut strategy = GatingStrategy::new();
/// strategy.add_gate(Gate::rectangle("R", None, [Dimension::new("X").with_max(10.0)]), None)?;
///
/// let sample = Sample::from_columns("s1", vec![("X", vec![1.0, 20.0, 3.0, 40.0])])?;
/// let results = strategy.gate_sample(&sample, false)?;
///
/// let row = &results.report().rows()[0];
/// assert_eq!(row.count, 2);
/// assert_eq!(row.absolute_percent, 50.0);
/// assert_eq!(row.level, 1);
/// # Ok::<(), flow_gating::GatingError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    /// Sample id
    pub sample: Arc<str>,
    pub gate_path: GatePath,
    pub gate_id: Arc<str>,
    /// Gate type name, e.g. `RectangleGate`
    pub gate_type: Arc<str>,
    /// Id of the quadrant gate when this row is a quadrant
    pub quadrant_parent: Option<Arc<str>>,
    /// Path of the parent population, `None` at the root
    pub parent: Option<GatePath>,
    /// Events inside the population and all its ancestors
    pub count: usize,
    /// Percent of all events in the sample
    pub absolute_percent: f64,
    /// Percent of the parent population (all events at the root)
    pub relative_percent: f64,
    /// Hierarchy level (root-level gates are level 1)
    pub level: usize,
}

/// Report rows for one or more samples, in evaluation order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatingReport {
    rows: Vec<ReportRow>,
}

impl GatingReport {
    pub fn new(rows: Vec<ReportRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }

    /// Rows for one sample, in evaluation order
    pub fn rows_for_sample<'a>(&'a self, sample_id: &'a str) -> impl Iterator<Item = &'a ReportRow> + 'a {
        self.rows.iter().filter(move |r| r.sample.as_ref() == sample_id)
    }

    /// The row for a sample and gate path
    pub fn find(&self, sample_id: &str, gate_path: &GatePath) -> Option<&ReportRow> {
        self.rows
            .iter()
            .find(|r| r.sample.as_ref() == sample_id && &r.gate_path == gate_path)
    }

    /// Append another report's rows
    pub fn extend(&mut self, other: &GatingReport) {
        self.rows.extend(other.rows.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl FromIterator<ReportRow> for GatingReport {
    fn from_iter<I: IntoIterator<Item = ReportRow>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// `part / whole` as a percentage, `0.0` when `whole` is zero
pub fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
