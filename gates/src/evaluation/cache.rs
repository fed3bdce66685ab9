use ndarray::Array2;
use rustc_hash::FxHashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::compensation::UNCOMPENSATED;
use crate::types::Dimension;

/// Cache key for a resolved dimension column
///
/// A column is identified by:
/// - The channel it reads
/// - The compensation applied to the event matrix (`uncompensated` is stored as `None`)
/// - The transform applied to the selected column
#[derive(Debug, Clone, Eq)]
pub struct DimensionKey {
    pub channel: Arc<str>,
    pub compensation_ref: Option<Arc<str>>,
    pub transform_ref: Option<Arc<str>>,
}

impl DimensionKey {
    pub fn new(dimension: &Dimension) -> Self {
        let compensation_ref = dimension
            .compensation_ref
            .clone()
            .filter(|r| r.as_ref() != UNCOMPENSATED);

        Self {
            channel: dimension.channel.clone(),
            compensation_ref,
            transform_ref: dimension.transform_ref.clone(),
        }
    }
}

impl PartialEq for DimensionKey {
    fn eq(&self, other: &Self) -> bool {
        self.channel == other.channel
            && self.compensation_ref == other.compensation_ref
            && self.transform_ref == other.transform_ref
    }
}

impl Hash for DimensionKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.channel.hash(state);
        self.compensation_ref.hash(state);
        self.transform_ref.hash(state);
    }
}

/// Per-evaluation store of compensated event matrices and resolved columns.
///
/// Lives for a single sample evaluation, so entries never outlive the sample
/// they were computed from.
#[derive(Debug, Default)]
pub struct DimensionCache {
    columns: FxHashMap<DimensionKey, Arc<Vec<f64>>>,
    compensated: FxHashMap<Arc<str>, Arc<Array2<f64>>>,
    hits: usize,
    misses: usize,
}

impl DimensionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a cached column, counting the lookup
    pub fn get_column(&mut self, key: &DimensionKey) -> Option<Arc<Vec<f64>>> {
        let found = self.columns.get(key).cloned();
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    pub fn insert_column(&mut self, key: DimensionKey, column: Vec<f64>) -> Arc<Vec<f64>> {
        let column = Arc::new(column);
        self.columns.insert(key, column.clone());
        column
    }

    pub fn get_compensated(&self, compensation_ref: &str) -> Option<Arc<Array2<f64>>> {
        self.compensated.get(compensation_ref).cloned()
    }

    pub fn insert_compensated(&mut self, compensation_ref: Arc<str>, events: Array2<f64>) -> Arc<Array2<f64>> {
        let events = Arc::new(events);
        self.compensated.insert(compensation_ref, events.clone());
        events
    }

    /// `(hits, misses)` of column lookups
    pub fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }
}
