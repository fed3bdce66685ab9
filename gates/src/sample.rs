use crate::compensation::Matrix;
use crate::error::{GatingError, Result};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Event data provider consumed by the evaluation engine
///
/// Implement this trait for your sample type (e.g. an FCS reader) so it can be
/// gated without copying its event matrix. Implementations are shared across
/// worker threads during batch evaluation, so they must be `Send + Sync`.
///
/// # Example Implementation
///
/// ```rust
/// use flow_gating::SampleData;
/// use ndarray::{Array2, ArrayView2};
///
/// struct MySample {
///     name: String,
///     labels: Vec<String>,
///     events: Array2<f64>,
/// }
///
/// impl SampleData for MySample {
///     fn sample_id(&self) -> &str {
///         &self.name
///     }
///     fn channel_labels(&self) -> &[String] {
///         &self.labels
///     }
///     fn raw_events(&self) -> ArrayView2<'_, f64> {
///         self.events.view()
///     }
/// }
/// ```
pub trait SampleData: Send + Sync {
    fn sample_id(&self) -> &str;

    /// Ordered channel labels, one per event matrix column
    fn channel_labels(&self) -> &[String];

    /// Raw event matrix `[events × channels]`
    fn raw_events(&self) -> ArrayView2<'_, f64>;

    fn event_count(&self) -> usize {
        self.raw_events().nrows()
    }

    /// Spillover matrix stored with the sample, used by the `FCS` compensation reference
    fn spillover(&self) -> Option<&Matrix> {
        None
    }

    /// Position of a channel label in the event matrix
    fn channel_index(&self, channel: &str) -> Option<usize> {
        self.channel_labels().iter().position(|label| label == channel)
    }
}

impl<T: SampleData + ?Sized> SampleData for &T {
    fn sample_id(&self) -> &str {
        (**self).sample_id()
    }
    fn channel_labels(&self) -> &[String] {
        (**self).channel_labels()
    }
    fn raw_events(&self) -> ArrayView2<'_, f64> {
        (**self).raw_events()
    }
    fn event_count(&self) -> usize {
        (**self).event_count()
    }
    fn spillover(&self) -> Option<&Matrix> {
        (**self).spillover()
    }
}

impl<T: SampleData + ?Sized> SampleData for Arc<T> {
    fn sample_id(&self) -> &str {
        (**self).sample_id()
    }
    fn channel_labels(&self) -> &[String] {
        (**self).channel_labels()
    }
    fn raw_events(&self) -> ArrayView2<'_, f64> {
        (**self).raw_events()
    }
    fn event_count(&self) -> usize {
        (**self).event_count()
    }
    fn spillover(&self) -> Option<&Matrix> {
        (**self).spillover()
    }
}

/// In-memory sample: an owned event matrix with its channel labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SampleDefinition", into = "SampleDefinition")]
pub struct Sample {
    id: Arc<str>,
    channel_labels: Vec<String>,
    events: Array2<f64>,
    spillover: Option<Matrix>,
}

impl Sample {
    /// Create a sample, checking the matrix has one column per label
    pub fn new(
        id: impl Into<Arc<str>>,
        channel_labels: Vec<String>,
        events: Array2<f64>,
    ) -> Result<Self> {
        let id = id.into();
        if events.ncols() != channel_labels.len() {
            return Err(GatingError::invalid_sample(
                id,
                format!(
                    "event matrix has {} columns but {} channel labels were given",
                    events.ncols(),
                    channel_labels.len()
                ),
            ));
        }
        Ok(Self {
            id,
            channel_labels,
            events,
            spillover: None,
        })
    }

    /// Build from event rows
    pub fn from_rows(
        id: impl Into<Arc<str>>,
        channel_labels: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let id = id.into();
        let n_cols = channel_labels.len();
        if let Some(bad) = rows.iter().position(|row| row.len() != n_cols) {
            return Err(GatingError::invalid_sample(
                id,
                format!("event {bad} has {} values for {n_cols} channels", rows[bad].len()),
            ));
        }
        let n_rows = rows.len();
        let events = Array2::from_shape_vec((n_rows, n_cols), rows.into_iter().flatten().collect())
            .map_err(|e| GatingError::invalid_sample(id.clone(), e.to_string()))?;
        Self::new(id, channel_labels, events)
    }

    /// Build from named columns of equal length
    pub fn from_columns<S: Into<String>>(
        id: impl Into<Arc<str>>,
        columns: Vec<(S, Vec<f64>)>,
    ) -> Result<Self> {
        let id = id.into();
        let n_rows = columns.first().map_or(0, |(_, c)| c.len());
        if columns.iter().any(|(_, c)| c.len() != n_rows) {
            return Err(GatingError::invalid_sample(id, "columns differ in length"));
        }
        let n_cols = columns.len();
        let mut labels = Vec::with_capacity(n_cols);
        let mut events = Array2::<f64>::zeros((n_rows, n_cols));
        for (j, (label, values)) in columns.into_iter().enumerate() {
            labels.push(label.into());
            for (i, value) in values.into_iter().enumerate() {
                events[[i, j]] = value;
            }
        }
        Self::new(id, labels, events)
    }

    /// Attach the spillover matrix acquired with the sample
    pub fn with_spillover(mut self, spillover: Matrix) -> Self {
        self.spillover = Some(spillover);
        self
    }

    pub fn events(&self) -> &Array2<f64> {
        &self.events
    }
}

impl SampleData for Sample {
    fn sample_id(&self) -> &str {
        &self.id
    }

    fn channel_labels(&self) -> &[String] {
        &self.channel_labels
    }

    fn raw_events(&self) -> ArrayView2<'_, f64> {
        self.events.view()
    }

    fn spillover(&self) -> Option<&Matrix> {
        self.spillover.as_ref()
    }
}

/// Serialized form of a [`Sample`]: events as a list of rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleDefinition {
    pub id: Arc<str>,
    pub channel_labels: Vec<String>,
    pub events: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spillover: Option<Matrix>,
}

impl TryFrom<SampleDefinition> for Sample {
    type Error = GatingError;

    fn try_from(def: SampleDefinition) -> Result<Self> {
        let sample = Sample::from_rows(def.id, def.channel_labels, def.events)?;
        Ok(match def.spillover {
            Some(spillover) => sample.with_spillover(spillover),
            None => sample,
        })
    }
}

impl From<Sample> for SampleDefinition {
    fn from(sample: Sample) -> Self {
        let events = sample.events.rows().into_iter().map(|r| r.to_vec()).collect();
        Self {
            id: sample.id,
            channel_labels: sample.channel_labels,
            events,
            spillover: sample.spillover,
        }
    }
}
