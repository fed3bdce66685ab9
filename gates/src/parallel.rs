//! Batch evaluation across samples.
//!
//! Each unit of work is one sample paired with its own [`SampleGatingStrategy`]
//! copy. Units share no mutable state, so they run on a dedicated rayon pool
//! without locks. Evaluation inside a unit stays sequential.
//!
//! Failures are values: an error or panic in one unit is recorded in that
//! unit's [`SampleOutcome`] and never affects the others. Outcomes are returned
//! in input order whether or not the batch ran in parallel.

use crate::error::{ErrorKind, GatingError, Result};
use crate::evaluation::evaluate_with;
use crate::report::GatingReport;
use crate::results::GatingResults;
use crate::sample::SampleData;
use crate::strategy::SampleGatingStrategy;
use crate::types::GatePath;
use derive_builder::Builder;
use itertools::Itertools;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many worker threads a batch may use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parallelism {
    /// Evaluate samples one after another on the calling thread
    Disabled,
    /// One worker per sample, up to the available cores minus one
    #[default]
    Enabled,
    /// One worker per sample, up to the given limit
    MaxWorkers(usize),
}

impl Parallelism {
    /// Worker threads to use for `unit_count` units (always at least one)
    pub fn worker_count(&self, unit_count: usize) -> usize {
        let workers = match *self {
            Parallelism::Disabled => 1,
            Parallelism::Enabled => {
                let available = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                unit_count.min(available.saturating_sub(1).max(1))
            }
            Parallelism::MaxWorkers(max) => unit_count.min(max.max(1)),
        };
        workers.max(1)
    }
}

/// Options for [`evaluate_batch_with`]
///
/// # Example
///
/// ```rust
/// use flow_gating::{BatchOptionsBuilder, Parallelism};
///
/// let options = BatchOptionsBuilder::default()
///     .parallelism(Parallelism::MaxWorkers(4))
///     .gate_id("lymphocytes")
///     .build()
///     .expect("all fields have defaults");
///
/// assert_eq!(options.parallelism, Parallelism::MaxWorkers(4));
/// assert_eq!(options.gate_id.as_deref(), Some("lymphocytes"));
/// assert!(!options.verbose);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default)]
pub struct BatchOptions {
    pub parallelism: Parallelism,
    /// Log every gated population at `info` level
    pub verbose: bool,
    /// Evaluate only this gate and its dependencies in every sample
    #[builder(setter(into, strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_id: Option<Arc<str>>,
    /// Full path of `gate_id` when the id alone is ambiguous
    #[builder(setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_path: Option<GatePath>,
}

/// Result of one batch unit
#[derive(Debug)]
pub struct SampleOutcome {
    pub sample_id: Arc<str>,
    pub result: Result<GatingResults>,
}

/// Per-sample outcomes of a batch, in input order
#[derive(Debug, Default)]
pub struct BatchResults {
    outcomes: Vec<SampleOutcome>,
}

impl BatchResults {
    pub fn outcomes(&self) -> &[SampleOutcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<SampleOutcome> {
        self.outcomes
    }

    pub fn successes(&self) -> impl Iterator<Item = &GatingResults> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &GatingError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.sample_id.as_ref(), e)))
    }

    pub fn failed_sample_ids(&self) -> Vec<&str> {
        self.failures().map(|(id, _)| id).collect()
    }

    /// Number of failures per error kind
    pub fn failure_counts(&self) -> HashMap<ErrorKind, usize> {
        self.failures().map(|(_, e)| e.kind()).counts()
    }

    /// Rows of every successful sample, sample by sample in input order
    pub fn report(&self) -> GatingReport {
        let mut report = GatingReport::default();
        for results in self.successes() {
            report.extend(results.report());
        }
        report
    }

    /// Outcome for a sample id (the first one if the id was queued twice)
    pub fn get(&self, sample_id: &str) -> Option<&Result<GatingResults>> {
        self.outcomes
            .iter()
            .find(|o| o.sample_id.as_ref() == sample_id)
            .map(|o| &o.result)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Evaluate every unit with the default parallelism
pub fn evaluate_batch<S: SampleData>(units: Vec<(SampleGatingStrategy, S)>, verbose: bool) -> BatchResults {
    let options = BatchOptions {
        verbose,
        ..Default::default()
    };
    evaluate_batch_with(units, &options)
}

/// Evaluate every unit under the given options
///
/// Runs in parallel only when more than one unit is queued and the policy
/// allows more than one worker. If the worker pool cannot be built the batch
/// falls back to sequential evaluation, which gives identical results.
pub fn evaluate_batch_with<S: SampleData>(
    units: Vec<(SampleGatingStrategy, S)>,
    options: &BatchOptions,
) -> BatchResults {
    let unit_count = units.len();
    let workers = options.parallelism.worker_count(unit_count);

    let outcomes: Vec<SampleOutcome> = if unit_count > 1 && workers > 1 {
        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => {
                debug!(units = unit_count, workers, "Evaluating batch in parallel");
                pool.install(|| {
                    units
                        .into_par_iter()
                        .map(|(strategy, sample)| run_unit(strategy, sample, options))
                        .collect()
                })
            }
            Err(err) => {
                warn!(error = %err, "Failed to build worker pool, evaluating sequentially");
                run_sequential(units, options)
            }
        }
    } else {
        debug!(units = unit_count, "Evaluating batch sequentially");
        run_sequential(units, options)
    };

    let results = BatchResults { outcomes };
    info!(
        samples = results.len(),
        succeeded = results.successes().count(),
        failed = results.failures().count(),
        "Batch evaluation complete"
    );
    results
}

fn run_sequential<S: SampleData>(
    units: Vec<(SampleGatingStrategy, S)>,
    options: &BatchOptions,
) -> Vec<SampleOutcome> {
    units
        .into_iter()
        .map(|(strategy, sample)| run_unit(strategy, sample, options))
        .collect()
}

fn run_unit<S: SampleData>(strategy: SampleGatingStrategy, sample: S, options: &BatchOptions) -> SampleOutcome {
    let sample_id: Arc<str> = strategy.sample_id().into();

    let result = if strategy.sample_id() != sample.sample_id() {
        Err(GatingError::SampleMismatch {
            expected: sample_id.clone(),
            actual: sample.sample_id().into(),
        })
    } else {
        panic::catch_unwind(AssertUnwindSafe(|| {
            evaluate_with(
                strategy.strategy(),
                &sample,
                options.gate_id.as_deref(),
                options.gate_path.as_ref(),
                options.verbose,
            )
        }))
        .unwrap_or_else(|payload| {
            Err(GatingError::WorkerPanic {
                sample_id: sample_id.clone(),
                message: panic_message(payload.as_ref()),
            })
        })
    };

    if let Err(err) = &result {
        warn!(sample = %sample_id, kind = %err.kind(), error = %err, "Sample evaluation failed");
    }
    SampleOutcome { sample_id, result }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
