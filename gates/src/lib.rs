//! # flow-gating
//!
//! A gating strategy evaluation engine for flow cytometry data.
//!
//! A gating strategy is a tree of gates. Each gate selects the events that
//! fall inside a region of one or more channels, and each child gate is
//! applied to the population selected by its parent. This library builds
//! strategies, evaluates them against samples and reports how many events end
//! up in every population.
//!
//! ## Overview
//!
//! - **Gate Types**: Rectangle, Polygon, Ellipsoid, Quadrant and Boolean gates
//! - **Gate Paths**: Gates are identified by their full path from the root, so
//!   the same id may be reused under different parents
//! - **Preprocessing**: Per-dimension spillover compensation and scale transforms
//!   (linear, log, asinh, logicle)
//! - **Reports**: Counts plus absolute and relative percentages per population
//! - **Batches**: Many samples evaluated in parallel, with one failure never
//!   affecting the others
//!
//! ## Quick Start
//!
//! ```rust
//! use flow_gating::*;
//!
//! # fn example() -> Result<(), GatingError> {
//! let mut strategy = GatingStrategy::new();
//! strategy.add_gate(
//!     Gate::rectangle("R", None, [Dimension::new("FSC-A").with_max(10.0)]),
//!     None,
//! )?;
//! strategy.add_gate(
//!     Gate::rectangle("P", Some("R"), [Dimension::new("SSC-A").with_min(5.0)]),
//!     None,
//! )?;
//!
//! let sample = Sample::from_columns(
//!     "s1",
//!     vec![
//!         ("FSC-A", vec![1.0, 2.0, 20.0, 3.0]),
//!         ("SSC-A", vec![6.0, 7.0, 8.0, 1.0]),
//!     ],
//! )?;
//!
//! let results = strategy.gate_sample(&sample, false)?;
//! assert_eq!(results.get_count("P", None)?, 2);
//! assert_eq!(results.get_absolute_percent("P", None)?, 50.0);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! ## Core Concepts
//!
//! ### Gates and populations
//!
//! A [`Gate`] defines a predicate over events. Most gates produce one
//! population, stored under the gate's [`GatePath`]. A quadrant gate produces
//! one population per quadrant instead, registered as siblings under the
//! quadrant gate's parent.
//!
//! ### Masks
//!
//! Evaluation stores each population's own mask, not restricted by its
//! ancestors. Counts and percentages in the [`GatingReport`] always use the
//! mask intersected with every ancestor. Use
//! [`GatingResults::get_hierarchy_mask`] to get that intersection directly.
//!
//! ## Error Handling
//!
//! The library uses [`GatingError`] for all error conditions. Most operations
//! return [`Result<T, GatingError>`](GateResult).

pub mod boolean;
pub mod compensation;
pub mod ellipsoid;
pub mod error;
pub mod evaluation;
pub mod hierarchy;
pub mod linking;
pub mod matrix;
pub mod parallel;
pub mod polygon;
pub mod quadrant;
pub mod rectangle;
pub mod report;
pub mod results;
pub mod sample;
pub mod strategy;
pub mod transforms;
pub mod types;

#[cfg(test)]
mod error_tests;

/// Error types for gating operations
pub use error::{ErrorKind, GatingError, Result as GateResult};

/// Gate definitions
pub use types::{BooleanOperation, Dimension, Divider, Gate, GateKind, GatePath, GateReference, Quadrant};

/// Strategy construction and lookup
pub use strategy::{GateDefinition, GateEntry, GatingStrategy, SampleGatingStrategy, StrategyDefinition};

/// Gate hierarchy management
pub use hierarchy::GateHierarchy;

/// Boolean gate reference tracking
pub use linking::GateLinks;

/// Sample input
pub use sample::{Sample, SampleData};

/// Spillover compensation
pub use compensation::Matrix;

/// Scale transforms
pub use transforms::{Transform, Transformable};

/// Single-sample evaluation
pub use evaluation::{evaluate, evaluate_with};

/// Evaluation output
pub use report::{GatingReport, ReportRow};
pub use results::GatingResults;

/// Batch evaluation
pub use parallel::{
    BatchOptions, BatchOptionsBuilder, BatchResults, Parallelism, SampleOutcome, evaluate_batch,
    evaluate_batch_with,
};
