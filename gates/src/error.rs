//! Error types for gating operations.
//!
//! This module defines `GatingError`, the single error type returned by strategy
//! construction, sample evaluation and result queries. It uses `thiserror` for
//! convenient error construction and groups variants into an [`ErrorKind`] so
//! batch callers can tell configuration bugs from per-sample resolution failures.

use crate::types::{BooleanOperation, GatePath};
use std::error::Error as StdError;
use std::sync::Arc;
use strum_macros::Display;
use thiserror::Error;

/// Broad classification of a [`GatingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ErrorKind {
    /// Malformed gate, transform or matrix definition. Raised while building a strategy.
    Configuration,
    /// A channel, registry entry or gate reference could not be resolved for a sample.
    Resolution,
    /// The gate graph contains a cycle.
    Dependency,
    /// A batch unit could not run to completion.
    Execution,
}

/// Custom error type for gating operations.
///
/// All gating operations return `Result<T, GatingError>`. Every variant carries
/// the identifiers needed to find the offending gate, channel or reference.
#[derive(Debug, Error)]
pub enum GatingError {
    /// A range dimension declares neither a lower nor an upper bound
    #[error("Gate '{gate_id}': dimension '{channel}' does not include a min or max value")]
    MissingBounds { gate_id: Arc<str>, channel: Arc<str> },

    /// Geometry validation failures
    #[error("Invalid geometry for gate '{gate_id}': {message}")]
    InvalidGeometry { gate_id: Arc<str>, message: String },

    /// Ellipsoid covariance that cannot be inverted
    #[error("Gate '{gate_id}': covariance matrix is not positive-definite")]
    NonInvertibleCovariance { gate_id: Arc<str> },

    /// Boolean gate with the wrong number of operands
    #[error("Boolean gate '{gate_id}': '{operation}' requires {expected} operand(s), got {actual}")]
    InvalidOperandCount {
        gate_id: Arc<str>,
        operation: BooleanOperation,
        expected: &'static str,
        actual: usize,
    },

    /// Two gates resolve to the same path
    #[error("Gate path '{path}' already exists")]
    DuplicateGatePath { path: GatePath },

    /// A gate names a parent that is not part of the strategy
    #[error("Parent gate '{parent_id}' of gate '{gate_id}' is not defined")]
    ParentNotFound { gate_id: Arc<str>, parent_id: Arc<str> },

    /// Malformed compensation matrix
    #[error("Invalid compensation matrix '{matrix_id}': {message}")]
    InvalidMatrix { matrix_id: Arc<str>, message: String },

    /// Transform parameters outside their domain
    #[error("Invalid transform '{transform_id}': {message}")]
    InvalidTransform { transform_id: Arc<str>, message: String },

    /// A transform or matrix id registered twice
    #[error("{registry} '{id}' is already registered")]
    DuplicateRegistration { registry: &'static str, id: Arc<str> },

    /// Event matrix and channel labels disagree
    #[error("Invalid sample '{sample_id}': {message}")]
    InvalidSample { sample_id: Arc<str>, message: String },

    /// Channel label missing from the sample
    #[error("Unknown channel '{channel}' in context: {context}")]
    UnknownChannel { channel: Arc<str>, context: String },

    /// Compensation reference not registered on the strategy
    #[error("Unknown compensation reference '{reference}'")]
    UnknownCompensationRef { reference: Arc<str> },

    /// Transform reference not registered on the strategy
    #[error("Unknown transform reference '{reference}'")]
    UnknownTransformRef { reference: Arc<str> },

    /// Boolean operand that matches no gate
    #[error("Gate '{gate_id}' references '{reference}', which is not a gate in this strategy")]
    UnresolvedGateReference { gate_id: Arc<str>, reference: String },

    /// Bare gate id that matches several paths
    #[error("Gate ID '{gate_id}' is ambiguous ({}), specify the full gate path", join_paths(.paths))]
    AmbiguousGateId { gate_id: Arc<str>, paths: Vec<GatePath> },

    /// Gate id or path not present
    #[error("Gate '{gate_id}' not found{}", .gate_path.as_ref().map(|p| format!(" at path '{p}'")).unwrap_or_default())]
    UnknownGate { gate_id: Arc<str>, gate_path: Option<GatePath> },

    /// Gates that transitively depend on themselves
    #[error("Cyclic gate dependency between: {}", join_paths(.gates))]
    CyclicGateDependency { gates: Vec<GatePath> },

    /// Batch unit whose strategy was bound to another sample
    #[error("Strategy bound to sample '{expected}' was paired with sample '{actual}'")]
    SampleMismatch { expected: Arc<str>, actual: Arc<str> },

    /// Panic caught inside a batch unit
    #[error("Evaluation of sample '{sample_id}' panicked: {message}")]
    WorkerPanic { sample_id: Arc<str>, message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error with context (for wrapping other errors)
    #[error("{message}")]
    Other {
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

fn join_paths(paths: &[GatePath]) -> String {
    itertools::join(paths.iter(), ", ")
}

impl GatingError {
    /// Create an InvalidGeometry error
    pub fn invalid_geometry(gate_id: impl Into<Arc<str>>, message: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            gate_id: gate_id.into(),
            message: message.into(),
        }
    }

    /// Create an UnknownChannel error
    pub fn unknown_channel(channel: impl Into<Arc<str>>, context: impl Into<String>) -> Self {
        Self::UnknownChannel {
            channel: channel.into(),
            context: context.into(),
        }
    }

    /// Create an UnknownGate error
    pub fn unknown_gate(gate_id: impl Into<Arc<str>>, gate_path: Option<&GatePath>) -> Self {
        Self::UnknownGate {
            gate_id: gate_id.into(),
            gate_path: gate_path.cloned(),
        }
    }

    pub fn invalid_matrix(matrix_id: impl Into<Arc<str>>, message: impl Into<String>) -> Self {
        Self::InvalidMatrix {
            matrix_id: matrix_id.into(),
            message: message.into(),
        }
    }

    pub fn invalid_transform(transform_id: impl Into<Arc<str>>, message: impl Into<String>) -> Self {
        Self::InvalidTransform {
            transform_id: transform_id.into(),
            message: message.into(),
        }
    }

    pub fn invalid_sample(sample_id: impl Into<Arc<str>>, message: impl Into<String>) -> Self {
        Self::InvalidSample {
            sample_id: sample_id.into(),
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingBounds { .. }
            | Self::InvalidGeometry { .. }
            | Self::NonInvertibleCovariance { .. }
            | Self::InvalidOperandCount { .. }
            | Self::DuplicateGatePath { .. }
            | Self::ParentNotFound { .. }
            | Self::InvalidMatrix { .. }
            | Self::InvalidTransform { .. }
            | Self::DuplicateRegistration { .. }
            | Self::InvalidSample { .. }
            | Self::SerializationError(_) => ErrorKind::Configuration,
            Self::UnknownChannel { .. }
            | Self::UnknownCompensationRef { .. }
            | Self::UnknownTransformRef { .. }
            | Self::UnresolvedGateReference { .. }
            | Self::AmbiguousGateId { .. }
            | Self::UnknownGate { .. } => ErrorKind::Resolution,
            Self::CyclicGateDependency { .. } => ErrorKind::Dependency,
            Self::SampleMismatch { .. } | Self::WorkerPanic { .. } | Self::Other { .. } => {
                ErrorKind::Execution
            }
        }
    }

    /// Add context to an error
    ///
    /// Variants with free-form text get the context prepended; structured
    /// variants are wrapped in `Other` so the original stays reachable as the source.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        match self {
            Self::InvalidGeometry { gate_id, message } => Self::InvalidGeometry {
                gate_id,
                message: format!("{}: {}", context.into(), message),
            },
            Self::UnknownChannel {
                channel,
                context: ctx,
            } => Self::UnknownChannel {
                channel,
                context: format!("{}: {}", context.into(), ctx),
            },
            Self::Other { message, source } => Self::Other {
                message: format!("{}: {}", context.into(), message),
                source,
            },
            other => Self::Other {
                message: format!("{}: {}", context.into(), other),
                source: Some(Box::new(other)),
            },
        }
    }
}

// Conversion from anyhow::Error for convenience
impl From<anyhow::Error> for GatingError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            message: err.to_string(),
            source: None, // anyhow::Error already contains the full context
        }
    }
}

// Type alias for Result using GatingError
pub type Result<T> = std::result::Result<T, GatingError>;
