use crate::error::{GatingError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

/// One axis of a gate.
///
/// A dimension names the channel it reads, the optional compensation matrix and
/// transform applied before the gate predicate runs, and an optional range.
/// The range is only meaningful for rectangle gates; other gate types ignore it.
///
/// # Example
///
/// ```rust
/// use flow_gating::Dimension;
///
/// let dim = Dimension::new("FSC-A")
///     .with_min(100.0)
///     .with_max(5000.0)
///     .with_transform("logicle");
///
/// assert_eq!(dim.channel.as_ref(), "FSC-A");
/// assert_eq!(dim.transform_ref.as_deref(), Some("logicle"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    /// Channel label (the `$PnN` value of the sample)
    pub channel: Arc<str>,
    /// Compensation matrix id, `FCS` for the sample's own spillover, or `uncompensated`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation_ref: Option<Arc<str>>,
    /// Transform id applied after compensation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_ref: Option<Arc<str>>,
    /// Inclusive lower bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Exclusive upper bound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Dimension {
    /// Create an unbounded, uncompensated, untransformed dimension
    pub fn new(channel: impl Into<Arc<str>>) -> Self {
        Self {
            channel: channel.into(),
            compensation_ref: None,
            transform_ref: None,
            min: None,
            max: None,
        }
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_compensation(mut self, compensation_ref: impl Into<Arc<str>>) -> Self {
        self.compensation_ref = Some(compensation_ref.into());
        self
    }

    pub fn with_transform(mut self, transform_ref: impl Into<Arc<str>>) -> Self {
        self.transform_ref = Some(transform_ref.into());
        self
    }
}

/// A set of split points along one dimension of a quadrant gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Divider {
    pub id: Arc<str>,
    pub dimension: Dimension,
    /// Split points. Treated as a sorted set regardless of the order given.
    pub values: Vec<f64>,
}

impl Divider {
    pub fn new(id: impl Into<Arc<str>>, dimension: Dimension, values: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            dimension,
            values,
        }
    }
}

/// Where a quadrant sits relative to one divider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuadrantPosition {
    pub divider_ref: Arc<str>,
    /// Any value strictly inside the quadrant along the divider's dimension
    pub location: f64,
}

/// A named region of a quadrant gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quadrant {
    pub id: Arc<str>,
    pub positions: Vec<QuadrantPosition>,
}

impl Quadrant {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self {
            id: id.into(),
            positions: Vec::new(),
        }
    }

    /// Add a position using the builder pattern
    pub fn with_position(mut self, divider_ref: impl Into<Arc<str>>, location: f64) -> Self {
        self.positions.push(QuadrantPosition {
            divider_ref: divider_ref.into(),
            location,
        });
        self
    }
}

/// Boolean combination applied by a boolean gate
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BooleanOperation {
    And,
    Or,
    Not,
}

/// Reference from a boolean gate to another gate
///
/// The reference is either a bare gate id, resolved against the whole strategy,
/// or a full gate path when the id alone is ambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReference {
    pub gate_id: Arc<str>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate_path: Option<GatePath>,
    /// Use the logical complement of the referenced mask
    #[serde(default)]
    pub complement: bool,
}

impl GateReference {
    pub fn new(gate_id: impl Into<Arc<str>>) -> Self {
        Self {
            gate_id: gate_id.into(),
            gate_path: None,
            complement: false,
        }
    }

    pub fn with_path(mut self, gate_path: GatePath) -> Self {
        self.gate_path = Some(gate_path);
        self
    }

    pub fn complemented(mut self) -> Self {
        self.complement = true;
        self
    }
}

impl fmt::Display for GateReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.complement {
            write!(f, "!")?;
        }
        match &self.gate_path {
            Some(path) => write!(f, "{path}"),
            None => write!(f, "{}", self.gate_id),
        }
    }
}

/// The geometry or logic of a gate.
///
/// This is a closed set: the evaluation engine matches on it exhaustively, and
/// only `Boolean` adds dependency edges beyond the parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GateKind {
    /// Hyper-rectangle: one bound pair per dimension
    Rectangle { dimensions: Vec<Dimension> },
    /// Two-dimensional polygon, interior by non-zero winding number
    Polygon {
        dimensions: Vec<Dimension>,
        vertices: Vec<(f64, f64)>,
    },
    /// Mahalanobis ellipsoid in two or more dimensions
    Ellipsoid {
        dimensions: Vec<Dimension>,
        center: Vec<f64>,
        covariance: Vec<Vec<f64>>,
        distance_square: f64,
    },
    /// Collection of mutually exclusive quadrants cut by dividers
    Quadrant {
        dividers: Vec<Divider>,
        quadrants: Vec<Quadrant>,
    },
    /// AND / OR / NOT over other gates
    Boolean {
        operation: BooleanOperation,
        operands: Vec<GateReference>,
    },
}

impl GateKind {
    /// Get a descriptive name for this gate type
    pub fn gate_type_name(&self) -> &'static str {
        match self {
            GateKind::Rectangle { .. } => "RectangleGate",
            GateKind::Polygon { .. } => "PolygonGate",
            GateKind::Ellipsoid { .. } => "EllipsoidGate",
            GateKind::Quadrant { .. } => "QuadrantGate",
            GateKind::Boolean { .. } => "BooleanGate",
        }
    }
}

/// A gate in a gating strategy.
///
/// A gate is identified by its id together with its parent id. The same id may
/// appear under different parents; only the [`GatePath`] is globally unique.
/// Gates are built once and never mutated by evaluation.
///
/// # Example
///
/// ```rust
/// use flow_gating::{Dimension, Gate};
///
/// let lymph = Gate::polygon(
///     "lymph",
///     Some("singlets"),
///     [Dimension::new("FSC-A"), Dimension::new("SSC-A")],
///     vec![(1e4, 1e4), (8e4, 1e4), (8e4, 6e4), (1e4, 6e4)],
/// );
///
/// assert_eq!(lymph.parent.as_deref(), Some("singlets"));
/// assert_eq!(lymph.gate_type_name(), "PolygonGate");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub id: Arc<str>,
    #[serde(default)]
    pub parent: Option<Arc<str>>,
    #[serde(flatten)]
    pub kind: GateKind,
}

impl Gate {
    pub fn new(id: impl Into<Arc<str>>, parent: Option<&str>, kind: GateKind) -> Self {
        Self {
            id: id.into(),
            parent: parent.map(Arc::from),
            kind,
        }
    }

    pub fn rectangle(
        id: impl Into<Arc<str>>,
        parent: Option<&str>,
        dimensions: impl IntoIterator<Item = Dimension>,
    ) -> Self {
        Self::new(
            id,
            parent,
            GateKind::Rectangle {
                dimensions: dimensions.into_iter().collect(),
            },
        )
    }

    pub fn polygon(
        id: impl Into<Arc<str>>,
        parent: Option<&str>,
        dimensions: [Dimension; 2],
        vertices: Vec<(f64, f64)>,
    ) -> Self {
        Self::new(
            id,
            parent,
            GateKind::Polygon {
                dimensions: dimensions.into(),
                vertices,
            },
        )
    }

    pub fn ellipsoid(
        id: impl Into<Arc<str>>,
        parent: Option<&str>,
        dimensions: impl IntoIterator<Item = Dimension>,
        center: Vec<f64>,
        covariance: Vec<Vec<f64>>,
        distance_square: f64,
    ) -> Self {
        Self::new(
            id,
            parent,
            GateKind::Ellipsoid {
                dimensions: dimensions.into_iter().collect(),
                center,
                covariance,
                distance_square,
            },
        )
    }

    pub fn quadrant(
        id: impl Into<Arc<str>>,
        parent: Option<&str>,
        dividers: Vec<Divider>,
        quadrants: Vec<Quadrant>,
    ) -> Self {
        Self::new(id, parent, GateKind::Quadrant { dividers, quadrants })
    }

    pub fn boolean(
        id: impl Into<Arc<str>>,
        parent: Option<&str>,
        operation: BooleanOperation,
        operands: Vec<GateReference>,
    ) -> Self {
        Self::new(
            id,
            parent,
            GateKind::Boolean {
                operation,
                operands,
            },
        )
    }

    pub fn gate_type_name(&self) -> &'static str {
        self.kind.gate_type_name()
    }

    /// Ids of the quadrants when this is a quadrant gate, empty otherwise
    pub fn quadrant_ids(&self) -> Vec<Arc<str>> {
        match &self.kind {
            GateKind::Quadrant { quadrants, .. } => quadrants.iter().map(|q| q.id.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// Check the definition for configuration errors
    pub fn validate(&self) -> Result<()> {
        match &self.kind {
            GateKind::Rectangle { dimensions } => crate::rectangle::validate(&self.id, dimensions),
            GateKind::Polygon {
                dimensions,
                vertices,
            } => crate::polygon::validate(&self.id, dimensions, vertices),
            GateKind::Ellipsoid {
                dimensions,
                center,
                covariance,
                distance_square,
            } => crate::ellipsoid::EllipsoidGeometry::build(
                &self.id,
                dimensions.len(),
                center,
                covariance,
                *distance_square,
            )
            .map(|_| ()),
            GateKind::Quadrant {
                dividers,
                quadrants,
            } => crate::quadrant::validate(&self.id, dividers, quadrants),
            GateKind::Boolean {
                operation,
                operands,
            } => crate::boolean::validate(&self.id, *operation, operands),
        }
    }
}

/// The globally unique key of a gate: ancestor ids from the root, then the gate's own id.
///
/// Paths display and parse as slash-delimited strings, e.g. `/singlets/lymph/live`.
/// A `/` or `\` inside a gate id is escaped with a backslash, so the id
/// `CD4+/CD8-` under `T cells` displays as `/T cells/CD4+\/CD8-`.
///
/// # Example
///
/// ```rust
/// use flow_gating::GatePath;
///
/// let path: GatePath = "/singlets/lymph".parse()?;
/// assert_eq!(path.gate_id(), "lymph");
/// assert_eq!(path.child("live").to_string(), "/singlets/lymph/live");
/// assert_eq!(path.parent().map(|p| p.to_string()), Some("/singlets".to_string()));
/// # Ok::<(), flow_gating::GatingError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatePath(Vec<Arc<str>>);

impl GatePath {
    /// Build a path from its components.
    ///
    /// Returns `None` for an empty component list.
    pub fn new<I, S>(components: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        let components: Vec<Arc<str>> = components.into_iter().map(Into::into).collect();
        if components.is_empty() {
            None
        } else {
            Some(Self(components))
        }
    }

    /// Path of a root-level gate
    pub fn root(gate_id: impl Into<Arc<str>>) -> Self {
        Self(vec![gate_id.into()])
    }

    /// Path of a child of this gate
    pub fn child(&self, gate_id: impl Into<Arc<str>>) -> Self {
        let mut components = self.0.clone();
        components.push(gate_id.into());
        Self(components)
    }

    /// Path of a sibling of this gate
    pub fn sibling(&self, gate_id: impl Into<Arc<str>>) -> Self {
        match self.parent() {
            Some(parent) => parent.child(gate_id),
            None => Self::root(gate_id),
        }
    }

    pub fn gate_id(&self) -> &str {
        // paths are never empty
        self.0.last().map(|s| s.as_ref()).unwrap_or_default()
    }

    /// Ancestor ids, root first
    pub fn ancestors(&self) -> &[Arc<str>] {
        &self.0[..self.0.len() - 1]
    }

    pub fn parent(&self) -> Option<GatePath> {
        if self.0.len() > 1 {
            Some(Self(self.ancestors().to_vec()))
        } else {
            None
        }
    }

    pub fn components(&self) -> &[Arc<str>] {
        &self.0
    }

    /// Number of ancestors (root-level gates have depth 0)
    pub fn depth(&self) -> usize {
        self.0.len() - 1
    }

    pub fn is_descendant_of(&self, other: &GatePath) -> bool {
        self.0.len() > other.0.len() && self.0.starts_with(&other.0)
    }
}

impl fmt::Display for GatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for component in &self.0 {
            f.write_str("/")?;
            for c in component.chars() {
                if c == '/' || c == '\\' {
                    f.write_str("\\")?;
                }
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for GatePath {
    type Err = GatingError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || GatingError::Other {
            message: format!("Invalid gate path '{s}'"),
            source: None,
        };

        let text = s.trim();
        let text = text.strip_prefix('/').unwrap_or(text);
        let mut components: Vec<String> = vec![String::new()];
        let mut chars = text.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    let escaped = chars.next().ok_or_else(invalid)?;
                    if let Some(current) = components.last_mut() {
                        current.push(escaped);
                    }
                }
                '/' => components.push(String::new()),
                _ => {
                    if let Some(current) = components.last_mut() {
                        current.push(c);
                    }
                }
            }
        }

        if components.iter().any(|c| c.is_empty()) {
            return Err(invalid());
        }
        GatePath::new(components).ok_or_else(invalid)
    }
}
