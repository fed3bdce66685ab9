//! Boolean gate reference tracking.
//!
//! This module provides `GateLinks`, which records which boolean gates refer to
//! which populations. This is separate from the hierarchy - links are the extra
//! dependency edges that boolean gates add on top of parent-child relationships.
//!
//! # Linking vs Hierarchy
//!
//! - **Hierarchy**: Parent-child relationships (which events a gate considers)
//! - **Linking**: Boolean operand references (which masks a gate combines)
//!
//! Both ends of a link are full [`GatePath`]s: the population an operand
//! resolves to, and the boolean gate holding the operand. Two populations
//! sharing an id under different parents therefore keep separate link lists.
//!
//! # Example
//!
//! ```rust
//! use flow_gating::{GateLinks, GatePath};
//!
//! let cd4 = GatePath::root("lymph").child("cd4");
//! let mut links = GateLinks::new();
//! links.add_link(cd4.clone(), GatePath::root("lymph").child("cd4_and_cd8"));
//! links.add_link(cd4.clone(), GatePath::root("lymph").child("cd4_not_cd8"));
//!
//! assert_eq!(links.get_links(&cd4).len(), 2);
//! assert!(links.get_links(&GatePath::root("cd4")).is_empty());
//! ```

use crate::types::GatePath;
use rustc_hash::FxHashMap;

/// Manages boolean reference relationships.
///
/// Unlike `GateHierarchy`, links don't restrict events - they describe which
/// masks a boolean gate reads, and therefore which gates must be evaluated first.
#[derive(Debug, Clone, Default)]
pub struct GateLinks {
    /// Maps referenced population path to the paths of gates that reference it
    links: FxHashMap<GatePath, Vec<GatePath>>,
}

impl GateLinks {
    /// Create a new empty `GateLinks` structure
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the gate at `linking_gate` references the population at `target`
    ///
    /// Adding the same link twice is a no-op.
    pub fn add_link(&mut self, target: GatePath, linking_gate: GatePath) {
        let linkers = self.links.entry(target).or_default();
        if !linkers.contains(&linking_gate) {
            linkers.push(linking_gate);
        }
    }

    /// Paths of the gates referencing `target`, in the order they were added
    pub fn get_links(&self, target: &GatePath) -> &[GatePath] {
        self.links
            .get(target)
            .map(|v| v.as_slice())
            .unwrap_or_default()
    }
}
