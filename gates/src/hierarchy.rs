use crate::types::GatePath;
use rustc_hash::FxHashMap;

/// Parent-child relationships between gate populations.
///
/// Nodes are keyed by [`GatePath`], so the parent of a node is always its path
/// prefix and the hierarchy is a forest by construction. Child and root lists
/// keep insertion order, which is the order gates were added to the strategy.
///
/// Quadrant gates do not appear as nodes themselves: each of their quadrants
/// is a node under the quadrant gate's parent.
///
/// # Example
///
/// ```rust
/// use flow_gating::{GateHierarchy, GatePath};
///
/// let root = GatePath::root("singlets");
/// let lymph = root.child("lymph");
/// let live = lymph.child("live");
///
/// let mut hierarchy = GateHierarchy::new();
/// assert!(hierarchy.add_node(root.clone()));
/// assert!(hierarchy.add_node(lymph.clone()));
/// assert!(hierarchy.add_node(live.clone()));
///
/// assert_eq!(hierarchy.get_children(&lymph), &[live.clone()]);
/// assert_eq!(hierarchy.depth_first(), vec![root, lymph, live.clone()]);
/// assert!(!hierarchy.add_node(live)); // already present
/// ```
#[derive(Debug, Clone, Default)]
pub struct GateHierarchy {
    /// Maps parent path to child paths in insertion order
    children: FxHashMap<GatePath, Vec<GatePath>>,
    /// All nodes in insertion order
    nodes: Vec<GatePath>,
    roots: Vec<GatePath>,
}

impl GateHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node under its path parent
    ///
    /// Returns `false` if the path is already present.
    pub fn add_node(&mut self, path: GatePath) -> bool {
        if self.contains(&path) {
            return false;
        }

        match path.parent() {
            Some(parent) => self.children.entry(parent).or_default().push(path.clone()),
            None => self.roots.push(path.clone()),
        }
        self.children.entry(path.clone()).or_default();
        self.nodes.push(path);
        true
    }

    pub fn contains(&self, path: &GatePath) -> bool {
        // every node owns a (possibly empty) child list
        self.children.contains_key(path)
    }

    /// Get the children of a node
    pub fn get_children(&self, path: &GatePath) -> &[GatePath] {
        self.children.get(path).map(|v| v.as_slice()).unwrap_or_default()
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> &[GatePath] {
        &self.nodes
    }

    /// Depth-first walk from each root, children in insertion order
    pub fn depth_first(&self) -> Vec<GatePath> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&GatePath> = self.roots.iter().rev().collect();

        while let Some(node) = stack.pop() {
            order.push(node.clone());
            stack.extend(self.get_children(node).iter().rev());
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> GatePath {
        s.parse().expect("valid path")
    }

    #[test]
    fn test_add_node() {
        let mut hierarchy = GateHierarchy::new();
        assert!(hierarchy.add_node(path("/parent")));
        assert!(hierarchy.add_node(path("/parent/child")));
        assert!(!hierarchy.add_node(path("/parent/child")));

        assert_eq!(hierarchy.get_children(&path("/parent")), &[path("/parent/child")]);
        assert!(hierarchy.get_children(&path("/parent/child")).is_empty());
    }

    #[test]
    fn test_same_id_under_different_parents() {
        let mut hierarchy = GateHierarchy::new();
        hierarchy.add_node(path("/a"));
        hierarchy.add_node(path("/b"));
        assert!(hierarchy.add_node(path("/a/live")));
        assert!(hierarchy.add_node(path("/b/live")));
        assert_eq!(hierarchy.nodes().len(), 4);
    }

    #[test]
    fn test_depth_first_keeps_insertion_order() {
        let mut hierarchy = GateHierarchy::new();
        for p in ["/a", "/b", "/a/c", "/b/d", "/a/e"] {
            hierarchy.add_node(path(p));
        }
        let order: Vec<String> = hierarchy.depth_first().iter().map(|p| p.to_string()).collect();
        assert_eq!(order, vec!["/a", "/a/c", "/a/e", "/b", "/b/d"]);
    }
}
