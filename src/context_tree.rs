//! Calling-context assembler
//!
//! A raw directed graph over bare callsite names (no module grouping), built
//! in the same pass as the aggregate graph from the same normalized paths.
//! Every adjacent-pair transition is recorded as it appears, with no
//! back-edge suppression, so the call-back relationships that the aggregate
//! graph deliberately refuses to materialize stay visible here. Used for
//! cycle diagnostics and as an independent cross-check of the builder; not
//! exposed to the rendering layer.

use fnv::FnvHashMap;
use std::collections::HashSet;

/// Bare callsite-to-callsite call graph. Insertion is idempotent: an edge
/// either exists or it does not, and repeats keep the first weight.
#[derive(Debug, Clone, Default)]
pub struct ContextTree {
    names: Vec<String>,
    ids: FnvHashMap<String, u32>,
    edges: FnvHashMap<(u32, u32), f64>,
    out_edges: Vec<Vec<u32>>,
}

impl ContextTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_node(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.out_edges.push(Vec::new());
        self.ids.insert(name.to_string(), id);
        id
    }

    /// Record one caller → callee transition. `weight` is the callee's
    /// ensemble inclusive time; repeats of an existing edge are no-ops.
    pub fn add_call(&mut self, source: &str, target: &str, weight: f64) {
        let s = self.ensure_node(source);
        let t = self.ensure_node(target);
        if self.edges.contains_key(&(s, t)) {
            return;
        }
        self.edges.insert((s, t), weight);
        self.out_edges[s as usize].push(t);
    }

    pub fn node_count(&self) -> usize {
        self.names.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    pub fn has_call(&self, source: &str, target: &str) -> bool {
        match (self.ids.get(source), self.ids.get(target)) {
            (Some(&s), Some(&t)) => self.edges.contains_key(&(s, t)),
            _ => false,
        }
    }

    pub fn call_weight(&self, source: &str, target: &str) -> Option<f64> {
        let s = self.ids.get(source)?;
        let t = self.ids.get(target)?;
        self.edges.get(&(*s, *t)).copied()
    }

    /// Callee names reachable in one step from `source`.
    pub fn callees(&self, source: &str) -> Vec<&str> {
        match self.ids.get(source) {
            Some(&s) => self.out_edges[s as usize]
                .iter()
                .map(|&t| self.names[t as usize].as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Number of back edges: transitions that close a cycle in a DFS over
    /// the whole graph. Zero for an acyclic ensemble.
    pub fn back_edge_count(&self) -> usize {
        let n = self.names.len();
        let mut visited: HashSet<u32> = HashSet::new();
        let mut on_stack: HashSet<u32> = HashSet::new();
        let mut back_edges = 0;

        for root in 0..n as u32 {
            if visited.contains(&root) {
                continue;
            }
            self.count_back_edges_dfs(root, &mut visited, &mut on_stack, &mut back_edges);
        }
        back_edges
    }

    fn count_back_edges_dfs(
        &self,
        node: u32,
        visited: &mut HashSet<u32>,
        on_stack: &mut HashSet<u32>,
        back_edges: &mut usize,
    ) {
        visited.insert(node);
        on_stack.insert(node);
        for &next in &self.out_edges[node as usize] {
            if on_stack.contains(&next) {
                *back_edges += 1;
            } else if !visited.contains(&next) {
                self.count_back_edges_dfs(next, visited, on_stack, back_edges);
            }
        }
        on_stack.remove(&node);
    }

    pub fn has_cycle(&self) -> bool {
        self.back_edge_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_call_is_idempotent() {
        let mut tree = ContextTree::new();
        tree.add_call("f1", "g1", 4.0);
        tree.add_call("f1", "g1", 9.0);
        assert_eq!(tree.edge_count(), 1);
        assert_eq!(tree.call_weight("f1", "g1"), Some(4.0));
    }

    #[test]
    fn test_back_edges_are_recorded_not_suppressed() {
        let mut tree = ContextTree::new();
        tree.add_call("f1", "g1", 1.0);
        tree.add_call("g1", "f1", 1.0);
        assert_eq!(tree.edge_count(), 2);
        assert!(tree.has_cycle());
        assert_eq!(tree.back_edge_count(), 1);
    }

    #[test]
    fn test_acyclic_chain() {
        let mut tree = ContextTree::new();
        tree.add_call("f1", "f2", 1.0);
        tree.add_call("f2", "g1", 1.0);
        assert!(!tree.has_cycle());
        assert_eq!(tree.callees("f1"), ["f2"]);
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn test_unknown_nodes() {
        let tree = ContextTree::new();
        assert!(!tree.has_call("a", "b"));
        assert!(tree.callees("a").is_empty());
    }
}
