//! Aggregate supergraph
//!
//! The module/component-level directed graph produced by the builder and
//! mutated in place by the reveal engine. Nodes live in a dense arena with
//! integer ids; edges are keyed by id pairs in an FNV map with forward and
//! reverse adjacency indexes kept alongside. Node and edge attributes are
//! explicit structs validated at construction time, with no late-bound
//! string-keyed attribute dictionaries.
//!
//! # Node kinds
//!
//! - **Super-node**: one whole module collapsed to a single node
//!   (key = module name).
//! - **Component-node**: one explicitly revealed callsite
//!   (key = `module=callsite`).
//!
//! The node set is a partition: a callsite is represented by exactly one of
//! the two at any time.
//!
//! # Structural invariants
//!
//! Enforced here, not in the builder, so every mutation path is covered:
//!
//! - a key registered as a super-node can never be re-registered as a
//!   component-node (and vice versa): [`SupergraphError::NodeKindCollision`];
//! - inserting edge `(A, B)` while `(B, A)` exists is refused:
//!   [`SupergraphError::TwoCycle`]. Back transitions are recorded as
//!   callback occurrences on the forward edge instead.
//!
//! Violating either aborts the whole construction; per-record problems never
//! reach this layer (they are skipped and counted upstream).

use crate::ensemble_metrics::TimePair;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that abort a construction or mutation pass.
#[derive(Error, Debug)]
pub enum SupergraphError {
    #[error("edge {src} -> {target} would form a two-cycle: the reverse edge already exists")]
    TwoCycle { src: String, target: String },

    #[error("node key '{key}' is already registered with a different kind")]
    NodeKindCollision { key: String },

    #[error("unknown node id {0}")]
    UnknownNode(u32),
}

pub type Result<T> = std::result::Result<T, SupergraphError>;

/// Dense arena index of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    SuperNode,
    ComponentNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Caller,
    Callback,
    #[serde(rename = "reveal_edge")]
    Reveal,
}

/// Timing attributes attached to a node, ensemble-wide or scoped to one run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeMetrics {
    /// Inclusive time.
    pub time_inc: f64,
    /// Exclusive time.
    pub time_exc: f64,
    /// Structured pair: inclusive by max across callsites, exclusive by sum.
    pub actual_time: TimePair,
}

/// One node of the aggregate graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateNode {
    pub id: NodeId,
    /// Unique key: module name for a super-node, `module=callsite` for a
    /// component-node.
    pub key: String,
    /// Display name: the module for a super-node, the callsite for a
    /// component-node.
    pub name: String,
    /// Base module the node belongs to.
    pub module: String,
    pub kind: NodeKind,
    /// Ensemble timing attributes.
    pub metrics: NodeMetrics,
    /// Per-run timing attributes; only runs where the module/callsite is
    /// present appear.
    pub runs: BTreeMap<String, NodeMetrics>,
    #[serde(skip)]
    removed: bool,
}

/// One traversal of a module-to-module transition by one run/path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeOccurrence {
    pub source_callsite: String,
    pub target_callsite: String,
    pub edge_type: EdgeType,
    /// Target's ensemble inclusive time; 0 for callback occurrences.
    pub weight: f64,
    /// Exclusive-time counterpart of `weight`.
    pub exc_weight: f64,
    pub source_runs: Vec<String>,
    pub target_runs: Vec<String>,
}

/// One directed edge between two aggregate nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateEdge {
    pub source: NodeId,
    pub target: NodeId,
    /// Type of the first occurrence recorded.
    pub edge_type: EdgeType,
    /// Sum of all occurrence weights.
    pub weight: f64,
    /// Sum of all occurrence exclusive weights.
    pub exc_weight: f64,
    /// Distinct target callsite names across all occurrences, sorted.
    pub entry_callsites: Vec<String>,
    /// Distinct source callsite names across all occurrences, sorted.
    pub exit_callsites: Vec<String>,
    pub occurrences: Vec<EdgeOccurrence>,
}

impl AggregateEdge {
    /// Start an edge from its first occurrence. Derived attributes are
    /// filled by [`AggregateEdge::finalize`].
    pub fn new(source: NodeId, target: NodeId, first: EdgeOccurrence) -> Self {
        let edge_type = first.edge_type;
        Self {
            source,
            target,
            edge_type,
            weight: 0.0,
            exc_weight: 0.0,
            entry_callsites: Vec::new(),
            exit_callsites: Vec::new(),
            occurrences: vec![first],
        }
    }

    /// Derive `edge_type`, `weight`, `exc_weight` and the entry/exit
    /// callsite sets from the occurrence list. Idempotent.
    pub fn finalize(&mut self) {
        if let Some(first) = self.occurrences.first() {
            self.edge_type = first.edge_type;
        }
        self.weight = self.occurrences.iter().map(|o| o.weight).sum();
        self.exc_weight = self.occurrences.iter().map(|o| o.exc_weight).sum();

        let mut entries: Vec<String> = self
            .occurrences
            .iter()
            .map(|o| o.target_callsite.clone())
            .collect();
        entries.sort_unstable();
        entries.dedup();
        self.entry_callsites = entries;

        let mut exits: Vec<String> = self
            .occurrences
            .iter()
            .map(|o| o.source_callsite.clone())
            .collect();
        exits.sort_unstable();
        exits.dedup();
        self.exit_callsites = exits;
    }
}

/// The aggregate graph: node arena plus invariant-checked edge map.
#[derive(Debug, Clone, Default)]
pub struct Supergraph {
    nodes: Vec<AggregateNode>,
    key_to_id: FnvHashMap<String, NodeId>,
    edges: FnvHashMap<(NodeId, NodeId), AggregateEdge>,
    out_edges: Vec<Vec<NodeId>>,
    in_edges: Vec<Vec<NodeId>>,
}

impl Supergraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for `key`, creating the node if it does not exist.
    ///
    /// # Errors
    ///
    /// [`SupergraphError::NodeKindCollision`] when `key` is already
    /// registered with a different kind.
    pub fn ensure_node(
        &mut self,
        key: &str,
        kind: NodeKind,
        name: &str,
        module: &str,
    ) -> Result<NodeId> {
        if let Some(&id) = self.key_to_id.get(key) {
            let node = &self.nodes[id.0 as usize];
            if node.kind != kind {
                return Err(SupergraphError::NodeKindCollision {
                    key: key.to_string(),
                });
            }
            return Ok(id);
        }

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(AggregateNode {
            id,
            key: key.to_string(),
            name: name.to_string(),
            module: module.to_string(),
            kind,
            metrics: NodeMetrics::default(),
            runs: BTreeMap::new(),
            removed: false,
        });
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        self.key_to_id.insert(key.to_string(), id);
        Ok(id)
    }

    pub fn node_id(&self, key: &str) -> Option<NodeId> {
        self.key_to_id.get(key).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&AggregateNode> {
        self.nodes.get(id.0 as usize).filter(|n| !n.removed)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut AggregateNode> {
        self.nodes.get_mut(id.0 as usize).filter(|n| !n.removed)
    }

    pub fn node_by_key(&self, key: &str) -> Option<&AggregateNode> {
        self.node_id(key).and_then(|id| self.node(id))
    }

    /// Live nodes, in arena order.
    pub fn nodes(&self) -> impl Iterator<Item = &AggregateNode> {
        self.nodes.iter().filter(|n| !n.removed)
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    pub fn has_edge(&self, source: NodeId, target: NodeId) -> bool {
        self.edges.contains_key(&(source, target))
    }

    pub fn edge(&self, source: NodeId, target: NodeId) -> Option<&AggregateEdge> {
        self.edges.get(&(source, target))
    }

    pub fn edge_mut(&mut self, source: NodeId, target: NodeId) -> Option<&mut AggregateEdge> {
        self.edges.get_mut(&(source, target))
    }

    /// Insert (or replace) an edge.
    ///
    /// # Errors
    ///
    /// [`SupergraphError::TwoCycle`] when the reverse edge exists: the
    /// caller must record a callback occurrence on the forward edge instead.
    pub fn insert_edge(&mut self, edge: AggregateEdge) -> Result<()> {
        let (source, target) = (edge.source, edge.target);
        if self.edges.contains_key(&(target, source)) {
            return Err(SupergraphError::TwoCycle {
                src: self.key_of(source),
                target: self.key_of(target),
            });
        }
        if self.edges.insert((source, target), edge).is_none() {
            self.out_edges[source.0 as usize].push(target);
            self.in_edges[target.0 as usize].push(source);
        }
        Ok(())
    }

    /// Remove an edge, keeping the adjacency indexes consistent.
    pub fn remove_edge(&mut self, source: NodeId, target: NodeId) -> Option<AggregateEdge> {
        let edge = self.edges.remove(&(source, target))?;
        self.out_edges[source.0 as usize].retain(|&t| t != target);
        self.in_edges[target.0 as usize].retain(|&s| s != source);
        Some(edge)
    }

    /// Remove a node from the graph. The caller must have removed or
    /// rewritten every incident edge first.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let idx = id.0 as usize;
        if idx >= self.nodes.len() || self.nodes[idx].removed {
            return Err(SupergraphError::UnknownNode(id.0));
        }
        debug_assert!(self.out_edges[idx].is_empty() && self.in_edges[idx].is_empty());
        self.key_to_id.remove(&self.nodes[idx].key);
        self.nodes[idx].removed = true;
        Ok(())
    }

    /// Edges in unspecified order.
    pub fn edges(&self) -> impl Iterator<Item = &AggregateEdge> {
        self.edges.values()
    }

    /// Edges sorted by (source, target) id, a deterministic order for
    /// serialization and comparison.
    pub fn edges_sorted(&self) -> Vec<&AggregateEdge> {
        let mut all: Vec<&AggregateEdge> = self.edges.values().collect();
        all.sort_by_key(|e| (e.source, e.target));
        all
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn out_neighbors(&self, id: NodeId) -> &[NodeId] {
        &self.out_edges[id.0 as usize]
    }

    pub fn in_neighbors(&self, id: NodeId) -> &[NodeId] {
        &self.in_edges[id.0 as usize]
    }

    /// Every edge touching `id`, as (source, target) pairs, outgoing first.
    pub fn incident_edges(&self, id: NodeId) -> Vec<(NodeId, NodeId)> {
        let mut pairs: Vec<(NodeId, NodeId)> = self
            .out_edges[id.0 as usize]
            .iter()
            .map(|&t| (id, t))
            .collect();
        pairs.extend(self.in_edges[id.0 as usize].iter().map(|&s| (s, id)));
        pairs
    }

    /// Recompute every edge's derived attributes from its occurrence list.
    pub fn finalize_edges(&mut self) {
        for edge in self.edges.values_mut() {
            edge.finalize();
        }
    }

    fn key_of(&self, id: NodeId) -> String {
        self.nodes
            .get(id.0 as usize)
            .map(|n| n.key.clone())
            .unwrap_or_else(|| format!("#{}", id.0))
    }

    /// Flat export of the live graph, deterministically ordered. Carries
    /// every node/edge attribute losslessly; node ids are internal and are
    /// remapped densely on import.
    pub fn to_export(&self) -> SupergraphExport {
        SupergraphExport {
            nodes: self.nodes().cloned().collect(),
            edges: self.edges_sorted().into_iter().cloned().collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_export())
    }

    /// Rebuild a graph from an export, remapping node ids densely.
    pub fn from_export(export: SupergraphExport) -> anyhow::Result<Self> {
        let mut graph = Self::new();
        let mut id_map: FnvHashMap<NodeId, NodeId> = FnvHashMap::default();
        for node in export.nodes {
            let id = graph.ensure_node(&node.key, node.kind, &node.name, &node.module)?;
            let slot = graph.node_mut(id).expect("node just created");
            slot.metrics = node.metrics;
            slot.runs = node.runs;
            id_map.insert(node.id, id);
        }
        for mut edge in export.edges {
            edge.source = *id_map
                .get(&edge.source)
                .ok_or_else(|| anyhow::anyhow!("edge references unknown node {}", edge.source.0))?;
            edge.target = *id_map
                .get(&edge.target)
                .ok_or_else(|| anyhow::anyhow!("edge references unknown node {}", edge.target.0))?;
            graph.insert_edge(edge)?;
        }
        Ok(graph)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let export: SupergraphExport = serde_json::from_str(json)?;
        Self::from_export(export)
    }
}

/// Serializable flat form of a [`Supergraph`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupergraphExport {
    pub nodes: Vec<AggregateNode>,
    pub edges: Vec<AggregateEdge>,
}
