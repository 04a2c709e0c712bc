//! Reveal and split post-processing
//!
//! The aggregate graph collapses every module to one super-node. Consumers
//! can selectively re-expand it:
//!
//! - [`RevealEngine::add_reveal_paths`] re-expands a set of explicitly named
//!   callsites along their component paths, adding component-nodes and
//!   reveal edges next to the existing graph.
//! - [`RevealEngine::add_entry_callsite_paths`] fully splits one module:
//!   every edge touching its super-node is rewritten onto the matching
//!   entry-callsite component-node and the super-node is removed.
//!
//! Both operations mutate the graph in place, are idempotent for the same
//! input, and treat a callsite or module with no underlying data as a
//! per-item no-op; a bad name never aborts the batch. Dropping the reveal
//! set and rebuilding restores the collapsed graph.

use crate::call_path::MODULE_SEPARATOR;
use crate::ensemble_metrics::MetricsMap;
use crate::graph_builder::component_node_metrics;
use crate::profile_record::RecordTable;
use crate::supergraph::{
    AggregateEdge, EdgeOccurrence, EdgeType, NodeId, NodeKind, Result, Supergraph,
};
use tracing::debug;

/// Counters for reveal/split inputs that had no underlying data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevealDiagnostics {
    /// Requested callsites with no module/component-path data.
    pub unknown_callsites: usize,
    /// Component-path pairs skipped because inserting them would have
    /// created a 2-cycle (recursive component chains).
    pub skipped_pairs: usize,
}

/// Post-processor over a finished graph, backed by the same table and
/// metrics the graph was built from.
pub struct RevealEngine<'a> {
    table: &'a RecordTable,
    metrics: &'a MetricsMap,
}

impl<'a> RevealEngine<'a> {
    pub fn new(table: &'a RecordTable, metrics: &'a MetricsMap) -> Self {
        Self { table, metrics }
    }

    /// Re-expand the named callsites out of their modules' collapsed
    /// representation.
    ///
    /// Each callsite's component path is walked pairwise; every pair not
    /// already present becomes a reveal edge between component-nodes. The
    /// first pair is sourced from the module's super-node, since the module
    /// itself is the entry.
    pub fn add_reveal_paths(
        &self,
        graph: &mut Supergraph,
        callsites: &[String],
    ) -> Result<RevealDiagnostics> {
        let mut diagnostics = RevealDiagnostics::default();

        for callsite in callsites {
            let Some(component_path) = self.component_path_of(callsite) else {
                debug!(%callsite, "no component path data; reveal skipped");
                diagnostics.unknown_callsites += 1;
                continue;
            };
            let module = component_path[0].clone();

            for (i, pair) in component_path.windows(2).enumerate() {
                let (source_name, target_name) = (&pair[0], &pair[1]);
                let source_id = if i == 0 {
                    // The module itself is the entry into the component path.
                    graph.ensure_node(&module, NodeKind::SuperNode, &module, &module)?
                } else {
                    self.ensure_component(graph, &module, source_name)?
                };
                let target_id = self.ensure_component(graph, &module, target_name)?;

                if source_id == target_id || graph.has_edge(source_id, target_id) {
                    continue;
                }
                if graph.has_edge(target_id, source_id) {
                    diagnostics.skipped_pairs += 1;
                    continue;
                }

                let weights = self
                    .metrics
                    .ensemble_callsite(&module, target_name)
                    .unwrap_or_default();
                let runs: Vec<String> = self
                    .metrics
                    .runs_with_callsite(&module, target_name)
                    .map(String::from)
                    .collect();
                let mut edge = AggregateEdge::new(
                    source_id,
                    target_id,
                    EdgeOccurrence {
                        source_callsite: source_name.clone(),
                        target_callsite: target_name.clone(),
                        edge_type: EdgeType::Reveal,
                        weight: weights.inclusive,
                        exc_weight: weights.exclusive,
                        source_runs: runs.clone(),
                        target_runs: runs,
                    },
                );
                edge.finalize();
                graph.insert_edge(edge)?;
            }
        }
        Ok(diagnostics)
    }

    /// Fully split `module` into its entry-callsite component-nodes.
    ///
    /// Entry callsites are derived from the edges whose target is the
    /// module. Every incident edge is removed and re-inserted against the
    /// matching component-node with its weight recomputed from the metrics
    /// map; afterwards the now-unused super-node is removed. A module that
    /// is absent, already split, or has no incoming edges is a no-op.
    pub fn add_entry_callsite_paths(&self, graph: &mut Supergraph, module: &str) -> Result<()> {
        let Some(super_id) = graph.node_id(module) else {
            debug!(module, "module not in graph or already split; no-op");
            return Ok(());
        };
        if graph.node(super_id).map(|n| n.kind) != Some(NodeKind::SuperNode) {
            return Ok(());
        }

        let entry_callsites = self.entry_callsites_of(graph, super_id, module);
        if entry_callsites.is_empty() {
            debug!(module, "no entry callsites; split skipped");
            return Ok(());
        }

        let incident = graph.incident_edges(super_id);
        let mut removed: Vec<AggregateEdge> = Vec::with_capacity(incident.len());
        for (source, target) in incident {
            if let Some(edge) = graph.remove_edge(source, target) {
                removed.push(edge);
            }
        }

        for edge in removed {
            if edge.target == super_id {
                self.rewrite_incoming(graph, module, &entry_callsites, edge)?;
            } else {
                self.rewrite_outgoing(graph, module, &entry_callsites, edge)?;
            }
        }

        graph.remove_node(super_id)?;
        graph.finalize_edges();
        Ok(())
    }

    /// First record carrying a usable component path for `callsite`.
    fn component_path_of(&self, callsite: &str) -> Option<Vec<String>> {
        self.table
            .records()
            .iter()
            .filter(|r| r.callsite == callsite)
            .find_map(|r| {
                r.component_path
                    .as_ref()
                    .filter(|path| path.len() >= 2)
                    .cloned()
            })
    }

    fn ensure_component(
        &self,
        graph: &mut Supergraph,
        module: &str,
        callsite: &str,
    ) -> Result<NodeId> {
        let key = format!("{module}{MODULE_SEPARATOR}{callsite}");
        let id = graph.ensure_node(&key, NodeKind::ComponentNode, callsite, module)?;
        let (ensemble, runs) = component_node_metrics(self.metrics, module, callsite);
        if let Some(metrics) = ensemble {
            let node = graph.node_mut(id).expect("live component node");
            node.metrics = metrics;
            node.runs = runs;
        }
        Ok(id)
    }

    /// Entry callsites of a module: distinct `entry_callsites` across the
    /// edges targeting its super-node, restricted to callsites that really
    /// belong to the module.
    fn entry_callsites_of(
        &self,
        graph: &Supergraph,
        super_id: NodeId,
        module: &str,
    ) -> Vec<String> {
        let mut entries: Vec<String> = graph
            .in_neighbors(super_id)
            .iter()
            .filter_map(|&source| graph.edge(source, super_id))
            .flat_map(|edge| edge.entry_callsites.iter().cloned())
            .filter(|callsite| self.metrics.ensemble_callsite(module, callsite).is_some())
            .collect();
        entries.sort_unstable();
        entries.dedup();
        entries
    }

    /// Re-route an incoming edge onto the entry-callsite component-nodes.
    /// Occurrences are routed by their target callsite; attributions that
    /// match no entry callsite (callback provenance) are preserved on the
    /// first entry component so nothing is lost.
    fn rewrite_incoming(
        &self,
        graph: &mut Supergraph,
        module: &str,
        entry_callsites: &[String],
        edge: AggregateEdge,
    ) -> Result<()> {
        for entry in entry_callsites {
            let mut occurrences: Vec<EdgeOccurrence> = edge
                .occurrences
                .iter()
                .filter(|o| &o.target_callsite == entry)
                .cloned()
                .collect();
            if entry == &entry_callsites[0] {
                occurrences.extend(
                    edge.occurrences
                        .iter()
                        .filter(|o| !entry_callsites.contains(&o.target_callsite))
                        .cloned(),
                );
            }
            if occurrences.is_empty() {
                continue;
            }

            let weights = self
                .metrics
                .ensemble_callsite(module, entry)
                .unwrap_or_default();
            for occurrence in &mut occurrences {
                if occurrence.edge_type != EdgeType::Callback {
                    occurrence.weight = weights.inclusive;
                    occurrence.exc_weight = weights.exclusive;
                }
            }

            let component = self.ensure_component(graph, module, entry)?;
            self.insert_rewritten(graph, edge.source, component, occurrences)?;
        }
        Ok(())
    }

    /// Re-source an outgoing edge from every entry component: the module's
    /// components stand in for the whole expanded module.
    fn rewrite_outgoing(
        &self,
        graph: &mut Supergraph,
        module: &str,
        entry_callsites: &[String],
        edge: AggregateEdge,
    ) -> Result<()> {
        for entry in entry_callsites {
            let component = self.ensure_component(graph, module, entry)?;
            self.insert_rewritten(graph, component, edge.target, edge.occurrences.clone())?;
        }
        Ok(())
    }

    /// Insert a rewritten edge, merging with an edge already present
    /// between the endpoints (repeated splits stay idempotent).
    fn insert_rewritten(
        &self,
        graph: &mut Supergraph,
        source: NodeId,
        target: NodeId,
        occurrences: Vec<EdgeOccurrence>,
    ) -> Result<()> {
        if source == target {
            return Ok(());
        }
        if let Some(existing) = graph.edge_mut(source, target) {
            for occurrence in occurrences {
                if !existing.occurrences.contains(&occurrence) {
                    existing.occurrences.push(occurrence);
                }
            }
            existing.finalize();
            return Ok(());
        }
        let mut occurrences = occurrences.into_iter();
        let first = occurrences.next().expect("rewritten edge has occurrences");
        let mut edge = AggregateEdge::new(source, target, first);
        edge.occurrences.extend(occurrences);
        edge.finalize();
        graph.insert_edge(edge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble_metrics::MetricsMap;
    use crate::graph_builder::{BuildResult, GraphBuilder};
    use crate::profile_record::{Record, RecordTable};

    fn record(run: &str, callsite: &str, module: &str, inc: f64, exc: f64, path: &[&str]) -> Record {
        Record {
            run: run.to_string(),
            callsite: callsite.to_string(),
            module: module.to_string(),
            time_inc: inc,
            time_exc: exc,
            rank: 0,
            path: path.iter().map(|s| s.to_string()).collect(),
            group_path: None,
            component_path: None,
        }
    }

    fn fixture() -> (RecordTable, MetricsMap, BuildResult) {
        let mut table = RecordTable::new(vec![
            record("run-0", "f1", "ModA", 10.0, 2.0, &["ModA=f1"]),
            record("run-0", "g1", "ModB", 6.0, 1.0, &["ModA=f1", "ModB=g1"]),
            record(
                "run-0",
                "g2",
                "ModB",
                4.0,
                2.0,
                &["ModA=f1", "ModB=g1", "ModB=g2"],
            ),
            record(
                "run-0",
                "h1",
                "ModC",
                2.0,
                1.0,
                &["ModA=f1", "ModB=g1", "ModB=g2", "ModC=h1"],
            ),
        ]);
        table.prepare();
        let metrics = MetricsMap::from_table(&table);
        let result = GraphBuilder::new(&table, &metrics).build().unwrap();
        (table, metrics, result)
    }

    #[test]
    fn test_reveal_adds_component_chain() {
        let (table, metrics, mut result) = fixture();
        let engine = RevealEngine::new(&table, &metrics);
        let diagnostics = engine
            .add_reveal_paths(&mut result.graph, &["g2".to_string()])
            .unwrap();
        assert_eq!(diagnostics.unknown_callsites, 0);

        let graph = &result.graph;
        // Component path of g2 is [ModB, g1, g2]: super-node -> g1 -> g2.
        let super_node = graph.node_id("ModB").unwrap();
        let g1 = graph.node_id("ModB=g1").unwrap();
        let g2 = graph.node_id("ModB=g2").unwrap();
        assert_eq!(graph.node_by_key("ModB=g1").unwrap().kind, NodeKind::ComponentNode);

        let reveal = graph.edge(super_node, g1).unwrap();
        assert_eq!(reveal.edge_type, EdgeType::Reveal);
        assert_eq!(reveal.weight, 6.0);
        let reveal = graph.edge(g1, g2).unwrap();
        assert_eq!(reveal.edge_type, EdgeType::Reveal);
        assert_eq!(reveal.weight, 4.0);

        // Component node carries callsite-level metrics.
        assert_eq!(graph.node(g2).unwrap().metrics.time_inc, 4.0);
    }

    #[test]
    fn test_reveal_is_idempotent() {
        let (table, metrics, mut result) = fixture();
        let engine = RevealEngine::new(&table, &metrics);
        engine
            .add_reveal_paths(&mut result.graph, &["g2".to_string()])
            .unwrap();
        let nodes = result.graph.node_count();
        let edges = result.graph.edge_count();
        engine
            .add_reveal_paths(&mut result.graph, &["g2".to_string()])
            .unwrap();
        assert_eq!(result.graph.node_count(), nodes);
        assert_eq!(result.graph.edge_count(), edges);
    }

    #[test]
    fn test_reveal_unknown_callsite_is_noop() {
        let (table, metrics, mut result) = fixture();
        let engine = RevealEngine::new(&table, &metrics);
        let nodes = result.graph.node_count();
        let diagnostics = engine
            .add_reveal_paths(&mut result.graph, &["nope".to_string(), "g2".to_string()])
            .unwrap();
        // The bad name is counted; the good one still lands.
        assert_eq!(diagnostics.unknown_callsites, 1);
        assert!(result.graph.node_count() > nodes);
    }

    #[test]
    fn test_split_rewrites_incident_edges_and_removes_super_node() {
        let (table, metrics, mut result) = fixture();
        let engine = RevealEngine::new(&table, &metrics);
        engine
            .add_entry_callsite_paths(&mut result.graph, "ModB")
            .unwrap();

        let graph = &result.graph;
        assert!(graph.node_by_key("ModB").is_none());
        let a = graph.node_id("ModA").unwrap();
        let g1 = graph.node_id("ModB=g1").unwrap();
        let c = graph.node_id("ModC").unwrap();

        // Incoming edge A -> B re-targeted at the entry component; per
        // occurrence weight recomputed for the component (6.0, three
        // traversing paths).
        let incoming = graph.edge(a, g1).unwrap();
        assert_eq!(incoming.occurrences.len(), 3);
        assert_eq!(incoming.weight, 18.0);
        assert_eq!(incoming.entry_callsites, ["g1"]);

        // Outgoing edge B -> C re-sourced from the entry component.
        let outgoing = graph.edge(g1, c).unwrap();
        assert_eq!(outgoing.exit_callsites, ["g2"]);
    }

    #[test]
    fn test_split_is_idempotent() {
        let (table, metrics, mut result) = fixture();
        let engine = RevealEngine::new(&table, &metrics);
        engine
            .add_entry_callsite_paths(&mut result.graph, "ModB")
            .unwrap();
        let nodes = result.graph.node_count();
        let edges = result.graph.edge_count();
        // Second split of the same module: super-node is gone, no-op.
        engine
            .add_entry_callsite_paths(&mut result.graph, "ModB")
            .unwrap();
        assert_eq!(result.graph.node_count(), nodes);
        assert_eq!(result.graph.edge_count(), edges);
    }

    #[test]
    fn test_split_unknown_module_is_noop() {
        let (table, metrics, mut result) = fixture();
        let engine = RevealEngine::new(&table, &metrics);
        let nodes = result.graph.node_count();
        engine
            .add_entry_callsite_paths(&mut result.graph, "Nope")
            .unwrap();
        assert_eq!(result.graph.node_count(), nodes);
    }
}
