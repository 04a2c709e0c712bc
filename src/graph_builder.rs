//! Aggregate graph construction
//!
//! Consumes the prepared record table grouped by `(callsite, group path)`
//! and emits the module-level supergraph plus the bare-callsite context
//! tree, in one deterministic pass.
//!
//! # Algorithm
//!
//! ```text
//! 1. Bucket records by (callsite, group path); collect each bucket's runs.
//! 2. Per bucket: normalize the representative raw path, remap teardown
//!    callsites to the sentinel module, collapse to group steps.
//! 3. Per adjacent step pair (source, target), per run in the bucket:
//!      neither direction exists  -> create nodes + caller edge
//!      caller edge exists        -> append occurrence to it
//!      callback edge exists      -> append weight-0 callback occurrence to
//!                                   the existing reverse edge; insert no
//!                                   new edge (no 2-cycles in the module
//!                                   graph; the context tree keeps the
//!                                   back transition)
//! 4. Finalize edges (type, weight sums, entry/exit callsite sets).
//! 5. Attach ensemble and per-run metrics to every node.
//! ```
//!
//! Per-record problems (malformed paths, missing metrics) are skipped at
//! the smallest scope and counted in [`BuildDiagnostics`]; only structural
//! invariant violations abort the build.

use crate::call_path::{self, GroupStep, NormalizedPath};
use crate::context_tree::ContextTree;
use crate::ensemble_metrics::MetricsMap;
use crate::profile_record::RecordTable;
use crate::reveal::RevealEngine;
use crate::supergraph::{
    AggregateEdge, EdgeOccurrence, EdgeType, NodeKind, NodeMetrics, Result, Supergraph,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Raw callsite token denoting end-of-program teardown. Such calls have no
/// meaningful caller module and are remapped to [`TEARDOWN_MODULE`] before
/// edge creation. Fixed rule, not user-configurable.
pub const TEARDOWN_CALLSITE: &str = "exit";

/// Sentinel module that owns remapped teardown callsites.
pub const TEARDOWN_MODULE: &str = "exit";

/// Construction request: which runs to include and which reveal/split
/// post-processing to apply. An empty run set means the full ensemble.
#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
    pub runs: Vec<String>,
    pub reveal_callsites: Vec<String>,
    pub split_module: Option<String>,
}

/// Counters for inputs skipped during a build. A non-zero count never makes
/// the build partial: everything that could be aggregated was.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildDiagnostics {
    /// Records whose raw path was empty or malformed.
    pub skipped_records: usize,
    /// Adjacent step pairs dropped (e.g. self-pairs after teardown remap).
    pub skipped_pairs: usize,
    /// Metric lookups that found no data (weight fell back to zero).
    pub missing_metric_lookups: usize,
}

/// Everything one construction pass produces.
#[derive(Debug)]
pub struct BuildResult {
    pub graph: Supergraph,
    pub context_tree: ContextTree,
    pub diagnostics: BuildDiagnostics,
}

/// One-shot builder over a prepared table and its metrics.
pub struct GraphBuilder<'a> {
    table: &'a RecordTable,
    metrics: &'a MetricsMap,
}

struct PathBucket {
    path: Vec<String>,
    runs: BTreeSet<String>,
}

impl<'a> GraphBuilder<'a> {
    /// The table must have gone through [`RecordTable::prepare`]; records
    /// without a derived group path are counted as skipped.
    pub fn new(table: &'a RecordTable, metrics: &'a MetricsMap) -> Self {
        Self { table, metrics }
    }

    /// Run the construction pass.
    ///
    /// # Errors
    ///
    /// Only structural invariant violations ([`crate::supergraph::SupergraphError`]).
    pub fn build(&self) -> Result<BuildResult> {
        let mut diagnostics = BuildDiagnostics::default();
        let buckets = self.bucket_records(&mut diagnostics);
        debug!(
            buckets = buckets.len(),
            skipped = diagnostics.skipped_records,
            "grouped record table"
        );

        let mut graph = Supergraph::new();
        let mut context_tree = ContextTree::new();

        for ((_callsite, _group_path), bucket) in &buckets {
            let mut normalized = call_path::normalize_path(&bucket.path);
            if normalized.is_empty() {
                // Grouping only admits records with a derived group path, so
                // re-normalization of the representative cannot fail.
                diagnostics.skipped_records += 1;
                continue;
            }
            remap_teardown(&mut normalized);

            self.feed_context_tree(&mut context_tree, &normalized);

            let steps = call_path::group_steps(&normalized);
            for pair in steps.windows(2) {
                self.add_step_pair(&mut graph, &pair[0], &pair[1], bucket, &mut diagnostics)?;
            }
        }

        graph.finalize_edges();
        self.attach_node_metrics(&mut graph, &mut diagnostics);

        if diagnostics.skipped_records > 0 || diagnostics.missing_metric_lookups > 0 {
            warn!(
                skipped_records = diagnostics.skipped_records,
                skipped_pairs = diagnostics.skipped_pairs,
                missing_metric_lookups = diagnostics.missing_metric_lookups,
                "build completed with skipped inputs"
            );
        }

        Ok(BuildResult {
            graph,
            context_tree,
            diagnostics,
        })
    }

    /// Bucket records by `(callsite, group path)`, deterministically
    /// ordered, remembering each bucket's run set.
    fn bucket_records(
        &self,
        diagnostics: &mut BuildDiagnostics,
    ) -> BTreeMap<(String, String), PathBucket> {
        let mut buckets: BTreeMap<(String, String), PathBucket> = BTreeMap::new();
        for record in self.table.records() {
            let Some(group_path) = record.group_path.clone() else {
                diagnostics.skipped_records += 1;
                continue;
            };
            let bucket = buckets
                .entry((record.callsite.clone(), group_path))
                .or_insert_with(|| PathBucket {
                    path: record.path.clone(),
                    runs: BTreeSet::new(),
                });
            bucket.runs.insert(record.run.clone());
        }
        buckets
    }

    /// Record every adjacent callsite transition of one normalized path.
    fn feed_context_tree(&self, tree: &mut ContextTree, path: &NormalizedPath) {
        for pair in path.windows(2) {
            let target = &pair[1];
            let weight = self
                .metrics
                .ensemble_callsite(call_path::base_module(&target.module), &target.callsite)
                .map(|p| p.inclusive)
                .unwrap_or(0.0);
            tree.add_call(&pair[0].callsite, &target.callsite, weight);
        }
    }

    fn add_step_pair(
        &self,
        graph: &mut Supergraph,
        source: &GroupStep,
        target: &GroupStep,
        bucket: &PathBucket,
        diagnostics: &mut BuildDiagnostics,
    ) -> Result<()> {
        if source.key == target.key {
            // Possible after the teardown remap collapses adjacent steps.
            diagnostics.skipped_pairs += 1;
            return Ok(());
        }

        let weights = match self
            .metrics
            .ensemble_callsite(&target.module, &target.first_callsite)
        {
            Some(pair) => pair,
            None => {
                diagnostics.missing_metric_lookups += 1;
                Default::default()
            }
        };

        for run in &bucket.runs {
            let source_id = graph.node_id(&source.key);
            let target_id = graph.node_id(&target.key);
            let has_caller = matches!((source_id, target_id), (Some(s), Some(t)) if graph.has_edge(s, t));
            let has_callback = matches!((source_id, target_id), (Some(s), Some(t)) if graph.has_edge(t, s));

            if has_callback {
                // The reverse direction was recorded first: keep the
                // attribution but insert no edge, so the module graph stays
                // free of 2-cycles.
                let (s, t) = (source_id.expect("callback edge"), target_id.expect("callback edge"));
                let edge = graph.edge_mut(t, s).expect("callback edge");
                edge.occurrences.push(EdgeOccurrence {
                    source_callsite: source.last_callsite.clone(),
                    target_callsite: target.first_callsite.clone(),
                    edge_type: EdgeType::Callback,
                    weight: 0.0,
                    exc_weight: 0.0,
                    source_runs: vec![run.clone()],
                    target_runs: vec![run.clone()],
                });
                continue;
            }

            let occurrence = EdgeOccurrence {
                source_callsite: source.last_callsite.clone(),
                target_callsite: target.first_callsite.clone(),
                edge_type: EdgeType::Caller,
                weight: weights.inclusive,
                exc_weight: weights.exclusive,
                source_runs: vec![run.clone()],
                target_runs: vec![run.clone()],
            };

            if has_caller {
                let (s, t) = (source_id.expect("caller edge"), target_id.expect("caller edge"));
                graph.edge_mut(s, t).expect("caller edge").occurrences.push(occurrence);
            } else {
                let s = graph.ensure_node(&source.key, NodeKind::SuperNode, &source.key, &source.module)?;
                let t = graph.ensure_node(&target.key, NodeKind::SuperNode, &target.key, &target.module)?;
                graph.insert_edge(AggregateEdge::new(s, t, occurrence))?;
            }
        }
        Ok(())
    }

    /// Attach ensemble and per-run timing attributes to every node.
    fn attach_node_metrics(&self, graph: &mut Supergraph, diagnostics: &mut BuildDiagnostics) {
        let nodes: Vec<_> = graph
            .nodes()
            .map(|n| (n.id, n.kind, n.module.clone(), n.name.clone()))
            .collect();

        for (id, kind, module, name) in nodes {
            let (ensemble, runs) = match kind {
                NodeKind::SuperNode => super_node_metrics(self.metrics, &module),
                NodeKind::ComponentNode => component_node_metrics(self.metrics, &module, &name),
            };
            match ensemble {
                Some(metrics) => {
                    let node = graph.node_mut(id).expect("live node");
                    node.metrics = metrics;
                    node.runs = runs;
                }
                None => diagnostics.missing_metric_lookups += 1,
            }
        }
    }
}

/// Replace the module key of teardown callsites with the sentinel module.
fn remap_teardown(path: &mut NormalizedPath) {
    for entry in path {
        if entry.callsite == TEARDOWN_CALLSITE {
            entry.module = TEARDOWN_MODULE.to_string();
        }
    }
}

/// Ensemble + per-run metrics for a whole-module super-node.
pub(crate) fn super_node_metrics(
    metrics: &MetricsMap,
    module: &str,
) -> (Option<NodeMetrics>, BTreeMap<String, NodeMetrics>) {
    let ensemble = metrics.ensemble_module(module).map(|pair| NodeMetrics {
        time_inc: pair.inclusive,
        time_exc: pair.exclusive,
        actual_time: pair,
    });
    let run_names: Vec<String> = metrics.runs_with_module(module).map(String::from).collect();
    let mut runs = BTreeMap::new();
    for run in run_names {
        if let Some(pair) = metrics.target_module(&run, module) {
            runs.insert(
                run,
                NodeMetrics {
                    time_inc: pair.inclusive,
                    time_exc: pair.exclusive,
                    actual_time: pair,
                },
            );
        }
    }
    (ensemble, runs)
}

/// Ensemble + per-run metrics for a revealed-callsite component-node.
pub(crate) fn component_node_metrics(
    metrics: &MetricsMap,
    module: &str,
    callsite: &str,
) -> (Option<NodeMetrics>, BTreeMap<String, NodeMetrics>) {
    let ensemble = metrics
        .ensemble_callsite(module, callsite)
        .map(|pair| NodeMetrics {
            time_inc: pair.inclusive,
            time_exc: pair.exclusive,
            actual_time: pair,
        });
    let run_names: Vec<String> = metrics
        .runs_with_callsite(module, callsite)
        .map(String::from)
        .collect();
    let mut runs = BTreeMap::new();
    for run in run_names {
        if let Some(pair) = metrics.target_callsite(&run, module, callsite) {
            runs.insert(
                run,
                NodeMetrics {
                    time_inc: pair.inclusive,
                    time_exc: pair.exclusive,
                    actual_time: pair,
                },
            );
        }
    }
    (ensemble, runs)
}

/// Full construction pipeline for one request: restrict to the configured
/// runs, prepare paths, aggregate metrics, build the graph, then apply the
/// configured reveal/split post-processing. Rebuilding with a different run
/// set replaces the prior instance wholesale; there is no partial state.
pub fn build_from_config(table: &RecordTable, config: &BuildConfig) -> Result<BuildResult> {
    let mut scoped = table.restrict_to_runs(&config.runs);
    scoped.prepare();
    let metrics = MetricsMap::from_table(&scoped);

    let mut result = GraphBuilder::new(&scoped, &metrics).build()?;

    let engine = RevealEngine::new(&scoped, &metrics);
    if !config.reveal_callsites.is_empty() {
        engine.add_reveal_paths(&mut result.graph, &config.reveal_callsites)?;
    }
    if let Some(module) = &config.split_module {
        engine.add_entry_callsite_paths(&mut result.graph, module)?;
    }
    Ok(result)
}
