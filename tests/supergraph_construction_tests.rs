//! Integration tests for aggregate supergraph construction
//!
//! Exercises the full pipeline (record table -> metrics -> builder) with
//! realistic multi-run ensembles and the documented cycle scenarios.

use pretty_assertions::assert_eq;
use trazar::ensemble_metrics::MetricsMap;
use trazar::graph_builder::{build_from_config, BuildConfig, BuildResult, GraphBuilder};
use trazar::profile_record::{Record, RecordTable};
use trazar::supergraph::EdgeType;

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

fn build(records: Vec<Record>) -> BuildResult {
    let mut table = RecordTable::new(records);
    table.prepare();
    let metrics = MetricsMap::from_table(&table);
    GraphBuilder::new(&table, &metrics).build().unwrap()
}

#[test]
fn two_runs_same_path_merge_into_one_edge() {
    // Two runs, each with path [ModA=f1, ModA=f2, ModB=g1]: exactly two
    // nodes, one edge ModA -> ModB with two occurrences, no reverse edge.
    let path = ["ModA=f1", "ModA=f2", "ModB=g1"];
    let result = build(vec![
        record("run-0", "g1", "ModB", 5.0, 2.0, &path),
        record("run-1", "g1", "ModB", 4.0, 2.0, &path),
    ]);
    let graph = &result.graph;

    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);

    let a = graph.node_id("ModA").unwrap();
    let b = graph.node_id("ModB").unwrap();
    let edge = graph.edge(a, b).expect("ModA -> ModB");
    assert_eq!(edge.occurrences.len(), 2);
    for occurrence in &edge.occurrences {
        assert_eq!(occurrence.source_callsite, "f2");
        assert_eq!(occurrence.target_callsite, "g1");
    }
    let mut runs: Vec<&str> = edge
        .occurrences
        .iter()
        .flat_map(|o| o.source_runs.iter().map(String::as_str))
        .collect();
    runs.sort_unstable();
    assert_eq!(runs, ["run-0", "run-1"]);
    assert!(graph.edge(b, a).is_none());
}

#[test]
fn back_transition_becomes_callback_occurrence() {
    // Path ModA -> ModB -> ModA: caller edge one way, weight-0 callback
    // occurrence the other, and no second graph edge.
    let result = build(vec![
        record("run-0", "g1", "ModB", 4.0, 1.0, &["ModA=f1", "ModB=g1"]),
        record(
            "run-0",
            "f2",
            "ModA",
            2.0,
            1.0,
            &["ModA=f1", "ModB=g1", "ModA=f2"],
        ),
    ]);
    let graph = &result.graph;
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);

    let a = graph.node_id("ModA").unwrap();
    let b = graph.node_id("ModB").unwrap();
    let edge = graph.edge(a, b).unwrap();
    assert_eq!(edge.edge_type, EdgeType::Caller);

    let callback = edge
        .occurrences
        .iter()
        .find(|o| o.edge_type == EdgeType::Callback)
        .expect("callback occurrence recorded");
    assert_eq!(callback.weight, 0.0);

    // The calling-context tree keeps the back transition as a real edge.
    assert!(result.context_tree.has_call("g1", "f2"));
}

#[test]
fn recursive_callsite_gets_its_own_node() {
    // f1 recursing through ModB: the deeper occurrence is renamed, so the
    // module graph stays a simple chain instead of folding into a cycle.
    let result = build(vec![record(
        "run-0",
        "f1",
        "ModA",
        8.0,
        1.0,
        &["ModA=f1", "ModB=g1", "ModA=f1"],
    )]);
    let graph = &result.graph;
    assert_eq!(graph.node_count(), 3);
    assert!(graph.node_by_key("ModA=f1").is_some());

    let b = graph.node_id("ModB").unwrap();
    let renamed = graph.node_id("ModA=f1").unwrap();
    assert!(graph.edge(b, renamed).is_some());
    // The recursive instance is a caller edge, not a callback.
    assert_eq!(graph.edge(b, renamed).unwrap().edge_type, EdgeType::Caller);

    // The context tree, built from bare callsites, still shows the cycle.
    assert!(result.context_tree.has_cycle());
}

#[test]
fn diverging_paths_share_nodes() {
    let result = build(vec![
        record("run-0", "g1", "ModB", 4.0, 1.0, &["ModA=f1", "ModB=g1"]),
        record("run-0", "h1", "ModC", 3.0, 1.0, &["ModA=f1", "ModC=h1"]),
        record("run-1", "h1", "ModC", 2.0, 1.0, &["ModA=f2", "ModC=h1"]),
    ]);
    let graph = &result.graph;
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.edge_count(), 2);

    let a = graph.node_id("ModA").unwrap();
    let c = graph.node_id("ModC").unwrap();
    let edge = graph.edge(a, c).unwrap();
    // f1 and f2 both exit ModA into ModC.
    assert_eq!(edge.exit_callsites, ["f1", "f2"]);
    assert_eq!(edge.entry_callsites, ["h1"]);
}

#[test]
fn per_run_node_metrics_only_for_present_runs() {
    let result = build(vec![
        record("run-0", "g1", "ModB", 4.0, 1.0, &["ModA=f1", "ModB=g1"]),
        record("run-0", "h1", "ModC", 3.0, 1.0, &["ModA=f1", "ModC=h1"]),
        record("run-1", "g1", "ModB", 2.0, 1.0, &["ModA=f1", "ModB=g1"]),
    ]);
    let graph = &result.graph;

    let b = graph.node_by_key("ModB").unwrap();
    assert_eq!(b.runs.len(), 2);
    assert_eq!(b.runs["run-0"].time_inc, 4.0);
    assert_eq!(b.runs["run-1"].time_inc, 2.0);

    // ModC never appears in run-1.
    let c = graph.node_by_key("ModC").unwrap();
    assert_eq!(c.runs.len(), 1);
    assert!(c.runs.contains_key("run-0"));

    // Ensemble values dominate run-scoped values.
    assert!(b.metrics.time_inc >= b.runs["run-0"].time_inc);
    assert!(b.metrics.time_inc >= b.runs["run-1"].time_inc);
}

#[test]
fn rebuild_with_narrower_run_set_replaces_graph() {
    let records = vec![
        record("run-0", "g1", "ModB", 4.0, 1.0, &["ModA=f1", "ModB=g1"]),
        record("run-1", "h1", "ModC", 2.0, 1.0, &["ModA=f1", "ModC=h1"]),
    ];
    let mut table = RecordTable::new(records);
    table.prepare();

    let ensemble = build_from_config(&table, &BuildConfig::default()).unwrap();
    assert_eq!(ensemble.graph.node_count(), 3);

    let config = BuildConfig {
        runs: vec!["run-1".to_string()],
        ..Default::default()
    };
    let scoped = build_from_config(&table, &config).unwrap();
    assert_eq!(scoped.graph.node_count(), 2);
    assert!(scoped.graph.node_by_key("ModB").is_none());
}

#[test]
fn malformed_paths_counted_not_fatal() {
    let result = build(vec![
        record("run-0", "g1", "ModB", 4.0, 1.0, &["ModA=f1", "ModB=g1"]),
        record("run-0", "bad", "ModZ", 1.0, 1.0, &[]),
        record("run-0", "bad2", "ModZ", 1.0, 1.0, &["no-separator"]),
    ]);
    assert_eq!(result.diagnostics.skipped_records, 2);
    assert_eq!(result.graph.node_count(), 2);
    assert!(result.graph.node_by_key("ModZ").is_none());
}

#[test]
fn grouping_is_idempotent_across_rebuilds() {
    let records = vec![
        record("run-0", "g1", "ModB", 4.0, 1.0, &["ModA=f1", "ModB=g1"]),
        record(
            "run-0",
            "f2",
            "ModA",
            2.0,
            1.0,
            &["ModA=f1", "ModB=g1", "ModA=f2"],
        ),
        record("run-1", "h1", "ModC", 2.0, 1.0, &["ModA=f1", "ModC=h1"]),
    ];
    let first = build(records.clone());
    let second = build(records);
    assert_eq!(
        first.graph.to_json().unwrap(),
        second.graph.to_json().unwrap()
    );
    assert_eq!(first.context_tree.edge_count(), second.context_tree.edge_count());
}
