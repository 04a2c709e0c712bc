//! Trazar - cross-run call graph aggregation for calling-context profiles
//!
//! This library ingests per-process profiling records (one calling-context
//! tree per execution run, annotated with inclusive/exclusive time and a
//! module label) and produces an aggregated, cross-run call graph for
//! interactive inspection: callsites grouped into modules, cyclic call
//! patterns normalized away, multi-run edges merged with provenance kept,
//! and ensemble plus per-run timing aggregates on every node and edge.
//!
//! Rendering layers and derived-view builders consume the finished
//! [`supergraph::Supergraph`]; the selective reveal/split engine re-expands
//! individual callsites or whole modules on demand.

pub mod call_path;
pub mod context_tree;
pub mod ensemble_metrics;
pub mod graph_builder;
pub mod profile_record;
pub mod reveal;
pub mod supergraph;
