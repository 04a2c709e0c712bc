//! Profiling record table
//!
//! The ingestion collaborator hands the engine one table of per-process
//! profiling records: one row per sampled callsite occurrence, annotated with
//! run id, module label, inclusive/exclusive time, rank, and the full raw
//! call path from the root. This module owns that table and the `prepare`
//! step that derives each record's group path and component path from its
//! raw path.
//!
//! # Example
//!
//! ```
//! use trazar::profile_record::RecordTable;
//!
//! # fn main() -> anyhow::Result<()> {
//! let rows = r#"[
//!     {"run": "run-0", "callsite": "g1", "module": "ModB",
//!      "time_inc": 4.0, "time_exc": 1.5, "rank": 0,
//!      "path": ["ModA=f1", "ModB=g1"]}
//! ]"#;
//! let mut table = RecordTable::from_json_str(rows)?;
//! table.prepare();
//! assert_eq!(table.runs(), ["run-0"]);
//! # Ok(())
//! # }
//! ```

use crate::call_path;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One sampled callsite occurrence from one profiling run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Run identifier (one profiling execution).
    pub run: String,
    /// Callsite name, unqualified.
    pub callsite: String,
    /// Module label the callsite belongs to.
    pub module: String,
    /// Inclusive time (callsite plus everything it called).
    pub time_inc: f64,
    /// Exclusive time (callsite alone).
    pub time_exc: f64,
    /// Rank / process id the sample came from.
    #[serde(default)]
    pub rank: u32,
    /// Raw call path, root first, `"module=callsite"` tokens.
    pub path: Vec<String>,
    /// Canonical grouping key derived by [`RecordTable::prepare`]; `None`
    /// until prepared or when the raw path is malformed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub group_path: Option<String>,
    /// Focal-module component path derived by [`RecordTable::prepare`].
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub component_path: Option<Vec<String>>,
}

/// The full record table for one construction request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordTable {
    records: Vec<Record>,
    runs: Vec<String>,
}

impl RecordTable {
    /// Build a table from records; the run set is collected from the rows.
    pub fn new(records: Vec<Record>) -> Self {
        let runs: BTreeSet<String> = records.iter().map(|r| r.run.clone()).collect();
        Self {
            records,
            runs: runs.into_iter().collect(),
        }
    }

    /// Parse the ingestion collaborator's row format: a JSON array of record
    /// objects.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let records: Vec<Record> =
            serde_json::from_str(json).context("Failed to parse record table rows")?;
        Ok(Self::new(records))
    }

    /// Derive `group_path` and `component_path` for every record from its
    /// raw path. Pre-filled values from ingestion are overwritten so one
    /// code path defines them. Records with malformed paths end up with
    /// `group_path == None` and are skipped (and counted) by the builder.
    pub fn prepare(&mut self) {
        for record in &mut self.records {
            let normalized = call_path::normalize_path(&record.path);
            if normalized.is_empty() {
                record.group_path = None;
                record.component_path = None;
                continue;
            }
            let steps = call_path::group_steps(&normalized);
            record.group_path = Some(call_path::group_path_string(&steps));
            record.component_path = Some(call_path::component_path(&record.path, &record.module));
        }
    }

    /// Restrict the table to a subset of runs. An empty subset keeps every
    /// run (the ensemble view).
    pub fn restrict_to_runs(&self, runs: &[String]) -> RecordTable {
        if runs.is_empty() {
            return self.clone();
        }
        let keep: BTreeSet<&String> = runs.iter().collect();
        let records = self
            .records
            .iter()
            .filter(|r| keep.contains(&r.run))
            .cloned()
            .collect();
        Self::new(records)
    }

    /// All records, in ingestion order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Distinct run identifiers, sorted.
    pub fn runs(&self) -> &[String] {
        &self.runs
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
