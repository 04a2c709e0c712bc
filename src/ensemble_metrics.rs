//! Ensemble and per-run timing aggregates
//!
//! Built once from the record table, read-only afterwards. Four lookup
//! granularities: module-level and (module, callsite)-level, each across the
//! full ensemble and restricted to one run (the "target" view).
//!
//! Aggregation rules:
//!
//! - `(module, callsite)`: max over matching records. The same callsite's
//!   time across ranks and runs is reduced by max, never summed.
//! - `module` inclusive: max over the module's callsite-level values.
//! - `module` exclusive: sum over callsites of the per-callsite max.
//!   Exclusive time does not double count across distinct callsites within a
//!   module, so the per-callsite maxes are summed. The alternative (sum per
//!   run, then max across runs) is deliberately not implemented; this
//!   preserves the observed aggregation rule.
//!
//! A module or callsite absent from a run's records simply has no entry in
//! that run's maps. Callers treat missing keys as "no data for this run",
//! not as an error.

use crate::profile_record::RecordTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An inclusive/exclusive time pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimePair {
    pub inclusive: f64,
    pub exclusive: f64,
}

/// Callsite-level accumulator: per-metric max over matching records.
fn fold_max(entry: &mut TimePair, inc: f64, exc: f64) {
    entry.inclusive = entry.inclusive.max(inc);
    entry.exclusive = entry.exclusive.max(exc);
}

type CallsiteKey = (String, String);

/// The four ensemble maps plus the same four per run.
#[derive(Debug, Clone, Default)]
pub struct MetricsMap {
    module_ensemble: BTreeMap<String, TimePair>,
    callsite_ensemble: BTreeMap<CallsiteKey, TimePair>,
    module_target: BTreeMap<String, BTreeMap<String, TimePair>>,
    callsite_target: BTreeMap<String, BTreeMap<CallsiteKey, TimePair>>,
}

impl MetricsMap {
    /// Build every map in one pass over the record table.
    pub fn from_table(table: &RecordTable) -> Self {
        let mut callsite_ensemble: BTreeMap<CallsiteKey, TimePair> = BTreeMap::new();
        let mut callsite_target: BTreeMap<String, BTreeMap<CallsiteKey, TimePair>> = BTreeMap::new();

        for record in table.records() {
            let key = (record.module.clone(), record.callsite.clone());
            fold_max(
                callsite_ensemble.entry(key.clone()).or_default(),
                record.time_inc,
                record.time_exc,
            );
            fold_max(
                callsite_target
                    .entry(record.run.clone())
                    .or_default()
                    .entry(key)
                    .or_default(),
                record.time_inc,
                record.time_exc,
            );
        }

        let module_ensemble = Self::roll_up(&callsite_ensemble);
        let module_target = callsite_target
            .iter()
            .map(|(run, callsites)| (run.clone(), Self::roll_up(callsites)))
            .collect();

        Self {
            module_ensemble,
            callsite_ensemble,
            module_target,
            callsite_target,
        }
    }

    /// Module-level roll-up of callsite-level maxes: inclusive by max,
    /// exclusive by sum.
    fn roll_up(callsites: &BTreeMap<CallsiteKey, TimePair>) -> BTreeMap<String, TimePair> {
        let mut modules: BTreeMap<String, TimePair> = BTreeMap::new();
        for ((module, _callsite), pair) in callsites {
            let entry = modules.entry(module.clone()).or_default();
            entry.inclusive = entry.inclusive.max(pair.inclusive);
            entry.exclusive += pair.exclusive;
        }
        modules
    }

    /// Ensemble aggregate for a whole module.
    pub fn ensemble_module(&self, module: &str) -> Option<TimePair> {
        self.module_ensemble.get(module).copied()
    }

    /// Ensemble aggregate for one callsite of a module.
    pub fn ensemble_callsite(&self, module: &str, callsite: &str) -> Option<TimePair> {
        self.callsite_ensemble
            .get(&(module.to_string(), callsite.to_string()))
            .copied()
    }

    /// One run's aggregate for a whole module; `None` when the module never
    /// appears in that run.
    pub fn target_module(&self, run: &str, module: &str) -> Option<TimePair> {
        self.module_target.get(run)?.get(module).copied()
    }

    /// One run's aggregate for one callsite of a module.
    pub fn target_callsite(&self, run: &str, module: &str, callsite: &str) -> Option<TimePair> {
        self.callsite_target
            .get(run)?
            .get(&(module.to_string(), callsite.to_string()))
            .copied()
    }

    /// Runs that have at least one record for `module`.
    pub fn runs_with_module<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a str> {
        self.module_target
            .iter()
            .filter(move |(_, modules)| modules.contains_key(module))
            .map(|(run, _)| run.as_str())
    }

    /// Runs that have at least one record for `(module, callsite)`.
    pub fn runs_with_callsite<'a>(
        &'a self,
        module: &'a str,
        callsite: &'a str,
    ) -> impl Iterator<Item = &'a str> {
        let key = (module.to_string(), callsite.to_string());
        self.callsite_target
            .iter()
            .filter(move |(_, callsites)| callsites.contains_key(&key))
            .map(|(run, _)| run.as_str())
    }
}
