//! Per-identity snapshot memory for deriving deltas and per-second rates.
//!
//! One tracker is owned by one file parse pass and dropped with it; identities are only
//! meaningful within a single collection run.

use std::collections::{BTreeMap, HashMap};
use tracing::warn;

/// Composite identity of one time series: record prefix, subtype and entity labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotKey {
    pub prefix: &'static str,
    pub subtype: Option<&'static str>,
    pub identity: Vec<(String, String)>,
}

impl SnapshotKey {
    pub fn new(prefix: &'static str, subtype: Option<&'static str>) -> Self {
        Self {
            prefix,
            subtype,
            identity: Vec::new(),
        }
    }

    pub fn with(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.identity.push((label.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PreviousSnapshot {
    raw_counters: BTreeMap<String, f64>,
    ts_ms: i64,
}

/// Differences against the previous snapshot of the same key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SnapshotDelta {
    pub deltas: BTreeMap<String, f64>,
    pub rates: BTreeMap<String, f64>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Default)]
pub struct SnapshotDeltaTracker {
    previous: HashMap<SnapshotKey, PreviousSnapshot>,
    anomalies: usize,
}

impl SnapshotDeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `raw_counters` for `key` at `ts_ms` and compare with the stored snapshot.
    ///
    /// `None` on the first observation of a key and when elapsed time is not positive.
    /// The stored snapshot is replaced in every case.
    pub fn observe(
        &mut self,
        key: SnapshotKey,
        raw_counters: BTreeMap<String, f64>,
        ts_ms: i64,
    ) -> Option<SnapshotDelta> {
        let current = PreviousSnapshot {
            raw_counters,
            ts_ms,
        };
        let previous = self.previous.insert(key.clone(), current)?;
        let current = self.previous.get(&key)?;

        let elapsed_ms = current.ts_ms - previous.ts_ms;
        if elapsed_ms <= 0 {
            self.anomalies += 1;
            warn!(
                prefix = key.prefix,
                identity = ?key.identity,
                elapsed_ms,
                "Non-positive interval between snapshots, rate skipped"
            );
            return None;
        }
        let elapsed_secs = elapsed_ms as f64 / 1000.0;

        let mut out = SnapshotDelta {
            elapsed_secs,
            ..Default::default()
        };
        for (name, value) in &current.raw_counters {
            match previous.raw_counters.get(name) {
                Some(prev) => {
                    let delta = value - prev;
                    out.deltas.insert(name.clone(), delta);
                    out.rates.insert(name.clone(), delta / elapsed_secs);
                }
                None => {
                    self.anomalies += 1;
                    warn!(
                        prefix = key.prefix,
                        counter = %name,
                        "Counter missing from previous snapshot"
                    );
                }
            }
        }
        Some(out)
    }

    /// Snapshot anomalies seen so far (non-positive intervals, missing counters).
    pub fn anomalies(&self) -> usize {
        self.anomalies
    }

    pub fn tracked_keys(&self) -> usize {
        self.previous.len()
    }
}
