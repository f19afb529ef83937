//! Turns parsed records into labeled metric samples.

use crate::ingest::catalog::{self, Category, FamilyDef};
use crate::ingest::delta::{SnapshotDeltaTracker, SnapshotKey};
use crate::types::{FieldValue, HostIdentity, Labels, MetricSample, ParsedRecord};
use std::collections::{BTreeMap, BTreeSet};

const UNKNOWN: &str = "unknown";
const SOURCE: &str = "ptops";

/// Bundle-level emission settings shared by every worker of a load.
#[derive(Debug, Clone)]
pub struct EmitContext {
    pub bundle_id: String,
    pub sptid: Option<String>,
    pub categories: Option<BTreeSet<Category>>,
}

/// Builds samples for one file. Holds the label set common to every sample it emits.
#[derive(Debug, Clone)]
pub struct SampleEmitter {
    base: Labels,
    categories: Option<BTreeSet<Category>>,
}

impl SampleEmitter {
    pub fn new(context: &EmitContext, identity: &HostIdentity) -> Self {
        let mut base = Labels::new();
        base.insert("bundle_id".to_string(), context.bundle_id.clone());
        if let Some(sptid) = &context.sptid {
            base.insert("sptid".to_string(), sptid.clone());
        }
        base.insert("source".to_string(), SOURCE.to_string());
        let mut emitter = Self {
            base,
            categories: context.categories.clone(),
        };
        emitter.set_identity(identity);
        emitter
    }

    /// Replace the host labels, e.g. once a file's identity line has been read.
    pub fn set_identity(&mut self, identity: &HostIdentity) {
        let fields = [
            ("host", &identity.host),
            ("host_id", &identity.host_id),
            ("ptop_version", &identity.ptop_version),
        ];
        for (label, value) in fields {
            self.base.insert(
                label.to_string(),
                value.clone().unwrap_or_else(|| UNKNOWN.to_string()),
            );
        }
    }

    /// Whether records of `prefix` pass the category filter.
    pub fn accepts(&self, prefix: &str) -> bool {
        match &self.categories {
            Some(allowed) => allowed.contains(&catalog::category_of(prefix)),
            None => true,
        }
    }

    /// Append the samples for `record` to `out`; returns how many were added.
    ///
    /// Rate samples need a previous snapshot of the same series and are left out until
    /// one exists.
    pub fn emit(
        &self,
        record: &ParsedRecord,
        tracker: &mut SnapshotDeltaTracker,
        out: &mut Vec<MetricSample>,
    ) -> usize {
        if !self.accepts(record.prefix) {
            return 0;
        }
        let Some(family) = catalog::family_for(record.prefix) else {
            return 0;
        };
        let before = out.len();
        let ts_ms = record.ts_ms();
        let labels = self.record_labels(family, record);

        if !record.groups.is_empty() {
            let count = catalog::categorize(record.prefix, "count");
            let avg = catalog::categorize(record.prefix, "avg");
            for group in &record.groups {
                let mut group_labels = labels.clone();
                group_labels.insert("bucket".to_string(), group.index.clone());
                out.push(MetricSample::new(
                    count.canonical_name.clone(),
                    group.count,
                    ts_ms,
                    group_labels.clone(),
                ));
                out.push(MetricSample::new(
                    avg.canonical_name.clone(),
                    group.avg,
                    ts_ms,
                    group_labels,
                ));
            }
            return out.len() - before;
        }

        for (token, value) in &record.fields {
            let FieldValue::Number(value) = value else {
                continue;
            };
            let meta = catalog::categorize(record.prefix, token);
            if meta.is_label || !meta.metric_kind.is_emitted() {
                continue;
            }
            out.push(MetricSample::new(
                meta.canonical_name,
                *value,
                ts_ms,
                labels.clone(),
            ));
        }

        self.emit_rates(family, record, &labels, tracker, out);
        out.len() - before
    }

    fn record_labels(&self, family: &FamilyDef, record: &ParsedRecord) -> Labels {
        let mut labels = self.base.clone();
        labels.insert("record_type".to_string(), record.prefix.to_string());
        labels.insert(
            "metric_category".to_string(),
            family.category.as_str().to_string(),
        );
        if let (Some(label), Some(subtype)) = (family.subtype_label, record.subtype) {
            labels.insert(label.to_string(), subtype.to_string());
        }
        for label in family.labels {
            if let Some(value) = record.fields.get(*label) {
                labels.insert(label.to_string(), value.render());
            }
        }
        labels
    }

    fn emit_rates(
        &self,
        family: &FamilyDef,
        record: &ParsedRecord,
        labels: &Labels,
        tracker: &mut SnapshotDeltaTracker,
        out: &mut Vec<MetricSample>,
    ) {
        let counters: BTreeMap<String, f64> = family
            .rates
            .iter()
            .filter_map(|r| record.number(r.source).map(|v| (r.source.to_string(), v)))
            .collect();
        if counters.is_empty() {
            return;
        }

        let key = family.key_labels.iter().fold(
            SnapshotKey::new(record.prefix, record.subtype),
            |key, label| match record.fields.get(*label) {
                Some(value) => key.with(*label, value.render()),
                None => key,
            },
        );
        let Some(delta) = tracker.observe(key, counters, record.ts_ms()) else {
            return;
        };
        for def in family.rates {
            if let Some(rate) = delta.rates.get(def.source) {
                out.push(MetricSample::new(
                    def.name,
                    *rate,
                    record.ts_ms(),
                    labels.clone(),
                ));
            }
        }
    }
}
