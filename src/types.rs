//! Core value types shared by the parsing, emission and writing stages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sample label set. Ordered so that serialized samples are deterministic.
pub type Labels = BTreeMap<String, String>;

/// One time-stamped, labeled numeric value bound for the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub ts_ms: i64,
    pub labels: Labels,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64, ts_ms: i64, labels: Labels) -> Self {
        Self {
            name: name.into(),
            value,
            ts_ms,
            labels,
        }
    }

    /// Rough wire size used by the batcher's byte threshold.
    pub fn estimated_bytes(&self) -> usize {
        let labels: usize = self
            .labels
            .iter()
            .map(|(k, v)| k.len() + v.len() + 2)
            .sum();
        self.name.len() + labels + 16
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// A parsed field value: numeric, or textual for identity tokens and
/// mnemonics whose value did not parse as a number.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    /// Render the value as a label string.
    pub fn render(&self) -> String {
        match self {
            FieldValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                format!("{}", *n as i64)
            }
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Text(s) => s.clone(),
        }
    }
}

/// One `(index, count, avg)` group of a histogram-style record.
#[derive(Debug, Clone, PartialEq)]
pub struct TripletGroup {
    pub index: String,
    pub count: f64,
    pub avg: f64,
}

/// A single data line after dispatch to its family handler.
///
/// Created per line and consumed by the emitter right away.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub prefix: &'static str,
    pub subtype: Option<&'static str>,
    pub fields: BTreeMap<String, FieldValue>,
    pub groups: Vec<TripletGroup>,
    pub raw: String,
    pub epoch_ts: i64,
    pub run_seconds: i64,
}

impl ParsedRecord {
    pub fn new(prefix: &'static str, raw: &str, epoch: Epoch) -> Self {
        Self {
            prefix,
            subtype: None,
            fields: BTreeMap::new(),
            groups: Vec::new(),
            raw: raw.to_string(),
            epoch_ts: epoch.epoch_ts,
            run_seconds: epoch.run_seconds,
        }
    }

    /// Sample timestamp: always the governing epoch anchor, never wall-clock time.
    pub fn ts_ms(&self) -> i64 {
        self.epoch_ts.saturating_mul(1000)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(FieldValue::as_number)
    }

    pub fn set_number(&mut self, key: &str, value: f64) {
        self.fields.insert(key.to_string(), FieldValue::Number(value));
    }

    pub fn set_text(&mut self, key: &str, value: impl Into<String>) {
        self.fields
            .insert(key.to_string(), FieldValue::Text(value.into()));
    }
}

/// Sampling epoch established by a `TIME` anchor line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch {
    pub epoch_ts: i64,
    pub run_seconds: i64,
}

/// Host metadata carried by an `IDENT` line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    pub host: Option<String>,
    pub host_id: Option<String>,
    pub ptop_version: Option<String>,
}

impl HostIdentity {
    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.host_id.is_none() && self.ptop_version.is_none()
    }

    /// Fill any unset field from `other`.
    pub fn merge_missing(&mut self, other: &HostIdentity) {
        if self.host.is_none() {
            self.host = other.host.clone();
        }
        if self.host_id.is_none() {
            self.host_id = other.host_id.clone();
        }
        if self.ptop_version.is_none() {
            self.ptop_version = other.ptop_version.clone();
        }
    }
}
