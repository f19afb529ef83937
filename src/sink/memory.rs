//! In-process sink. Used by tests and dry runs; failures can be scripted.

use super::SampleSink;
use crate::error::SinkError;
use crate::types::MetricSample;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

type RowFilter = Box<dyn Fn(&MetricSample) -> bool + Send + Sync>;

#[derive(Default)]
pub struct MemorySink {
    samples: Mutex<Vec<MetricSample>>,
    bulk_failures_left: AtomicUsize,
    bulk_calls: AtomicUsize,
    row_calls: AtomicUsize,
    reject_row: Option<RowFilter>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` bulk loads. `usize::MAX` fails every one.
    pub fn failing_bulk(self, n: usize) -> Self {
        self.bulk_failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Reject row inserts for which `filter` returns true.
    pub fn rejecting_rows<F>(mut self, filter: F) -> Self
    where
        F: Fn(&MetricSample) -> bool + Send + Sync + 'static,
    {
        self.reject_row = Some(Box::new(filter));
        self
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bulk_calls(&self) -> usize {
        self.bulk_calls.load(Ordering::SeqCst)
    }

    pub fn row_calls(&self) -> usize {
        self.row_calls.load(Ordering::SeqCst)
    }

    pub fn count_for_bundle(&self, bundle_id: &str) -> usize {
        self.samples
            .lock()
            .iter()
            .filter(|s| s.label("bundle_id") == Some(bundle_id))
            .count()
    }

    fn take_bulk_failure(&self) -> bool {
        self.bulk_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl SampleSink for MemorySink {
    fn bulk_load(&self, samples: &[MetricSample]) -> Result<usize, SinkError> {
        self.bulk_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_bulk_failure() {
            return Err(SinkError::Bulk("scripted bulk failure".to_string()));
        }
        self.samples.lock().extend_from_slice(samples);
        Ok(samples.len())
    }

    fn insert_row(&self, sample: &MetricSample) -> Result<(), SinkError> {
        self.row_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reject) = &self.reject_row {
            if reject(sample) {
                return Err(SinkError::Row(format!("rejected row {}", sample.name)));
            }
        }
        self.samples.lock().push(sample.clone());
        Ok(())
    }

    fn purge_bundle(&self, bundle_id: &str) -> Result<usize, SinkError> {
        let mut samples = self.samples.lock();
        let before = samples.len();
        samples.retain(|s| s.label("bundle_id") != Some(bundle_id));
        Ok(before - samples.len())
    }
}
