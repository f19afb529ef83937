//! Sample sinks: where emitted samples are written.
//!
//! The batcher talks to a sink only through [`SampleSink`] and serializes calls to it,
//! so implementations do not need to tolerate concurrent writes.

use crate::error::SinkError;
use crate::types::MetricSample;

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonLinesSink;
pub use memory::MemorySink;

pub trait SampleSink: Send + Sync {
    /// Write many samples in one call. Returns the number written.
    fn bulk_load(&self, samples: &[MetricSample]) -> Result<usize, SinkError>;

    /// Write one sample; the fallback path when bulk loading keeps failing.
    fn insert_row(&self, sample: &MetricSample) -> Result<(), SinkError>;

    /// Drop every stored sample labeled with `bundle_id`. Returns the number removed.
    fn purge_bundle(&self, _bundle_id: &str) -> Result<usize, SinkError> {
        Ok(0)
    }
}
