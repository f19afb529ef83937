//! The ingestion engine: file selection, line scanning, per-family parsing, delta
//! tracking, categorization, sample emission and batched writing.

pub mod batcher;
pub mod catalog;
pub mod delta;
pub mod emitter;
pub mod parsers;
pub mod pipeline;
pub mod scanner;
pub mod selector;

pub use batcher::{IngestionBatcher, WriterStats};
pub use catalog::{categorize, Category, MetricKind};
pub use delta::{SnapshotDelta, SnapshotDeltaTracker, SnapshotKey};
pub use emitter::{EmitContext, SampleEmitter};
pub use parsers::{Dispatch, PluginParser, PluginRegistry};
pub use pipeline::{FileOutcome, IngestPipeline, PipelineOutcome};
pub use scanner::{LineScanner, ScanEvent};
pub use selector::{LogFileSelector, SelectedLog, Selection};
