//! One bundle load: a bounded pool of workers, one file at a time per worker, feeding a
//! single shared batcher.
//!
//! Each worker owns its scanner, parser table handle, delta tracker and emitter for the
//! file it is processing. Only the batcher is shared, behind a lock, so sink writes are
//! serialized.

use crate::config::IngestConfig;
use crate::error::SinkError;
use crate::ingest::batcher::{IngestionBatcher, WriterStats};
use crate::ingest::delta::SnapshotDeltaTracker;
use crate::ingest::emitter::{EmitContext, SampleEmitter};
use crate::ingest::parsers::{Dispatch, PluginRegistry};
use crate::ingest::scanner::{parse_ident_line, LineScanner, ScanEvent};
use crate::ingest::selector::SelectedLog;
use crate::sink::SampleSink;
use crate::types::{HostIdentity, MetricSample};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lines inspected per file when looking for the bundle identity up front.
const IDENTITY_SCAN_LINES: usize = 256;

/// Per-file result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileOutcome {
    pub file_name: String,
    pub data_lines: usize,
    /// Data lines plus rejected anchor/identity lines.
    pub lines_considered: usize,
    pub parse_errors: usize,
    pub ignored_lines: usize,
    pub unknown_lines: usize,
    pub samples_emitted: usize,
    pub snapshot_anomalies: usize,
    /// Dropped for its parse error ratio; none of its samples were written.
    pub aborted: bool,
    /// Stopped part way by the write circuit breaker; samples written so far stay.
    pub interrupted: bool,
    pub skipped: bool,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    pub identity: Option<HostIdentity>,
}

impl FileOutcome {
    fn new(file_name: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            ..Default::default()
        }
    }

    /// Parse errors as a percentage of the lines they were measured against.
    pub fn error_percent(&self) -> f64 {
        ErrorTally {
            lines_considered: self.lines_considered,
            parse_errors: self.parse_errors,
        }
        .percent()
    }

    fn widen_range(&mut self, ts_ms: i64) {
        self.start_ts = Some(self.start_ts.map_or(ts_ms, |s| s.min(ts_ms)));
        self.end_ts = Some(self.end_ts.map_or(ts_ms, |e| e.max(ts_ms)));
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ErrorTally {
    lines_considered: usize,
    parse_errors: usize,
}

impl ErrorTally {
    fn percent(&self) -> f64 {
        if self.lines_considered == 0 {
            0.0
        } else {
            self.parse_errors as f64 * 100.0 / self.lines_considered as f64
        }
    }
}

/// Result of one load across all selected files.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutcome {
    pub files: Vec<FileOutcome>,
    pub logs_processed: usize,
    pub metrics_ingested: u64,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    pub identity: HostIdentity,
    pub partial: bool,
    pub warnings: Vec<String>,
    pub stats: WriterStats,
}

pub struct IngestPipeline {
    config: IngestConfig,
    parsers: Arc<PluginRegistry>,
    sink: Arc<dyn SampleSink>,
}

/// State shared by the workers of one run.
struct Shared<'a> {
    files: &'a [SelectedLog],
    context: &'a EmitContext,
    identity: &'a HostIdentity,
    next: AtomicUsize,
    abort: AtomicBool,
    batcher: Mutex<IngestionBatcher>,
    outcomes: Mutex<Vec<Option<FileOutcome>>>,
    warnings: Mutex<Vec<String>>,
}

impl IngestPipeline {
    pub fn new(config: &IngestConfig, sink: Arc<dyn SampleSink>) -> Self {
        Self {
            config: config.clone(),
            parsers: Arc::new(PluginRegistry::standard()),
            sink,
        }
    }

    pub fn with_parsers(mut self, parsers: PluginRegistry) -> Self {
        self.parsers = Arc::new(parsers);
        self
    }

    /// Ingest `files` (chronological order) and report counts, time range and warnings.
    pub fn run(&self, files: &[SelectedLog], context: &EmitContext) -> PipelineOutcome {
        let identity = detect_bundle_identity(files);
        let shared = Shared {
            files,
            context,
            identity: &identity,
            next: AtomicUsize::new(0),
            abort: AtomicBool::new(false),
            batcher: Mutex::new(IngestionBatcher::new(self.sink.clone(), &self.config)),
            outcomes: Mutex::new(vec![None; files.len()]),
            warnings: Mutex::new(Vec::new()),
        };

        let workers = self.config.workers.min(files.len()).max(1);
        info!(
            bundle_id = %context.bundle_id,
            files = files.len(),
            workers,
            "Starting ingestion"
        );
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.worker(&shared));
            }
        });

        let Shared {
            batcher,
            outcomes,
            warnings,
            abort,
            ..
        } = shared;
        let mut batcher = batcher.into_inner();
        let mut partial = abort.load(Ordering::SeqCst);
        if !partial && matches!(batcher.flush(), Err(SinkError::CircuitOpen)) {
            partial = true;
        }

        let mut out = PipelineOutcome {
            identity,
            partial,
            ..Default::default()
        };
        for (file, outcome) in files.iter().zip(outcomes.into_inner()) {
            let outcome = outcome.unwrap_or_else(|| {
                out.warnings
                    .push(format!("file_skipped_after_abort:{}", file.file_name));
                FileOutcome {
                    skipped: true,
                    ..FileOutcome::new(&file.file_name)
                }
            });
            self.fold_file(&mut out, outcome);
        }
        out.warnings.extend(warnings.into_inner());
        out.warnings.extend(batcher.warnings().iter().cloned());
        out.stats = batcher.stats();
        out.metrics_ingested = out.stats.rows_written;
        info!(
            bundle_id = %context.bundle_id,
            logs_processed = out.logs_processed,
            metrics_ingested = out.metrics_ingested,
            partial = out.partial,
            "Ingestion finished"
        );
        out
    }

    fn fold_file(&self, out: &mut PipelineOutcome, file: FileOutcome) {
        if !file.aborted && !file.interrupted && !file.skipped {
            out.logs_processed += 1;
        }
        if !file.aborted {
            if let Some(start) = file.start_ts {
                out.start_ts = Some(out.start_ts.map_or(start, |s| s.min(start)));
            }
            if let Some(end) = file.end_ts {
                out.end_ts = Some(out.end_ts.map_or(end, |e| e.max(end)));
            }
        }
        if let Some(identity) = &file.identity {
            out.identity.merge_missing(identity);
        }
        if file.parse_errors > 0 && !file.aborted {
            out.warnings.push(format!(
                "parse_errors:{}:{}",
                file.file_name, file.parse_errors
            ));
        }
        if file.snapshot_anomalies > 0 {
            out.warnings.push(format!(
                "snapshot_anomalies:{}:{}",
                file.file_name, file.snapshot_anomalies
            ));
        }
        out.files.push(file);
    }

    fn worker(&self, shared: &Shared<'_>) {
        loop {
            if shared.abort.load(Ordering::SeqCst) {
                break;
            }
            let idx = shared.next.fetch_add(1, Ordering::SeqCst);
            let Some(file) = shared.files.get(idx) else {
                break;
            };
            let outcome = self.ingest_file(file, shared);
            shared.outcomes.lock()[idx] = Some(outcome);
        }
    }

    fn ingest_file(&self, file: &SelectedLog, shared: &Shared<'_>) -> FileOutcome {
        let mut outcome = FileOutcome::new(&file.file_name);
        let handle = match File::open(&file.path) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(file = %file.path.display(), error = %e, "Cannot open log file");
                outcome.aborted = true;
                push_warning(shared, format!("file_unreadable:{}", file.file_name));
                return outcome;
            }
        };

        // The abort decision covers the whole file and is made before any of its samples
        // reach the batcher.
        let tally = self.tally_errors(BufReader::new(handle));
        if self.exceeds_error_threshold(&tally) {
            outcome.lines_considered = tally.lines_considered;
            outcome.parse_errors = tally.parse_errors;
            self.abort_file(&mut outcome, shared);
            return outcome;
        }

        let handle = match File::open(&file.path) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(file = %file.path.display(), error = %e, "Cannot reopen log file");
                outcome.aborted = true;
                push_warning(shared, format!("file_unreadable:{}", file.file_name));
                return outcome;
            }
        };
        debug!(file = %file.file_name, "Ingesting log file");
        let mut scanner = LineScanner::new(BufReader::new(handle));
        let mut tracker = SnapshotDeltaTracker::new();
        let mut emitter = SampleEmitter::new(shared.context, shared.identity);
        let mut local: Vec<MetricSample> = Vec::with_capacity(self.config.local_batch_rows);

        for event in scanner.by_ref() {
            if shared.abort.load(Ordering::SeqCst) {
                outcome.interrupted = true;
                return outcome;
            }
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(file = %file.file_name, error = %e, "Read error, stopping file");
                    push_warning(shared, format!("file_read_error:{}", file.file_name));
                    break;
                }
            };
            match event {
                ScanEvent::Identity(identity) => {
                    let mut merged = identity.clone();
                    merged.merge_missing(shared.identity);
                    emitter.set_identity(&merged);
                    outcome.identity.get_or_insert(identity);
                }
                ScanEvent::Epoch(epoch) => {
                    outcome.widen_range(epoch.epoch_ts.saturating_mul(1000))
                }
                ScanEvent::Rejected { line_no, error } => {
                    outcome.lines_considered += 1;
                    outcome.parse_errors += 1;
                    debug!(file = %file.file_name, line_no, error = %error, "Rejected line");
                }
                ScanEvent::Data(line) => {
                    outcome.lines_considered += 1;
                    outcome.data_lines += 1;
                    match self.parsers.dispatch(&line) {
                        Dispatch::Record(record) => {
                            outcome.samples_emitted +=
                                emitter.emit(&record, &mut tracker, &mut local);
                        }
                        Dispatch::Ignored => outcome.ignored_lines += 1,
                        Dispatch::Unregistered => outcome.unknown_lines += 1,
                        Dispatch::Failed(error) => {
                            outcome.parse_errors += 1;
                            debug!(
                                file = %file.file_name,
                                line_no = line.line_no,
                                prefix = line.prefix(),
                                error = %error,
                                "Parse error"
                            );
                        }
                    }
                }
            }

            if local.len() >= self.config.local_batch_rows && !self.submit(&mut local, shared) {
                outcome.interrupted = true;
                return outcome;
            }
        }

        outcome.snapshot_anomalies = tracker.anomalies();
        if !self.submit(&mut local, shared) {
            outcome.interrupted = true;
        }
        debug!(
            file = %file.file_name,
            lines = scanner.stats().lines_read,
            samples = outcome.samples_emitted,
            parse_errors = outcome.parse_errors,
            "Log file done"
        );
        outcome
    }

    /// Count the lines of a file that fail to parse, without emitting anything. Stops at
    /// the first read error, as ingestion does.
    fn tally_errors<R: BufRead>(&self, reader: R) -> ErrorTally {
        let mut tally = ErrorTally::default();
        for event in LineScanner::new(reader) {
            match event {
                Ok(ScanEvent::Rejected { .. }) => {
                    tally.lines_considered += 1;
                    tally.parse_errors += 1;
                }
                Ok(ScanEvent::Data(line)) => {
                    tally.lines_considered += 1;
                    if matches!(self.parsers.dispatch(&line), Dispatch::Failed(_)) {
                        tally.parse_errors += 1;
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        tally
    }

    fn exceeds_error_threshold(&self, tally: &ErrorTally) -> bool {
        tally.percent() > self.config.parse_error_abort_percent
    }

    fn abort_file(&self, outcome: &mut FileOutcome, shared: &Shared<'_>) {
        let percent = outcome.error_percent();
        warn!(
            file = %outcome.file_name,
            parse_errors = outcome.parse_errors,
            lines = outcome.lines_considered,
            threshold = self.config.parse_error_abort_percent,
            "Parse error ratio above threshold, aborting file"
        );
        outcome.aborted = true;
        push_warning(
            shared,
            format!(
                "file_aborted:{}:parse_error_ratio={:.2}%",
                outcome.file_name, percent
            ),
        );
    }

    /// Hand the local buffer to the shared batcher. `false` once the load's circuit
    /// breaker is open.
    fn submit(&self, local: &mut Vec<MetricSample>, shared: &Shared<'_>) -> bool {
        if local.is_empty() {
            return true;
        }
        let result = shared.batcher.lock().write_all(local.drain(..));
        match result {
            Ok(()) => true,
            Err(SinkError::CircuitOpen) => {
                shared.abort.store(true, Ordering::SeqCst);
                false
            }
            Err(e) => {
                warn!(error = %e, "Sample submission failed");
                true
            }
        }
    }
}

fn push_warning(shared: &Shared<'_>, warning: String) {
    shared.warnings.lock().push(warning);
}

/// First identity line found in chronological file order, looking only at the head of
/// each file.
fn detect_bundle_identity(files: &[SelectedLog]) -> HostIdentity {
    for file in files {
        if let Some(identity) = detect_file_identity(&file.path) {
            debug!(file = %file.file_name, host = ?identity.host, "Bundle identity found");
            return identity;
        }
    }
    HostIdentity::default()
}

fn detect_file_identity(path: &Path) -> Option<HostIdentity> {
    let reader = BufReader::new(File::open(path).ok()?);
    reader
        .split(b'\n')
        .take(IDENTITY_SCAN_LINES)
        .map_while(Result::ok)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .filter(|line| line.trim_start().starts_with("IDENT"))
        .find_map(|line| parse_ident_line(line.trim()).ok())
}
