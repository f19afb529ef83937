//! Buffered, retrying writer in front of a [`SampleSink`].
//!
//! Samples accumulate until either the row or the byte threshold is reached. A flush
//! tries the sink's bulk path with exponential backoff, then falls back to row-wise
//! inserts for that batch only. A running success ratio acts as a circuit breaker for
//! the whole load.

use crate::config::IngestConfig;
use crate::error::SinkError;
use crate::sink::SampleSink;
use crate::types::MetricSample;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Write-side counters for one bundle load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    pub rows_submitted: u64,
    pub rows_written: u64,
    pub rows_failed: u64,
    pub flushes: u64,
    pub bulk_attempts: u64,
    pub bulk_failures: u64,
    pub retries: u64,
    pub row_fallbacks: u64,
}

impl WriterStats {
    /// Fraction of attempted rows that reached the sink; 1.0 before any attempt.
    pub fn success_ratio(&self) -> f64 {
        let attempted = self.rows_written + self.rows_failed;
        if attempted == 0 {
            1.0
        } else {
            self.rows_written as f64 / attempted as f64
        }
    }
}

pub struct IngestionBatcher {
    sink: Arc<dyn SampleSink>,
    config: IngestConfig,
    buffer: Vec<MetricSample>,
    buffered_bytes: usize,
    stats: WriterStats,
    warnings: Vec<String>,
    tripped: bool,
}

impl IngestionBatcher {
    pub fn new(sink: Arc<dyn SampleSink>, config: &IngestConfig) -> Self {
        Self {
            sink,
            config: config.clone(),
            buffer: Vec::with_capacity(config.batch_rows.min(16_384)),
            buffered_bytes: 0,
            stats: WriterStats::default(),
            warnings: Vec::new(),
            tripped: false,
        }
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Whether the success-ratio breaker has opened. Once open, every write is refused.
    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn write(&mut self, sample: MetricSample) -> Result<(), SinkError> {
        if self.tripped {
            return Err(SinkError::CircuitOpen);
        }
        self.stats.rows_submitted += 1;
        self.buffered_bytes += sample.estimated_bytes();
        self.buffer.push(sample);
        if self.buffer.len() >= self.config.batch_rows
            || self.buffered_bytes >= self.config.batch_bytes
        {
            self.flush()?;
        }
        Ok(())
    }

    pub fn write_all<I>(&mut self, samples: I) -> Result<(), SinkError>
    where
        I: IntoIterator<Item = MetricSample>,
    {
        for sample in samples {
            self.write(sample)?;
        }
        Ok(())
    }

    /// Write out whatever is buffered.
    pub fn flush(&mut self) -> Result<(), SinkError> {
        if self.tripped {
            return Err(SinkError::CircuitOpen);
        }
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buffer);
        self.buffered_bytes = 0;
        self.stats.flushes += 1;

        let bulk_written = if self.config.bulk_load_enabled {
            self.bulk_with_retry(&batch)
        } else {
            None
        };
        match bulk_written {
            Some(written) => {
                let written = written.min(batch.len());
                let short = batch.len() - written;
                self.stats.rows_written += written as u64;
                self.stats.rows_failed += short as u64;
                if short > 0 {
                    warn!(
                        rows = batch.len(),
                        written,
                        "Bulk load accepted only part of the batch"
                    );
                }
            }
            None => self.write_rows(&batch),
        }

        self.check_success_ratio()
    }

    fn bulk_with_retry(&mut self, batch: &[MetricSample]) -> Option<usize> {
        let retry_attempts = self.config.retry_attempts;
        for attempt in 0..=retry_attempts {
            if attempt > 0 {
                let delay = self.config.retry_delay(attempt);
                self.stats.retries += 1;
                warn!(
                    attempt,
                    max_attempts = retry_attempts,
                    delay_ms = delay.as_millis() as u64,
                    rows = batch.len(),
                    "Bulk load failed, retrying"
                );
                sleep(delay);
            }
            self.stats.bulk_attempts += 1;
            match self.sink.bulk_load(batch) {
                Ok(written) => {
                    debug!(rows = written, attempt, "Bulk load succeeded");
                    return Some(written);
                }
                Err(e) => {
                    self.stats.bulk_failures += 1;
                    warn!(error = %e, attempt, "Bulk load attempt failed");
                }
            }
        }
        error!(
            rows = batch.len(),
            attempts = retry_attempts + 1,
            "Bulk load exhausted retries, falling back to row-wise writes"
        );
        self.warnings
            .push(format!("bulk_fallback_row_wise:{}_rows", batch.len()));
        None
    }

    fn write_rows(&mut self, batch: &[MetricSample]) {
        self.stats.row_fallbacks += 1;
        for sample in batch {
            match self.sink.insert_row(sample) {
                Ok(()) => self.stats.rows_written += 1,
                Err(e) => {
                    self.stats.rows_failed += 1;
                    debug!(error = %e, metric = %sample.name, "Row insert failed");
                }
            }
        }
    }

    fn check_success_ratio(&mut self) -> Result<(), SinkError> {
        let ratio = self.stats.success_ratio();
        if ratio < self.config.success_ratio_abort {
            self.tripped = true;
            error!(
                ratio,
                threshold = self.config.success_ratio_abort,
                rows_failed = self.stats.rows_failed,
                "Write success ratio below threshold, aborting load"
            );
            self.warnings.push(format!(
                "write_success_ratio_below_threshold:{:.2}%",
                ratio * 100.0
            ));
            return Err(SinkError::CircuitOpen);
        }
        Ok(())
    }
}

fn sleep(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
