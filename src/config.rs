//! Configuration System
//!
//! Layered configuration for the ingestion engine: built-in defaults, an optional user
//! config file, an optional explicit file, then `PTOPS__SECTION__KEY` environment overrides.
//! Values are validated before use.

use crate::error::PtopsError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PtopsConfig {
    /// Parsing, batching and worker settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Bundle state store and staging settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings consumed by the ingestion pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Worker pool size; clamped to the number of selected files
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Row-count flush threshold
    #[serde(default = "default_batch_rows")]
    pub batch_rows: usize,

    /// Estimated byte-size flush threshold
    #[serde(default = "default_batch_bytes")]
    pub batch_bytes: usize,

    /// Samples a worker buffers before handing them to the shared batcher
    #[serde(default = "default_local_batch_rows")]
    pub local_batch_rows: usize,

    /// Bulk-load retries after the first attempt
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Backoff base; each retry doubles it
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Per-file parse error percentage that aborts the file, measured over the whole file
    #[serde(default = "default_parse_error_abort_percent")]
    pub parse_error_abort_percent: f64,

    /// Write success ratio below which the load is aborted as partial
    #[serde(default = "default_success_ratio_abort")]
    pub success_ratio_abort: f64,

    #[serde(default = "default_max_files")]
    pub default_max_files: usize,

    #[serde(default = "default_max_files_limit")]
    pub max_files_limit: usize,

    /// Whether to attempt the sink's bulk fast path
    #[serde(default = "default_true")]
    pub bulk_load_enabled: bool,

    #[serde(default = "default_log_file_prefix")]
    pub log_file_prefix: String,

    #[serde(default = "default_log_file_extension")]
    pub log_file_extension: String,
}

fn default_workers() -> usize {
    4
}

fn default_batch_rows() -> usize {
    8000
}

fn default_batch_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_local_batch_rows() -> usize {
    500
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_parse_error_abort_percent() -> f64 {
    5.0
}

fn default_success_ratio_abort() -> f64 {
    0.95
}

fn default_max_files() -> usize {
    10
}

fn default_max_files_limit() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_log_file_prefix() -> String {
    "ptop".to_string()
}

fn default_log_file_extension() -> String {
    "log".to_string()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_rows: default_batch_rows(),
            batch_bytes: default_batch_bytes(),
            local_batch_rows: default_local_batch_rows(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            parse_error_abort_percent: default_parse_error_abort_percent(),
            success_ratio_abort: default_success_ratio_abort(),
            default_max_files: default_max_files(),
            max_files_limit: default_max_files_limit(),
            bulk_load_enabled: default_true(),
            log_file_prefix: default_log_file_prefix(),
            log_file_extension: default_log_file_extension(),
        }
    }
}

/// Bundle registry storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// sled database directory for bundle records and the active pointer
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Root for archives extracted before ingestion
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Ask the sink to drop a bundle's samples when it is unloaded
    #[serde(default)]
    pub delete_samples_on_unload: bool,
}

fn default_state_path() -> PathBuf {
    PathBuf::from(".ptops/state")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from(".ptops/staging")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            staging_dir: default_staging_dir(),
            delete_samples_on_unload: false,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Ingest(String),
    Registry(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Ingest(msg) => write!(f, "Ingest: {}", msg),
            ValidationError::Registry(msg) => write!(f, "Registry: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl IngestConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.workers == 0 {
            errors.push("workers must be at least 1".to_string());
        }
        if self.batch_rows == 0 || self.batch_bytes == 0 || self.local_batch_rows == 0 {
            errors.push("batch thresholds must be greater than zero".to_string());
        }
        if !(self.parse_error_abort_percent > 0.0 && self.parse_error_abort_percent <= 100.0) {
            errors.push(format!(
                "parse_error_abort_percent must be in (0, 100], got {}",
                self.parse_error_abort_percent
            ));
        }
        if !(0.0..=1.0).contains(&self.success_ratio_abort) {
            errors.push(format!(
                "success_ratio_abort must be in [0, 1], got {}",
                self.success_ratio_abort
            ));
        }
        if self.max_files_limit == 0 {
            errors.push("max_files_limit must be at least 1".to_string());
        }
        if self.default_max_files == 0 || self.default_max_files > self.max_files_limit {
            errors.push(format!(
                "default_max_files must be in 1..={}, got {}",
                self.max_files_limit, self.default_max_files
            ));
        }
        if self.log_file_prefix.is_empty() || self.log_file_extension.is_empty() {
            errors.push("log file prefix and extension cannot be empty".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Backoff before retry number `attempt` (1-based): base, 2*base, 4*base, ...
    pub fn retry_delay(&self, attempt: u32) -> std::time::Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        std::time::Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.state_path.as_os_str().is_empty() {
            return Err("State path cannot be empty".to_string());
        }
        if self.staging_dir.as_os_str().is_empty() {
            return Err("Staging directory cannot be empty".to_string());
        }
        Ok(())
    }
}

impl PtopsConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(msgs) = self.ingest.validate() {
            errors.extend(msgs.into_iter().map(ValidationError::Ingest));
        }
        if let Err(e) = self.registry.validate() {
            errors.push(ValidationError::Registry(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and fold the error list into one `PtopsError`.
    pub fn ensure_valid(&self) -> Result<(), PtopsError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            PtopsError::ConfigError(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })
    }
}
