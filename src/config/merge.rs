//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("ingest.workers", 4_i64)?
        .set_default("ingest.batch_rows", 8000_i64)?
        .set_default("ingest.retry_attempts", 3_i64)?
        .set_default("ingest.retry_base_delay_ms", 500_i64)?
        .set_default("ingest.parse_error_abort_percent", 5.0_f64)?
        .set_default("ingest.success_ratio_abort", 0.95_f64)?
        .set_default("ingest.default_max_files", 10_i64)?
        .set_default("registry.state_path", ".ptops/state")?
        .set_default("registry.staging_dir", ".ptops/staging")
}
