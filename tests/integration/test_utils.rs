//! Shared test utilities for integration tests
//!
//! Bundle fixtures on disk and a registry wired to an isolated state store.

use ptops_ingest::bundle::BundleRegistry;
use ptops_ingest::config::PtopsConfig;
use ptops_ingest::sink::MemorySink;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Serializes tests that touch process environment variables.
pub static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// CPU metrics produced by one line of [`cpu_log`].
pub const CPU_METRICS_PER_LINE: usize = 8;

pub struct Harness {
    pub dir: TempDir,
    pub config: PtopsConfig,
    pub sink: Arc<MemorySink>,
    pub registry: BundleRegistry,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(MemorySink::new(), |_| {})
    }

    /// Build a harness around `sink`, letting the caller adjust the config first.
    pub fn with(sink: MemorySink, adjust: impl FnOnce(&mut PtopsConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = PtopsConfig::default();
        config.registry.state_path = dir.path().join("state");
        config.registry.staging_dir = dir.path().join("staging");
        config.ingest.retry_base_delay_ms = 0;
        adjust(&mut config);
        let sink = Arc::new(sink);
        let registry = BundleRegistry::open(&config, sink.clone()).unwrap();
        Self {
            dir,
            config,
            sink,
            registry,
        }
    }

    /// Create `<tmp>/<name>/var/log/` holding `logs` as `(file name, body)` pairs.
    pub fn bundle(&self, name: &str, logs: &[(&str, String)]) -> PathBuf {
        write_bundle(self.dir.path(), name, logs)
    }

    /// Number of bundles currently reported as active.
    pub fn active_count(&self) -> usize {
        self.registry
            .list()
            .unwrap()
            .iter()
            .filter(|l| l.active)
            .count()
    }
}

pub fn write_bundle(root: &Path, name: &str, logs: &[(&str, String)]) -> PathBuf {
    let log_dir = root.join(name).join("var").join("log");
    fs::create_dir_all(&log_dir).unwrap();
    for (file_name, body) in logs {
        fs::write(log_dir.join(file_name), body).unwrap();
    }
    root.join(name)
}

/// `epochs` one-minute sampling intervals with one full CPU line each.
pub fn cpu_log(host: &str, start: i64, epochs: usize) -> String {
    let mut body = format!("IDENT host {} host_id {}-id ver 8.6.2\n", host, host);
    for i in 0..epochs {
        writeln!(body, "TIME {} {}", i * 60, start + 60 * i as i64).unwrap();
        writeln!(body, "CPU cpu0 u {} id/io 50 1 u/s/n 2 3 0 irq h/s 0 0", i).unwrap();
    }
    body
}

/// 100 CPU data lines, the last `bad` of which fail to parse.
pub fn log_with_errors(bad: usize) -> String {
    let mut body = String::from("TIME 0 1700000000\n");
    for i in 0..100 {
        if i >= 100 - bad {
            body.push_str("CPU cpu0 x 1\n");
        } else {
            writeln!(body, "CPU cpu0 u {}", i).unwrap();
        }
    }
    body
}
