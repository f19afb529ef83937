//! Integration tests for the ingestion path driven through the registry: rates, file
//! selection, write fallback and per-file abort.

use super::test_utils::{cpu_log, log_with_errors, Harness, CPU_METRICS_PER_LINE};
use ptops_ingest::bundle::{BundleStatus, LoadRequest};
use ptops_ingest::ingest::LogFileSelector;
use ptops_ingest::sink::MemorySink;
use std::fs;
use tempfile::TempDir;

fn net_log(epochs: &[(i64, u64)]) -> String {
    let mut body = String::from("IDENT host gm1 host_id 42 ver 8.6.2\n");
    for (i, (ts, rx_packets)) in epochs.iter().enumerate() {
        body.push_str(&format!("TIME {} {}\n", i, ts));
        body.push_str(&format!("NET ifstat eth0 {} 1000 50 500 0 0\n", rx_packets));
    }
    body
}

/// Test that a counter going 100 -> 150 over one second yields a rate of exactly 50.0
#[test]
fn test_rate_from_consecutive_snapshots() {
    let h = Harness::new();
    let path = h.bundle(
        "net",
        &[(
            "ptop-20250101_0000.log",
            net_log(&[(1_700_000_000, 100), (1_700_000_001, 150)]),
        )],
    );
    h.registry.load(LoadRequest::new(&path)).unwrap();

    let rates: Vec<_> = h
        .sink
        .samples()
        .into_iter()
        .filter(|s| s.name == "net_ifstat_rx_packets_per_sec")
        .collect();
    assert_eq!(rates.len(), 1);
    assert_eq!(rates[0].value, 50.0);
    assert_eq!(rates[0].ts_ms, 1_700_000_001_000);
    assert_eq!(rates[0].label("interface"), Some("eth0"));
}

/// Test that a series observed once produces no rate samples
#[test]
fn test_single_observation_emits_no_rates() {
    let h = Harness::new();
    let path = h.bundle(
        "net",
        &[("ptop-20250101_0000.log", net_log(&[(1_700_000_000, 100)]))],
    );
    let record = h.registry.load(LoadRequest::new(&path)).unwrap();

    assert!(record.metrics_ingested > 0);
    assert!(h.sink.samples().iter().all(|s| !s.name.ends_with("_per_sec")));
}

/// Test that every sample carries the standard label set and an epoch-derived timestamp
#[test]
fn test_samples_carry_standard_labels() {
    let h = Harness::new();
    let path = h.bundle(
        "NIOSSPT-4242",
        &[("ptop-20250101_0000.log", cpu_log("gm1", 1_700_000_000, 2))],
    );
    let record = h.registry.load(LoadRequest::new(&path)).unwrap();

    let samples = h.sink.samples();
    assert_eq!(samples.len(), 2 * CPU_METRICS_PER_LINE);
    for s in &samples {
        assert_eq!(s.label("bundle_id"), Some(record.bundle_id.as_str()));
        assert_eq!(s.label("sptid"), Some("NIOSSPT-4242"));
        assert_eq!(s.label("host"), Some("gm1"));
        assert_eq!(s.label("host_id"), Some("gm1-id"));
        assert_eq!(s.label("ptop_version"), Some("8.6.2"));
        assert_eq!(s.label("record_type"), Some("CPU"));
        assert_eq!(s.label("metric_category"), Some("CPU"));
        assert!(s.ts_ms == 1_700_000_000_000 || s.ts_ms == 1_700_000_060_000);
    }
}

/// Test that selection keeps the newest files by filename stamp, in chronological order
#[test]
fn test_selection_orders_by_filename_not_mtime() {
    let dir = TempDir::new().unwrap();
    // Written newest-first so modification times run opposite to the stamps
    for name in ["a-20250103_0000.log", "a-20250102_0000.log", "a-20250101_0000.log"] {
        fs::write(dir.path().join(name), "TIME 0 1700000000\n").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let selector = LogFileSelector::new("a", "log", 10, 50);
    let selection = selector.select(dir.path(), Some(2)).unwrap();
    let names: Vec<_> = selection.files.iter().map(|f| f.file_name.as_str()).collect();
    assert_eq!(names, vec!["a-20250102_0000.log", "a-20250103_0000.log"]);
}

/// Test that max_files limits the load to the newest logs
#[test]
fn test_max_files_limits_ingested_logs() {
    let h = Harness::new();
    let path = h.bundle(
        "b",
        &[
            ("ptop-20250101_0000.log", cpu_log("gm1", 1_700_000_000, 1)),
            ("ptop-20250101_0100.log", cpu_log("gm1", 1_700_003_600, 1)),
            ("ptop-20250101_0200.log", cpu_log("gm1", 1_700_007_200, 1)),
        ],
    );
    let record = h.registry.load(LoadRequest::new(&path).max_files(2)).unwrap();
    assert_eq!(record.logs_processed, 2);
    assert_eq!(record.start_ts, Some(1_700_003_600_000));
    assert_eq!(record.end_ts, Some(1_700_007_200_000));
}

/// Test that a bulk path failing on every retry falls back to row writes without loss
#[test]
fn test_bulk_failure_falls_back_without_loss() {
    let h = Harness::with(MemorySink::new().failing_bulk(usize::MAX), |c| {
        c.ingest.batch_rows = 10;
        c.ingest.local_batch_rows = 5;
    });
    let path = h.bundle(
        "b",
        &[("ptop-20250101_0000.log", cpu_log("gm1", 1_700_000_000, 10))],
    );
    let record = h.registry.load(LoadRequest::new(&path)).unwrap();

    let expected = 10 * CPU_METRICS_PER_LINE;
    assert_eq!(record.status, BundleStatus::Ready);
    assert_eq!(record.metrics_ingested as usize, expected);
    assert_eq!(h.sink.len(), expected);
    assert_eq!(record.writer.rows_failed, 0);
    assert!(record.writer.row_fallbacks > 0);
    assert!(record
        .warnings
        .iter()
        .any(|w| w.starts_with("bulk_fallback_row_wise:")));
}

/// Test that a low write success ratio finalizes the bundle as partial
#[test]
fn test_low_success_ratio_marks_bundle_partial() {
    let sink = MemorySink::new()
        .failing_bulk(usize::MAX)
        .rejecting_rows(|s| s.name == "cpu_utilization");
    let h = Harness::with(sink, |c| {
        c.ingest.batch_rows = 16;
        c.ingest.workers = 1;
    });
    let path = h.bundle(
        "b",
        &[
            ("ptop-20250101_0000.log", cpu_log("gm1", 1_700_000_000, 10)),
            ("ptop-20250101_0100.log", cpu_log("gm1", 1_700_003_600, 10)),
        ],
    );
    let record = h.registry.load(LoadRequest::new(&path)).unwrap();

    assert!(record.partial);
    assert_eq!(record.status, BundleStatus::Partial);
    assert!(record
        .warnings
        .iter()
        .any(|w| w.starts_with("write_success_ratio_below_threshold:")));
    assert_eq!(record.metrics_ingested, record.writer.rows_written);
    // A partial bundle is still the active one
    assert_eq!(
        h.registry.active_context().unwrap().unwrap().bundle_id,
        record.bundle_id
    );
}

/// Test that a 6% parse error file aborts while its sibling still ingests
#[test]
fn test_error_ratio_aborts_only_the_bad_file() {
    let h = Harness::new();
    let path = h.bundle(
        "b",
        &[
            ("ptop-20250101_0000.log", log_with_errors(6)),
            ("ptop-20250101_0100.log", cpu_log("gm1", 1_700_003_600, 3)),
        ],
    );
    let record = h.registry.load(LoadRequest::new(&path)).unwrap();

    assert_eq!(record.status, BundleStatus::Ready);
    assert_eq!(record.logs_processed, 1);
    assert!(record
        .warnings
        .iter()
        .any(|w| w.starts_with("file_aborted:ptop-20250101_0000.log:")));
    let sibling = h
        .sink
        .samples()
        .iter()
        .filter(|s| s.label("host") == Some("gm1"))
        .count();
    assert_eq!(sibling, 3 * CPU_METRICS_PER_LINE);
    assert_eq!(h.sink.len(), 3 * CPU_METRICS_PER_LINE);
    assert_eq!(record.metrics_ingested as usize, 3 * CPU_METRICS_PER_LINE);
    assert_eq!(record.start_ts, Some(1_700_003_600_000));
}

/// Test that a 5% parse error file stays within the threshold
#[test]
fn test_error_ratio_at_threshold_is_kept() {
    let h = Harness::new();
    let path = h.bundle("b", &[("ptop-20250101_0000.log", log_with_errors(5))]);
    let record = h.registry.load(LoadRequest::new(&path)).unwrap();

    assert_eq!(record.logs_processed, 1);
    assert!(!record.warnings.iter().any(|w| w.starts_with("file_aborted:")));
    assert!(record
        .warnings
        .iter()
        .any(|w| w == "parse_errors:ptop-20250101_0000.log:5"));
}

/// Test that a few bad lines at the head of a file are judged against the whole file
#[test]
fn test_leading_parse_errors_do_not_abort_a_healthy_file() {
    let h = Harness::new();
    let mut body = String::from("TIME 0 1700000000\nCPU cpu0 x 1\nCPU cpu0 x 2\n");
    for i in 0..198 {
        body.push_str(&format!("CPU cpu0 u {}\n", i));
    }
    let path = h.bundle("b", &[("ptop-20250101_0000.log", body)]);
    let record = h.registry.load(LoadRequest::new(&path)).unwrap();

    assert_eq!(record.logs_processed, 1);
    assert_eq!(record.metrics_ingested, 198);
    assert_eq!(record.start_ts, Some(1_700_000_000_000));
    assert!(!record.warnings.iter().any(|w| w.starts_with("file_aborted:")));
}

/// Test that an aborted file leaves no samples behind and no counts on the record
#[test]
fn test_aborted_file_leaves_record_consistent() {
    let h = Harness::with(MemorySink::new(), |c| {
        c.ingest.local_batch_rows = 16;
        c.ingest.batch_rows = 32;
    });
    let mut body = cpu_log("gm1", 1_700_000_000, 200);
    for _ in 0..20 {
        body.push_str("CPU cpu0 x 1\n");
    }
    let path = h.bundle("b", &[("ptop-20250101_0000.log", body)]);
    let record = h.registry.load(LoadRequest::new(&path)).unwrap();

    assert_eq!(record.logs_processed, 0);
    assert_eq!(record.metrics_ingested, 0);
    assert_eq!(h.sink.len(), 0);
    assert!(record.start_ts.is_none());
    assert!(record
        .warnings
        .iter()
        .any(|w| w.starts_with("file_aborted:ptop-20250101_0000.log:")));
}
