//! Integration tests for the bundle lifecycle: idempotent loads, the active pointer,
//! unload/purge and archive staging.

use super::test_utils::{cpu_log, Harness};
use flate2::write::GzEncoder;
use flate2::Compression;
use ptops_ingest::bundle::{BundleStatus, LoadRequest};
use ptops_ingest::error::BundleError;
use ptops_ingest::sink::MemorySink;
use std::fs::{self, File};

/// Test that a second load of the same path is a reuse with no new samples
#[test]
fn test_reload_without_force_is_reused() {
    let h = Harness::new();
    let path = h.bundle(
        "NIOSSPT-100",
        &[("ptop-20250101_0000.log", cpu_log("gm1", 1_700_000_000, 3))],
    );

    let first = h.registry.load(LoadRequest::new(&path)).unwrap();
    let samples_after_first = h.sink.len();
    let second = h.registry.load(LoadRequest::new(&path)).unwrap();

    assert!(!first.reused);
    assert!(second.reused);
    assert_eq!(first.bundle_id, second.bundle_id);
    assert_eq!(h.sink.len(), samples_after_first);
    assert_eq!(h.registry.list().unwrap().len(), 1);
    assert_eq!(
        h.registry.active_context().unwrap().unwrap().bundle_id,
        first.bundle_id
    );
}

/// Test that force replaces the previous record with a new one
#[test]
fn test_force_reload_replaces_record() {
    let h = Harness::new();
    let path = h.bundle(
        "bundle",
        &[("ptop-20250101_0000.log", cpu_log("gm1", 1_700_000_000, 2))],
    );

    let first = h.registry.load(LoadRequest::new(&path)).unwrap();
    let second = h.registry.load(LoadRequest::new(&path).force(true)).unwrap();

    assert_ne!(first.bundle_id, second.bundle_id);
    assert!(second.replaced_previous);
    assert!(!second.reused);
    assert!(matches!(
        h.registry.get(&first.bundle_id),
        Err(BundleError::NotFound(_))
    ));
    let listing = h.registry.list().unwrap();
    assert_eq!(listing.len(), 1);
    assert!(listing[0].active);
}

/// Test that at most one bundle is active across a sequence of loads and unloads
#[test]
fn test_single_active_invariant() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for (i, name) in ["a", "b", "c"].iter().enumerate() {
        let path = h.bundle(
            name,
            &[(
                "ptop-20250101_0000.log",
                cpu_log(name, 1_700_000_000 + i as i64 * 3600, 2),
            )],
        );
        ids.push(h.registry.load(LoadRequest::new(&path)).unwrap().bundle_id);
        assert_eq!(h.active_count(), 1);
    }
    assert_eq!(h.registry.active_context().unwrap().unwrap().bundle_id, ids[2]);

    h.registry.set_active(&ids[0]).unwrap();
    assert_eq!(h.active_count(), 1);

    h.registry.unload(Some(&ids[1])).unwrap();
    assert_eq!(h.active_count(), 1);
    h.registry.unload(None).unwrap();
    assert_eq!(h.active_count(), 1);
    h.registry.unload(None).unwrap();
    assert_eq!(h.active_count(), 0);
    assert!(h.registry.active_context().unwrap().is_none());
}

/// Test that unloading the active bundle promotes the most recent remaining one
#[test]
fn test_unload_active_promotes_most_recent() {
    let h = Harness::new();
    let older = h.bundle("older", &[("ptop-20250101_0000.log", cpu_log("x", 1_700_000_000, 1))]);
    let newer = h.bundle("newer", &[("ptop-20250101_0000.log", cpu_log("y", 1_700_000_000, 1))]);
    let newest = h.bundle("newest", &[("ptop-20250101_0000.log", cpu_log("z", 1_700_000_000, 1))]);

    let older = h.registry.load(LoadRequest::new(&older)).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let newer = h.registry.load(LoadRequest::new(&newer)).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let newest = h.registry.load(LoadRequest::new(&newest)).unwrap();

    let outcome = h.registry.unload(Some(&newest.bundle_id)).unwrap();
    assert_eq!(outcome.unloaded, vec![newest.bundle_id.clone()]);
    assert_eq!(outcome.promoted.as_deref(), Some(newer.bundle_id.as_str()));

    // Unloading a passive bundle leaves the pointer alone
    let outcome = h.registry.unload(Some(&older.bundle_id)).unwrap();
    assert!(outcome.promoted.is_none());
    assert_eq!(
        h.registry.active_context().unwrap().unwrap().bundle_id,
        newer.bundle_id
    );
}

/// Test that unknown bundle ids are reported as not found
#[test]
fn test_unknown_bundle_is_not_found() {
    let h = Harness::new();
    assert!(matches!(
        h.registry.unload(Some("b-ffffffffff")),
        Err(BundleError::NotFound(_))
    ));
    assert!(matches!(
        h.registry.get("b-ffffffffff"),
        Err(BundleError::NotFound(_))
    ));
    assert!(matches!(
        h.registry.set_active("b-ffffffffff"),
        Err(BundleError::NotFound(_))
    ));
}

/// Test that purge_all leaves no records, no active context and no staged files
#[test]
fn test_purge_all_clears_everything() {
    let h = Harness::new();
    for name in ["a", "b"] {
        let path = h.bundle(name, &[("ptop-20250101_0000.log", cpu_log(name, 1_700_000_000, 1))]);
        h.registry.load(LoadRequest::new(&path)).unwrap();
    }

    let outcome = h.registry.purge_all().unwrap();
    assert!(outcome.purged);
    assert_eq!(outcome.unloaded.len(), 2);
    assert!(h.registry.list().unwrap().is_empty());
    assert!(h.registry.active_context().unwrap().is_none());
    assert!(!h.config.registry.staging_dir.exists());

    // Purging an empty registry is fine
    assert!(h.registry.purge_all().unwrap().unloaded.is_empty());
}

/// Test that samples are purged from the sink on unload when configured
#[test]
fn test_unload_deletes_samples_when_configured() {
    let h = Harness::with(MemorySink::new(), |c| {
        c.registry.delete_samples_on_unload = true;
    });
    let a = h.bundle("a", &[("ptop-20250101_0000.log", cpu_log("a", 1_700_000_000, 2))]);
    let b = h.bundle("b", &[("ptop-20250101_0000.log", cpu_log("b", 1_700_000_000, 2))]);
    let a = h.registry.load(LoadRequest::new(&a)).unwrap();
    let b = h.registry.load(LoadRequest::new(&b)).unwrap();

    let outcome = h.registry.unload(Some(&a.bundle_id)).unwrap();
    assert_eq!(outcome.samples_deleted as u64, a.metrics_ingested);
    assert_eq!(h.sink.count_for_bundle(&a.bundle_id), 0);
    assert_eq!(h.sink.count_for_bundle(&b.bundle_id) as u64, b.metrics_ingested);
}

/// Test that concurrent loads of the same path produce exactly one record
#[test]
fn test_concurrent_duplicate_load_yields_one_record() {
    let h = Harness::new();
    let path = h.bundle(
        "NIOSSPT-200",
        &[("ptop-20250101_0000.log", cpu_log("gm1", 1_700_000_000, 20))],
    );

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| h.registry.load(LoadRequest::new(&path)).unwrap()))
            .collect();
        handles.into_iter().map(|j| j.join().unwrap()).collect()
    });

    let fresh: Vec<_> = results.iter().filter(|r| !r.reused).collect();
    assert_eq!(fresh.len(), 1);
    assert!(results.iter().all(|r| r.bundle_id == fresh[0].bundle_id));
    assert_eq!(h.registry.list().unwrap().len(), 1);
    assert_eq!(h.sink.len() as u64, fresh[0].metrics_ingested);
    assert_eq!(h.active_count(), 1);
}

/// Test loading a gzip tarball: staging, sptid deduction and cleanup on unload
#[test]
fn test_tar_gz_bundle_is_staged_and_cleaned_up() {
    let h = Harness::new();
    let archive = h.dir.path().join("NIOSSPT-31337_bundle.tar.gz");
    {
        let gz = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        let body = cpu_log("tarhost", 1_700_000_000, 2);
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(
                &mut header,
                "bundle/var/log/ptop-20250101_0000.log",
                body.as_bytes(),
            )
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    let record = h.registry.load(LoadRequest::new(&archive)).unwrap();
    assert_eq!(record.status, BundleStatus::Ready);
    assert_eq!(record.sptid.as_deref(), Some("NIOSSPT-31337"));
    assert_eq!(record.host.as_deref(), Some("tarhost"));
    assert_eq!(record.logs_processed, 1);
    let staged = record.staged_path.clone().unwrap();
    assert!(staged.starts_with(h.config.registry.staging_dir.join("NIOSSPT-31337")));
    assert!(staged.is_dir());

    h.registry.unload(Some(&record.bundle_id)).unwrap();
    assert!(!staged.exists());
}

/// Test that a corrupt archive leaves a failed, removable record
#[test]
fn test_corrupt_archive_leaves_failed_record() {
    let h = Harness::new();
    let archive = h.dir.path().join("broken.tgz");
    fs::write(&archive, b"not an archive").unwrap();

    let err = h.registry.load(LoadRequest::new(&archive)).unwrap_err();
    let BundleError::Extraction { bundle_id, .. } = err else {
        panic!("expected an extraction error, got {:?}", err);
    };
    let listing = h.registry.list().unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].record.status, BundleStatus::Failed);
    assert!(!listing[0].active);

    h.registry.unload(Some(&bundle_id)).unwrap();
    assert!(h.registry.list().unwrap().is_empty());
}

/// Test that reloading a failed bundle without force is an error rather than a reuse
#[test]
fn test_reload_of_failed_bundle_requires_force() {
    let h = Harness::new();
    let archive = h.dir.path().join("broken.tgz");
    fs::write(&archive, b"not an archive").unwrap();
    let first = h.registry.load(LoadRequest::new(&archive)).unwrap_err();
    let BundleError::Extraction { bundle_id, .. } = first else {
        panic!("expected an extraction error, got {:?}", first);
    };

    let err = h.registry.load(LoadRequest::new(&archive)).unwrap_err();
    match err {
        BundleError::PreviouslyFailed { bundle_id: id } => assert_eq!(id, bundle_id),
        other => panic!("expected a previous failure, got {:?}", other),
    }
    assert!(h.registry.active_context().unwrap().is_none());
    assert_eq!(h.registry.list().unwrap().len(), 1);
}
