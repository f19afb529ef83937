//! Integration tests for layered configuration loading

use super::test_utils::ENV_MUTEX;
use ptops_ingest::config::ConfigLoader;
use ptops_ingest::error::PtopsError;
use std::fs;
use tempfile::TempDir;

/// Clears the named variables when dropped, so a failing assertion cannot leak them.
struct EnvGuard(&'static [&'static str]);

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in self.0 {
            std::env::remove_var(key);
        }
    }
}

/// Test that environment overrides win over the file
#[test]
fn test_environment_overrides_file() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ptops.toml");
    fs::write(&path, "[ingest]\nworkers = 2\nbatch_rows = 100\n").unwrap();

    let _guard = EnvGuard(&["PTOPS__INGEST__WORKERS", "PTOPS__REGISTRY__DELETE_SAMPLES_ON_UNLOAD"]);
    std::env::set_var("PTOPS__INGEST__WORKERS", "7");
    std::env::set_var("PTOPS__REGISTRY__DELETE_SAMPLES_ON_UNLOAD", "true");

    let config = ConfigLoader::load_from_file(&path).unwrap();
    assert_eq!(config.ingest.workers, 7);
    assert_eq!(config.ingest.batch_rows, 100);
    assert!(config.registry.delete_samples_on_unload);
}

/// Test that the user file under XDG_CONFIG_HOME is picked up by the default loader
#[test]
fn test_user_file_from_xdg_config_home() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let config_dir = dir.path().join("ptops");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("config.toml"),
        "[ingest]\nparse_error_abort_percent = 10.0\n\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();

    let _guard = EnvGuard(&["XDG_CONFIG_HOME"]);
    std::env::set_var("XDG_CONFIG_HOME", dir.path());

    let config = ConfigLoader::load().unwrap();
    assert_eq!(config.ingest.parse_error_abort_percent, 10.0);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.ingest.default_max_files, 10);
}

/// Test that out-of-range values are rejected with every problem listed
#[test]
fn test_validation_reports_all_problems() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(
        &path,
        "[ingest]\nworkers = 0\nsuccess_ratio_abort = 1.5\ndefault_max_files = 100\nmax_files_limit = 50\n",
    )
    .unwrap();

    let Err(PtopsError::ConfigError(message)) = ConfigLoader::load_from_file(&path) else {
        panic!("expected a configuration error");
    };
    assert!(message.contains("workers must be at least 1"));
    assert!(message.contains("success_ratio_abort"));
    assert!(message.contains("default_max_files"));
}
