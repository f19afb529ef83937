//! Config loading entry point.

use super::merge::builder_with_defaults;
use super::sources;
use super::PtopsConfig;
use crate::error::PtopsError;
use std::path::Path;

/// Loads `PtopsConfig` from the layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, then the user file, then environment overrides.
    pub fn load() -> Result<PtopsConfig, PtopsError> {
        let builder = builder_with_defaults()?;
        let builder = sources::add_user_file(builder)?;
        let builder = sources::add_environment(builder);
        let config: PtopsConfig = builder.build()?.try_deserialize()?;
        config.ensure_valid()?;
        Ok(config)
    }

    /// Defaults, then `path`, then environment overrides. The user file is skipped.
    pub fn load_from_file(path: &Path) -> Result<PtopsConfig, PtopsError> {
        let builder = builder_with_defaults()?;
        let builder = sources::add_explicit_file(builder, path)?;
        let builder = sources::add_environment(builder);
        let config: PtopsConfig = builder.build()?.try_deserialize()?;
        config.ensure_valid()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ptops.toml");
        fs::write(
            &path,
            "[ingest]\nworkers = 2\nbatch_rows = 100\n\n[registry]\nstaging_dir = \"/tmp/ptops-staging\"\n",
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.ingest.workers, 2);
        assert_eq!(config.ingest.batch_rows, 100);
        assert_eq!(config.ingest.retry_attempts, 3);
        assert_eq!(
            config.registry.staging_dir,
            std::path::PathBuf::from("/tmp/ptops-staging")
        );
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = ConfigLoader::load_from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(PtopsError::ConfigError(_))));
    }

    #[test]
    fn test_invalid_file_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[ingest]\nworkers = 0\n").unwrap();
        assert!(ConfigLoader::load_from_file(&path).is_err());
    }
}
