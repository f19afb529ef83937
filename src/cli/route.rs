//! CLI route: run context and the single route table.

use crate::bundle::{BundleRegistry, LoadRequest};
use crate::cli::parse::{Commands, OutputFormat};
use crate::cli::presentation::{
    format_active, format_activated, format_listing, format_load_result, format_unload_result,
};
use crate::config::{ConfigLoader, PtopsConfig};
use crate::error::{BundleError, PtopsError};
use crate::sink::{JsonLinesSink, MemorySink, SampleSink};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Runtime context for CLI execution: loaded config plus the bundle registry.
pub struct RunContext {
    registry: BundleRegistry,
    format: OutputFormat,
}

impl RunContext {
    /// Load configuration (explicit file or layered defaults) and open the registry.
    pub fn new(
        config_path: Option<&Path>,
        out: Option<&Path>,
        format: OutputFormat,
    ) -> Result<Self, PtopsError> {
        let config = match config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load()?,
        };
        Self::from_config(&config, out, format)
    }

    pub fn from_config(
        config: &PtopsConfig,
        out: Option<&Path>,
        format: OutputFormat,
    ) -> Result<Self, PtopsError> {
        let sink: Arc<dyn SampleSink> = match out {
            Some(path) => {
                debug!(path = %path.display(), "Writing samples to JSON lines file");
                Arc::new(JsonLinesSink::open(path).map_err(BundleError::from)?)
            }
            None => {
                info!("No output file given; samples are kept in memory and discarded on exit");
                Arc::new(MemorySink::new())
            }
        };
        let registry = BundleRegistry::open(config, sink)?;
        Ok(Self { registry, format })
    }

    pub fn registry(&self) -> &BundleRegistry {
        &self.registry
    }

    /// Run one command and render its result.
    pub fn execute(&self, command: &Commands) -> Result<String, PtopsError> {
        let format = self.format;
        match command {
            Commands::Load {
                path,
                force,
                max_files,
                sptid,
                categories,
            } => {
                let request = LoadRequest {
                    path: path.clone(),
                    force: *force,
                    max_files: *max_files,
                    categories: (!categories.is_empty()).then(|| categories.clone()),
                    sptid: sptid.clone(),
                };
                let record = self.registry.load(request)?;
                Ok(format_load_result(&record, format))
            }
            Commands::List => Ok(format_listing(&self.registry.list()?, format)),
            Commands::Active => {
                let record = match self.registry.active_context()? {
                    Some(ctx) => Some(self.registry.get(&ctx.bundle_id)?),
                    None => None,
                };
                Ok(format_active(record.as_ref(), format))
            }
            Commands::Activate { bundle_id } => {
                let context = self.registry.set_active(bundle_id)?;
                Ok(format_activated(&context, format))
            }
            Commands::Unload { bundle_id, all } => {
                let outcome = if *all {
                    self.registry.purge_all()?
                } else {
                    self.registry.unload(bundle_id.as_deref())?
                };
                Ok(format_unload_result(&outcome, format))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn context(dir: &TempDir, format: OutputFormat) -> RunContext {
        let mut config = PtopsConfig::default();
        config.registry.state_path = dir.path().join("state");
        config.registry.staging_dir = dir.path().join("staging");
        let out = dir.path().join("samples.jsonl");
        RunContext::from_config(&config, Some(&out), format).unwrap()
    }

    fn bundle(dir: &TempDir) -> std::path::PathBuf {
        let log_dir = dir.path().join("bundle").join("var").join("log");
        fs::create_dir_all(&log_dir).unwrap();
        fs::write(
            log_dir.join("ptop-20250101_0000.log"),
            "TIME 1 1700000000\nCPU cpu0 u 12.5\nTIME 2 1700000001\nCPU cpu0 u 14.0\n",
        )
        .unwrap();
        dir.path().join("bundle")
    }

    #[test]
    fn load_list_unload_round() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, OutputFormat::Json);
        let path = bundle(&dir);

        let loaded: serde_json::Value = serde_json::from_str(
            &ctx.execute(&Commands::Load {
                path,
                force: false,
                max_files: None,
                sptid: None,
                categories: vec![],
            })
            .unwrap(),
        )
        .unwrap();
        assert_eq!(loaded["reused"], false);
        assert_eq!(loaded["metrics_ingested"], 2);
        let lines = fs::read_to_string(dir.path().join("samples.jsonl")).unwrap();
        assert_eq!(lines.lines().count(), 2);

        let listed: serde_json::Value =
            serde_json::from_str(&ctx.execute(&Commands::List).unwrap()).unwrap();
        assert_eq!(listed["total"], 1);
        assert_eq!(listed["bundles"][0]["active"], true);

        ctx.execute(&Commands::Unload {
            bundle_id: None,
            all: false,
        })
        .unwrap();
        let active: serde_json::Value =
            serde_json::from_str(&ctx.execute(&Commands::Active).unwrap()).unwrap();
        assert!(active["active"].is_null());
    }

    #[test]
    fn activating_unknown_bundle_fails() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, OutputFormat::Text);
        let err = ctx
            .execute(&Commands::Activate {
                bundle_id: "b-nope".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, PtopsError::Bundle(BundleError::NotFound(_))));
    }
}
