//! Bundle lifecycle: hashing, idempotent claim, staging, ingestion, finalization and the
//! single active pointer.

use crate::bundle::fingerprint::fingerprint;
use crate::bundle::stage::{remove_staged, stage, staging_dir_for};
use crate::bundle::store::{ActiveContext, BundleRecord, BundleStatus, BundleStore, Claim};
use crate::config::PtopsConfig;
use crate::error::BundleError;
use crate::ingest::{Category, EmitContext, IngestPipeline, LogFileSelector};
use crate::sink::SampleSink;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const SPTID_PREFIX: &str = "NIOSSPT-";

/// Parameters of one load.
#[derive(Debug, Clone, Default)]
pub struct LoadRequest {
    pub path: PathBuf,
    pub force: bool,
    pub max_files: Option<usize>,
    /// Case-insensitive category names; `None` loads every category.
    pub categories: Option<Vec<String>>,
    pub sptid: Option<String>,
}

impl LoadRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn max_files(mut self, max_files: usize) -> Self {
        self.max_files = Some(max_files);
        self
    }

    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = Some(categories.into_iter().map(Into::into).collect());
        self
    }

    pub fn sptid(mut self, sptid: impl Into<String>) -> Self {
        self.sptid = Some(sptid.into());
        self
    }
}

/// A record together with whether it is the active bundle.
#[derive(Debug, Clone, Serialize)]
pub struct BundleListing {
    #[serde(flatten)]
    pub record: BundleRecord,
    pub active: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UnloadOutcome {
    pub unloaded: Vec<String>,
    pub purged: bool,
    pub promoted: Option<String>,
    pub samples_deleted: usize,
    pub warnings: Vec<String>,
}

pub struct BundleRegistry {
    config: PtopsConfig,
    store: BundleStore,
    sink: Arc<dyn SampleSink>,
    selector: LogFileSelector,
}

impl BundleRegistry {
    /// Open the state store named by `config.registry.state_path`.
    pub fn open(config: &PtopsConfig, sink: Arc<dyn SampleSink>) -> Result<Self, BundleError> {
        let store = BundleStore::open(&config.registry.state_path)?;
        Ok(Self {
            config: config.clone(),
            store,
            sink,
            selector: LogFileSelector::from_config(&config.ingest),
        })
    }

    /// Load a bundle, or return the existing record for the same content.
    #[instrument(
        skip(self, request),
        fields(path = %request.path.display(), force = request.force)
    )]
    pub fn load(&self, request: LoadRequest) -> Result<BundleRecord, BundleError> {
        if request.max_files == Some(0) {
            return Err(BundleError::InvalidRequest(
                "max_files must be at least 1".to_string(),
            ));
        }
        let categories = parse_categories(request.categories.as_deref())?;
        if !request.path.exists() {
            return Err(BundleError::PathNotFound(request.path));
        }
        let path = dunce::canonicalize(&request.path)
            .map_err(|_| BundleError::PathNotFound(request.path.clone()))?;

        let bundle_hash = fingerprint(&path)?;
        let sptid = request.sptid.clone().or_else(|| deduce_sptid(&path));
        let now = now_ms();

        let mut record = BundleRecord::new(new_bundle_id(), &bundle_hash, &path, now);
        record.sptid = sptid.clone();
        record.categories = categories
            .as_ref()
            .map(|set| set.iter().map(|c| c.as_str().to_string()).collect());

        match self.store.claim(&record, request.force)? {
            Claim::Existing(mut existing) => {
                if existing.status == BundleStatus::Failed {
                    warn!(
                        bundle_id = %existing.bundle_id,
                        bundle_hash = %bundle_hash,
                        "Bundle failed on an earlier load, not reusing"
                    );
                    return Err(BundleError::PreviouslyFailed {
                        bundle_id: existing.bundle_id,
                    });
                }
                info!(
                    bundle_id = %existing.bundle_id,
                    bundle_hash = %bundle_hash,
                    "Bundle already loaded, reusing"
                );
                if existing.status.is_promotable() {
                    self.store.activate(&existing.bundle_id, now)?;
                } else {
                    debug!(
                        bundle_id = %existing.bundle_id,
                        status = %existing.status,
                        "Reused bundle is not eligible for activation"
                    );
                }
                existing.reused = true;
                return Ok(existing);
            }
            Claim::Created { replaced } => {
                if let Some(previous) = replaced {
                    info!(
                        bundle_id = %record.bundle_id,
                        previous = %previous.bundle_id,
                        "Replacing previously loaded bundle"
                    );
                    record.replaced_previous = true;
                    self.discard_samples(&previous.bundle_id, &mut record.warnings);
                }
            }
        }

        let target = staging_dir_for(
            &self.config.registry.staging_dir,
            sptid.as_deref(),
            &bundle_hash,
        );
        let staged = match stage(&path, &target) {
            Ok(staged) => staged,
            Err(reason) => {
                warn!(bundle_id = %record.bundle_id, reason = %reason, "Bundle extraction failed");
                record.status = BundleStatus::Failed;
                record.warnings.push(format!("extraction_failed:{}", reason));
                self.store.update(&record)?;
                return Err(BundleError::Extraction {
                    bundle_id: record.bundle_id,
                    reason,
                });
            }
        };
        record.staged_path = staged.extracted.clone();
        record.warnings.extend(staged.warnings.iter().cloned());

        let log_dir = self
            .selector
            .resolve_log_dir(&staged.root)
            .unwrap_or_else(|| staged.root.clone());
        let selection = match self.selector.select(&log_dir, request.max_files) {
            Ok(selection) => selection,
            Err(e) => {
                record.status = BundleStatus::Failed;
                record.warnings.push(format!("selection_failed:{}", e));
                self.store.update(&record)?;
                return Err(e);
            }
        };
        record.warnings.extend(selection.warnings.iter().cloned());

        let context = EmitContext {
            bundle_id: record.bundle_id.clone(),
            sptid: sptid.clone(),
            categories,
        };
        let outcome = IngestPipeline::new(&self.config.ingest, self.sink.clone())
            .run(&selection.files, &context);

        record.host = outcome.identity.host.clone();
        record.host_id = outcome.identity.host_id.clone();
        record.ptop_version = outcome.identity.ptop_version.clone();
        record.logs_processed = outcome.logs_processed;
        record.metrics_ingested = outcome.metrics_ingested;
        record.start_ts = outcome.start_ts;
        record.end_ts = outcome.end_ts;
        record.partial = outcome.partial;
        record.status = if outcome.partial {
            BundleStatus::Partial
        } else {
            BundleStatus::Ready
        };
        record.writer = outcome.stats;
        record.warnings.extend(outcome.warnings);

        if !self.store.update(&record)? {
            warn!(bundle_id = %record.bundle_id, "Bundle was removed while ingesting");
            return Ok(record);
        }
        self.store.activate(&record.bundle_id, now_ms())?;
        self.store.flush()?;
        info!(
            bundle_id = %record.bundle_id,
            status = %record.status,
            logs_processed = record.logs_processed,
            metrics_ingested = record.metrics_ingested,
            warnings = record.warnings.len(),
            "Bundle loaded"
        );
        Ok(record)
    }

    /// Remove one bundle, the active one when `bundle_id` is `None`.
    #[instrument(skip(self))]
    pub fn unload(&self, bundle_id: Option<&str>) -> Result<UnloadOutcome, BundleError> {
        let target = match bundle_id {
            Some(id) => id.to_string(),
            None => self
                .store
                .active()?
                .map(|ctx| ctx.bundle_id)
                .ok_or_else(|| BundleError::NotFound("no active bundle".to_string()))?,
        };
        let candidates: Vec<String> = self
            .store
            .list()?
            .into_iter()
            .map(|r| r.bundle_id)
            .collect();
        let removal = self
            .store
            .remove(&target, &candidates, now_ms())?
            .ok_or_else(|| BundleError::NotFound(target.clone()))?;

        let mut outcome = UnloadOutcome {
            unloaded: vec![target.clone()],
            promoted: removal.promoted.clone(),
            ..Default::default()
        };
        if let Some(dir) = &removal.record.staged_path {
            if let Err(e) = remove_staged(dir) {
                warn!(
                    bundle_id = %target,
                    dir = %dir.display(),
                    error = %e,
                    "Failed to remove staged files"
                );
                outcome.warnings.push(format!("staging_cleanup_failed:{}", e));
            }
        }
        outcome.samples_deleted = self.discard_samples(&target, &mut outcome.warnings);
        info!(
            bundle_id = %target,
            was_active = removal.was_active,
            promoted = ?removal.promoted,
            "Bundle unloaded"
        );
        Ok(outcome)
    }

    /// Remove every bundle and all extracted artifacts, and clear the active pointer.
    pub fn purge_all(&self) -> Result<UnloadOutcome, BundleError> {
        let removed = self.store.purge()?;

        let mut outcome = UnloadOutcome {
            purged: true,
            ..Default::default()
        };
        for record in &removed {
            outcome.samples_deleted +=
                self.discard_samples(&record.bundle_id, &mut outcome.warnings);
            outcome.unloaded.push(record.bundle_id.clone());
        }
        if let Err(e) = remove_staged(&self.config.registry.staging_dir) {
            warn!(error = %e, "Failed to remove staging directory");
            outcome.warnings.push(format!("staging_cleanup_failed:{}", e));
        }
        info!(removed = removed.len(), "Purged all bundles");
        Ok(outcome)
    }

    /// All bundles, most recently created first.
    pub fn list(&self) -> Result<Vec<BundleListing>, BundleError> {
        let active = self.store.active()?.map(|ctx| ctx.bundle_id);
        Ok(self
            .store
            .list()?
            .into_iter()
            .map(|record| {
                let is_active = active.as_deref() == Some(record.bundle_id.as_str());
                BundleListing {
                    record,
                    active: is_active,
                }
            })
            .collect())
    }

    pub fn get(&self, bundle_id: &str) -> Result<BundleRecord, BundleError> {
        self.store
            .get(bundle_id)?
            .ok_or_else(|| BundleError::NotFound(bundle_id.to_string()))
    }

    /// Make `bundle_id` the active bundle.
    pub fn set_active(&self, bundle_id: &str) -> Result<ActiveContext, BundleError> {
        let record = self.get(bundle_id)?;
        if !record.status.is_promotable() {
            return Err(BundleError::InvalidRequest(format!(
                "bundle {} is {} and cannot be activated",
                bundle_id, record.status
            )));
        }
        if !self.store.activate(bundle_id, now_ms())? {
            return Err(BundleError::NotFound(bundle_id.to_string()));
        }
        self.store
            .active()?
            .ok_or_else(|| BundleError::NotFound(bundle_id.to_string()))
    }

    pub fn active_context(&self) -> Result<Option<ActiveContext>, BundleError> {
        Ok(self.store.active()?)
    }

    /// Purge a bundle's samples from the sink when configured to; failures become warnings.
    fn discard_samples(&self, bundle_id: &str, warnings: &mut Vec<String>) -> usize {
        if !self.config.registry.delete_samples_on_unload {
            return 0;
        }
        match self.sink.purge_bundle(bundle_id) {
            Ok(deleted) => {
                debug!(bundle_id, deleted, "Purged bundle samples");
                deleted
            }
            Err(e) => {
                warn!(bundle_id, error = %e, "Failed to purge bundle samples");
                warnings.push(format!("sample_purge_failed:{}:{}", bundle_id, e));
                0
            }
        }
    }
}

fn parse_categories(names: Option<&[String]>) -> Result<Option<BTreeSet<Category>>, BundleError> {
    let Some(names) = names else {
        return Ok(None);
    };
    let mut set = BTreeSet::new();
    for name in names {
        let category = Category::parse(name)
            .ok_or_else(|| BundleError::InvalidRequest(format!("unknown category: {}", name)))?;
        set.insert(category);
    }
    Ok(Some(set))
}

/// `NIOSSPT-<digits>` from the deepest path component that starts with it.
fn deduce_sptid(path: &Path) -> Option<String> {
    path.components().rev().find_map(|component| {
        let Component::Normal(name) = component else {
            return None;
        };
        let rest = name.to_str()?.strip_prefix(SPTID_PREFIX)?;
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        (!digits.is_empty()).then(|| format!("{}{}", SPTID_PREFIX, digits))
    })
}

fn new_bundle_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("b-{}", &uuid[..10])
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
