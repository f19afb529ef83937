//! sled-backed bundle state store.
//!
//! Three trees share one database:
//! - `bundles`: bundle id -> JSON [`BundleRecord`]
//! - `bundle_hashes`: content hash -> bundle id (the uniqueness index)
//! - `active`: a single key -> bincode [`ActiveContext`]
//!
//! Every operation touching more than one tree runs in one sled transaction, so the
//! hash index and the active pointer never disagree with the record set, even across
//! processes sharing the database.

use crate::error::{to_storage_data, to_storage_io, StorageError};
use crate::ingest::WriterStats;
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::Transactional;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

const ACTIVE_KEY: &[u8] = b"active";

type TxResult<T> = ConflictableTransactionResult<T, StorageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleStatus {
    Ingesting,
    Ready,
    Partial,
    Failed,
}

impl BundleStatus {
    /// Whether a bundle in this state may be promoted to active.
    pub fn is_promotable(self) -> bool {
        matches!(self, BundleStatus::Ready | BundleStatus::Partial)
    }
}

impl fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BundleStatus::Ingesting => "ingesting",
            BundleStatus::Ready => "ready",
            BundleStatus::Partial => "partial",
            BundleStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One ingested bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleRecord {
    pub bundle_id: String,
    pub bundle_hash: String,
    pub sptid: Option<String>,
    pub source_path: PathBuf,
    /// Extraction directory owned by the registry; `None` for bundles read in place.
    pub staged_path: Option<PathBuf>,
    pub host: Option<String>,
    pub host_id: Option<String>,
    pub ptop_version: Option<String>,
    pub status: BundleStatus,
    pub logs_processed: usize,
    pub metrics_ingested: u64,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    /// Set on the value returned for a repeated load; never persisted as true.
    #[serde(default)]
    pub reused: bool,
    #[serde(default)]
    pub replaced_previous: bool,
    #[serde(default)]
    pub partial: bool,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    /// Category filter applied at load; `None` means all.
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    #[serde(default)]
    pub writer: WriterStats,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl BundleRecord {
    pub fn new(
        bundle_id: impl Into<String>,
        bundle_hash: impl Into<String>,
        source_path: impl Into<PathBuf>,
        created_at: i64,
    ) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            bundle_hash: bundle_hash.into(),
            sptid: None,
            source_path: source_path.into(),
            staged_path: None,
            host: None,
            host_id: None,
            ptop_version: None,
            status: BundleStatus::Ingesting,
            logs_processed: 0,
            metrics_ingested: 0,
            start_ts: None,
            end_ts: None,
            reused: false,
            replaced_previous: false,
            partial: false,
            created_at,
            categories: None,
            writer: WriterStats::default(),
            warnings: Vec::new(),
        }
    }
}

/// The single active-bundle pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveContext {
    pub bundle_id: String,
    pub activated_at: i64,
}

/// Result of claiming a content hash for a new record.
#[derive(Debug)]
pub enum Claim {
    /// The new record was inserted; `replaced` is the record it displaced under `force`.
    Created { replaced: Option<BundleRecord> },
    /// The hash already belongs to this record.
    Existing(BundleRecord),
}

/// Result of removing one record.
#[derive(Debug)]
pub struct Removal {
    pub record: BundleRecord,
    pub was_active: bool,
    pub promoted: Option<String>,
}

pub struct BundleStore {
    db: sled::Db,
    bundles: sled::Tree,
    hashes: sled::Tree,
    active: sled::Tree,
}

impl BundleStore {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open sled database: {}", e),
            ))
        })?;
        let bundles = db.open_tree("bundles").map_err(to_storage_io)?;
        let hashes = db.open_tree("bundle_hashes").map_err(to_storage_io)?;
        let active = db.open_tree("active").map_err(to_storage_io)?;
        Ok(Self {
            db,
            bundles,
            hashes,
            active,
        })
    }

    pub fn get(&self, bundle_id: &str) -> Result<Option<BundleRecord>, StorageError> {
        match self.bundles.get(bundle_id).map_err(to_storage_io)? {
            Some(value) => Ok(Some(decode_record(&value)?)),
            None => Ok(None),
        }
    }

    pub fn find_by_hash(&self, bundle_hash: &str) -> Result<Option<BundleRecord>, StorageError> {
        match self.hashes.get(bundle_hash).map_err(to_storage_io)? {
            Some(id) => self.get(&String::from_utf8_lossy(&id)),
            None => Ok(None),
        }
    }

    /// All records, most recently created first.
    pub fn list(&self) -> Result<Vec<BundleRecord>, StorageError> {
        let mut records = Vec::new();
        for item in self.bundles.iter() {
            let (_, value) = item.map_err(to_storage_io)?;
            records.push(decode_record(&value)?);
        }
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.bundle_id.cmp(&a.bundle_id))
        });
        Ok(records)
    }

    /// Overwrite an existing record. Records removed in the meantime stay removed.
    pub fn update(&self, record: &BundleRecord) -> Result<bool, StorageError> {
        let value = encode_record(record)?;
        let id = record.bundle_id.as_str();
        self.bundles
            .transaction(|bundles| -> TxResult<bool> {
                if bundles.get(id)?.is_none() {
                    return Ok(false);
                }
                bundles.insert(id, value.as_slice())?;
                Ok(true)
            })
            .map_err(from_tx)
    }

    /// Insert `record` if its hash is unclaimed. With `replace`, an existing owner of the
    /// hash is removed in the same transaction (and deactivated if it was active).
    pub fn claim(&self, record: &BundleRecord, replace: bool) -> Result<Claim, StorageError> {
        let value = encode_record(record)?;
        let id = record.bundle_id.as_str();
        let hash = record.bundle_hash.as_str();

        (&self.bundles, &self.hashes, &self.active)
            .transaction(|(bundles, hashes, active)| -> TxResult<Claim> {
                let mut replaced = None;
                if let Some(existing_id) = hashes.get(hash)? {
                    if let Some(existing) = bundles.get(&existing_id)? {
                        let existing = decode_record(&existing).map_err(abort)?;
                        if !replace {
                            return Ok(Claim::Existing(existing));
                        }
                        bundles.remove(existing.bundle_id.as_str())?;
                        if active_id(active)?.as_deref() == Some(existing.bundle_id.as_str()) {
                            active.remove(ACTIVE_KEY)?;
                        }
                        replaced = Some(existing);
                    }
                }
                bundles.insert(id, value.as_slice())?;
                hashes.insert(hash, id)?;
                Ok(Claim::Created { replaced })
            })
            .map_err(from_tx)
    }

    /// Point the active context at `bundle_id`. Returns false if no such record exists.
    pub fn activate(&self, bundle_id: &str, now_ms: i64) -> Result<bool, StorageError> {
        let context = encode_context(&ActiveContext {
            bundle_id: bundle_id.to_string(),
            activated_at: now_ms,
        })?;
        (&self.bundles, &self.active)
            .transaction(|(bundles, active)| -> TxResult<bool> {
                if bundles.get(bundle_id)?.is_none() {
                    return Ok(false);
                }
                active.insert(ACTIVE_KEY, context.as_slice())?;
                Ok(true)
            })
            .map_err(from_tx)
    }

    pub fn active(&self) -> Result<Option<ActiveContext>, StorageError> {
        match self.active.get(ACTIVE_KEY).map_err(to_storage_io)? {
            Some(value) => Ok(Some(decode_context(&value)?)),
            None => Ok(None),
        }
    }

    /// Remove one record. When it was active, the first promotable record among
    /// `candidates` (in order) that still exists becomes active in the same transaction.
    pub fn remove(
        &self,
        bundle_id: &str,
        candidates: &[String],
        now_ms: i64,
    ) -> Result<Option<Removal>, StorageError> {
        (&self.bundles, &self.hashes, &self.active)
            .transaction(|(bundles, hashes, active)| -> TxResult<Option<Removal>> {
                let record = match bundles.remove(bundle_id)? {
                    Some(value) => decode_record(&value).map_err(abort)?,
                    None => return Ok(None),
                };
                if hashes.get(record.bundle_hash.as_str())?.as_deref() == Some(bundle_id.as_bytes())
                {
                    hashes.remove(record.bundle_hash.as_str())?;
                }

                let was_active = active_id(active)?.as_deref() == Some(bundle_id);
                let mut promoted = None;
                if was_active {
                    active.remove(ACTIVE_KEY)?;
                    for candidate in candidates.iter().filter(|c| c.as_str() != bundle_id) {
                        let Some(value) = bundles.get(candidate.as_str())? else {
                            continue;
                        };
                        let next = decode_record(&value).map_err(abort)?;
                        if next.status.is_promotable() {
                            let context = encode_context(&ActiveContext {
                                bundle_id: next.bundle_id.clone(),
                                activated_at: now_ms,
                            })
                            .map_err(abort)?;
                            active.insert(ACTIVE_KEY, context)?;
                            promoted = Some(next.bundle_id);
                            break;
                        }
                    }
                }
                Ok(Some(Removal {
                    record,
                    was_active,
                    promoted,
                }))
            })
            .map_err(from_tx)
    }

    /// Remove every record and clear the active pointer. Records claimed while the purge
    /// runs are swept too; it returns once the store has been observed empty.
    pub fn purge(&self) -> Result<Vec<BundleRecord>, StorageError> {
        self.purge_with(|| self.ids())
    }

    fn purge_with<F>(&self, mut list_ids: F) -> Result<Vec<BundleRecord>, StorageError>
    where
        F: FnMut() -> Result<Vec<String>, StorageError>,
    {
        let mut removed = Vec::new();
        loop {
            let ids = list_ids()?;
            removed.extend(self.remove_all(&ids)?);
            if self.bundles.is_empty() {
                return Ok(removed);
            }
            debug!(removed = removed.len(), "Bundles claimed during purge, sweeping again");
        }
    }

    fn ids(&self) -> Result<Vec<String>, StorageError> {
        self.bundles
            .iter()
            .keys()
            .map(|key| {
                key.map(|k| String::from_utf8_lossy(&k).into_owned())
                    .map_err(to_storage_io)
            })
            .collect()
    }

    /// Remove the given records and clear the active pointer, atomically.
    pub fn remove_all(&self, bundle_ids: &[String]) -> Result<Vec<BundleRecord>, StorageError> {
        (&self.bundles, &self.hashes, &self.active)
            .transaction(|(bundles, hashes, active)| -> TxResult<Vec<BundleRecord>> {
                let mut removed = Vec::new();
                for id in bundle_ids {
                    if let Some(value) = bundles.remove(id.as_str())? {
                        let record = decode_record(&value).map_err(abort)?;
                        hashes.remove(record.bundle_hash.as_str())?;
                        removed.push(record);
                    }
                }
                active.remove(ACTIVE_KEY)?;
                Ok(removed)
            })
            .map_err(from_tx)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush().map_err(to_storage_io)?;
        Ok(())
    }
}

fn active_id(
    active: &TransactionalTree,
) -> Result<Option<String>, ConflictableTransactionError<StorageError>> {
    match active.get(ACTIVE_KEY)? {
        Some(value) => Ok(Some(decode_context(&value).map_err(abort)?.bundle_id)),
        None => Ok(None),
    }
}

fn abort(err: StorageError) -> ConflictableTransactionError<StorageError> {
    ConflictableTransactionError::Abort(err)
}

fn from_tx(err: TransactionError<StorageError>) -> StorageError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => to_storage_io(e),
    }
}

fn encode_record(record: &BundleRecord) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(record).map_err(to_storage_data)
}

fn decode_record(bytes: &[u8]) -> Result<BundleRecord, StorageError> {
    serde_json::from_slice(bytes)
        .map_err(|e| StorageError::Corrupt(format!("bundle record: {}", e)))
}

fn encode_context(context: &ActiveContext) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(context).map_err(to_storage_data)
}

fn decode_context(bytes: &[u8]) -> Result<ActiveContext, StorageError> {
    bincode::deserialize(bytes)
        .map_err(|e| StorageError::Corrupt(format!("active context: {}", e)))
}
