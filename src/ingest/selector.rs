//! Log file discovery and ordering.
//!
//! Candidate files are named `<prefix>-YYYYMMDD_HHMM.<ext>`. The filename stamp is the
//! ordering key; modification times are never consulted.

use crate::config::IngestConfig;
use crate::error::{BundleError, StorageError};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M";
const STAMP_LEN: usize = 13;

/// A log file chosen for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedLog {
    pub path: PathBuf,
    pub file_name: String,
    pub stamp: NaiveDateTime,
}

/// Result of one selection pass: files in chronological order plus warnings.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub files: Vec<SelectedLog>,
    pub candidates: usize,
    pub warnings: Vec<String>,
}

/// Picks the most recent log files of a bundle.
#[derive(Debug, Clone)]
pub struct LogFileSelector {
    prefix: String,
    extension: String,
    default_max_files: usize,
    max_files_limit: usize,
}

impl LogFileSelector {
    pub fn new(
        prefix: impl Into<String>,
        extension: impl Into<String>,
        default_max_files: usize,
        max_files_limit: usize,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
            default_max_files,
            max_files_limit,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            config.log_file_prefix.clone(),
            config.log_file_extension.clone(),
            config.default_max_files,
            config.max_files_limit,
        )
    }

    /// Where the logs of an extracted bundle live: `<root>/var/log` when present,
    /// otherwise the root itself if it holds matching files.
    pub fn resolve_log_dir(&self, root: &Path) -> Option<PathBuf> {
        let var_log = root.join("var").join("log");
        if var_log.is_dir() {
            return Some(var_log);
        }
        let has_logs = std::fs::read_dir(root)
            .map(|entries| {
                entries.filter_map(Result::ok).any(|entry| {
                    entry
                        .file_name()
                        .to_str()
                        .map(|name| self.parse_stamp(name).is_some())
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false);
        has_logs.then(|| root.to_path_buf())
    }

    /// Parse `<prefix>-YYYYMMDD_HHMM.<ext>`.
    ///
    /// `None` when the name does not have the pattern's shape; `Some(Err)` when it does but
    /// the stamp is not a real date/time.
    pub fn parse_stamp(&self, file_name: &str) -> Option<Result<NaiveDateTime, ()>> {
        let rest = file_name.strip_prefix(self.prefix.as_str())?;
        let rest = rest.strip_prefix('-')?;
        let stem = rest.strip_suffix(self.extension.as_str())?;
        let stem = stem.strip_suffix('.')?;
        let shaped = stem.len() == STAMP_LEN
            && stem.bytes().enumerate().all(|(i, b)| {
                if i == 8 {
                    b == b'_'
                } else {
                    b.is_ascii_digit()
                }
            });
        if !shaped {
            return None;
        }
        Some(NaiveDateTime::parse_from_str(stem, STAMP_FORMAT).map_err(|_| ()))
    }

    /// Select up to `max_files` (default when `None`) of the newest logs in `log_dir`,
    /// returned oldest first.
    pub fn select(
        &self,
        log_dir: &Path,
        max_files: Option<usize>,
    ) -> Result<Selection, BundleError> {
        let mut selection = Selection::default();

        let requested = max_files.unwrap_or(self.default_max_files);
        if requested == 0 {
            return Err(BundleError::InvalidRequest(
                "max_files must be at least 1".to_string(),
            ));
        }
        let limit = if requested > self.max_files_limit {
            warn!(
                requested,
                limit = self.max_files_limit,
                "max_files above limit, clamping"
            );
            selection.warnings.push(format!(
                "max_files_clamped:{}->{}",
                requested, self.max_files_limit
            ));
            self.max_files_limit
        } else {
            requested
        };

        if !log_dir.is_dir() {
            selection.warnings.push("log_dir_missing".to_string());
            selection.warnings.push("no_valid_logs".to_string());
            return Ok(selection);
        }

        let mut candidates: Vec<SelectedLog> = Vec::new();
        let mut skipped = 0usize;
        let walker = WalkDir::new(log_dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|e| {
                StorageError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Failed to list log directory: {}", e),
                ))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            match self.parse_stamp(&file_name) {
                Some(Ok(stamp)) => candidates.push(SelectedLog {
                    path: entry.into_path(),
                    file_name,
                    stamp,
                }),
                Some(Err(())) => {
                    warn!(file = %file_name, "Log filename carries an invalid date/time");
                    selection.warnings.push(format!("bad_filename:{}", file_name));
                }
                None => {
                    debug!(file = %file_name, "Skipping non-matching file");
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            selection
                .warnings
                .push(format!("skipped_non_matching_files:{}", skipped));
        }

        selection.candidates = candidates.len();
        if candidates.is_empty() {
            selection.warnings.push("no_valid_logs".to_string());
            return Ok(selection);
        }

        candidates.sort_by(|a, b| {
            b.stamp
                .cmp(&a.stamp)
                .then_with(|| b.file_name.cmp(&a.file_name))
        });
        if candidates.len() > limit {
            selection.warnings.push("max_files_truncated".to_string());
            candidates.truncate(limit);
        }
        candidates.reverse();

        selection.warnings.push(format!(
            "selected_{}_of_{}_candidates_requested_{}",
            candidates.len(),
            selection.candidates,
            requested
        ));
        selection.files = candidates;
        Ok(selection)
    }
}
