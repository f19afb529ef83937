//! Low-cost content fingerprint of a bundle path using BLAKE3.
//!
//! Directory: hash("DIR:" || basename || ":" || mtime || sorted entry names, first 200).
//! File: hash("FILE:" || name || ":" || size || ":" || mtime || first 1 MiB of content).

use crate::error::StorageError;
use blake3::Hasher;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

const MAX_DIR_ENTRIES: usize = 200;
const FILE_SAMPLE_BYTES: u64 = 1024 * 1024;

/// Hex-encoded fingerprint of `path`.
pub fn fingerprint(path: &Path) -> Result<String, StorageError> {
    let metadata = fs::metadata(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let mut hasher = Hasher::new();
    if metadata.is_dir() {
        hasher.update(format!("DIR:{}:{}", name, mtime).as_bytes());
        let mut entries = Vec::new();
        for entry in WalkDir::new(path).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                StorageError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Failed to list bundle directory: {}", e),
                ))
            })?;
            entries.push(entry.file_name().to_string_lossy().into_owned());
        }
        entries.sort();
        for entry in entries.iter().take(MAX_DIR_ENTRIES) {
            hasher.update(b"\n");
            hasher.update(entry.as_bytes());
        }
    } else {
        hasher.update(format!("FILE:{}:{}:{}", name, metadata.len(), mtime).as_bytes());
        let mut sample = Vec::new();
        File::open(path)?
            .take(FILE_SAMPLE_BYTES)
            .read_to_end(&mut sample)?;
        hasher.update(&sample);
    }
    Ok(hex::encode(hasher.finalize().as_bytes()))
}
