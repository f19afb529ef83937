//! Staging: directories are used in place, tar archives are extracted under the
//! staging root.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Where a bundle's files can be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBundle {
    /// Root of the bundle tree.
    pub root: PathBuf,
    /// Extraction directory owned by the registry, if the input was an archive.
    pub extracted: Option<PathBuf>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    TarGz,
}

impl ArchiveKind {
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveKind::TarGz)
        } else if name.ends_with(".tar") {
            Some(ArchiveKind::Tar)
        } else {
            None
        }
    }
}

/// `<staging_root>/<sptid or "_">/<first 12 hex chars of the hash>`
pub fn staging_dir_for(staging_root: &Path, sptid: Option<&str>, bundle_hash: &str) -> PathBuf {
    let short = &bundle_hash[..bundle_hash.len().min(12)];
    staging_root.join(sptid.unwrap_or("_")).join(short)
}

/// Make `path` readable as a bundle tree. Errors are returned as a reason string for the
/// bundle's failure record.
pub fn stage(path: &Path, target: &Path) -> Result<StagedBundle, String> {
    if path.is_dir() {
        return Ok(StagedBundle {
            root: path.to_path_buf(),
            extracted: None,
            warnings: Vec::new(),
        });
    }
    let kind = ArchiveKind::detect(path)
        .ok_or_else(|| format!("unsupported bundle file: {}", path.display()))?;

    if target.exists() {
        fs::remove_dir_all(target)
            .map_err(|e| format!("cannot clear staging directory: {}", e))?;
    }
    fs::create_dir_all(target).map_err(|e| format!("cannot create staging directory: {}", e))?;

    let file = File::open(path).map_err(|e| format!("cannot open archive: {}", e))?;
    let reader: Box<dyn Read> = match kind {
        ArchiveKind::Tar => Box::new(BufReader::new(file)),
        ArchiveKind::TarGz => Box::new(flate2::read::GzDecoder::new(BufReader::new(file))),
    };
    let skipped = match unpack(reader, target) {
        Ok(skipped) => skipped,
        Err(e) => {
            if let Err(cleanup) = remove_staged(target) {
                warn!(
                    target = %target.display(),
                    error = %cleanup,
                    "Failed to remove partial extraction"
                );
            }
            return Err(format!("archive extraction failed: {}", e));
        }
    };

    let mut warnings = Vec::new();
    if skipped > 0 {
        warn!(archive = %path.display(), skipped, "Skipped unsafe archive entries");
        warnings.push(format!("unsafe_archive_entry_skipped:{}", skipped));
    }
    debug!(archive = %path.display(), target = %target.display(), "Archive extracted");
    Ok(StagedBundle {
        root: single_subdirectory(target).unwrap_or_else(|| target.to_path_buf()),
        extracted: Some(target.to_path_buf()),
        warnings,
    })
}

/// Remove an extraction directory, ignoring one that is already gone.
pub fn remove_staged(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn is_safe_entry(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Unpack every safe entry; returns the number of entries skipped.
fn unpack(reader: Box<dyn Read>, target: &Path) -> io::Result<usize> {
    let mut archive = tar::Archive::new(reader);
    let mut skipped = 0usize;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.into_owned();
        if !is_safe_entry(&entry_path) {
            debug!(entry = %entry_path.display(), "Skipping archive entry outside the bundle");
            skipped += 1;
            continue;
        }
        if !entry.unpack_in(target)? {
            skipped += 1;
        }
    }
    Ok(skipped)
}

/// Archives usually wrap the bundle in one top-level directory.
fn single_subdirectory(dir: &Path) -> Option<PathBuf> {
    let mut entries = fs::read_dir(dir).ok()?.filter_map(Result::ok);
    let first = entries.next()?;
    if entries.next().is_some() || !first.file_type().ok()?.is_dir() {
        return None;
    }
    Some(first.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn append(builder: &mut tar::Builder<impl std::io::Write>, name: &str, body: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, body).unwrap();
    }

    #[test]
    fn directory_is_used_in_place() {
        let dir = TempDir::new().unwrap();
        let staged = stage(dir.path(), &dir.path().join("unused")).unwrap();
        assert_eq!(staged.root, dir.path());
        assert!(staged.extracted.is_none());
    }

    #[test]
    fn tar_gz_is_extracted_and_unwrapped() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("bundle.tar.gz");
        {
            let gz = GzEncoder::new(File::create(&archive).unwrap(), Compression::default());
            let mut builder = tar::Builder::new(gz);
            append(&mut builder, "NIOSSPT-1234/var/log/ptop-20250101_0000.log", b"TIME 0 1\n");
            builder.into_inner().unwrap().finish().unwrap();
        }
        let target = staging_dir_for(&dir.path().join("staging"), Some("1234"), "abcdef0123456789");
        assert!(target.ends_with("1234/abcdef012345"));

        let staged = stage(&archive, &target).unwrap();
        assert_eq!(staged.extracted.as_deref(), Some(target.as_path()));
        assert!(staged.root.join("var/log/ptop-20250101_0000.log").is_file());
        assert!(staged.warnings.is_empty());
    }

    #[test]
    fn unsafe_entries_are_skipped() {
        assert!(!is_safe_entry(Path::new("../escape.log")));
        assert!(!is_safe_entry(Path::new("/etc/passwd")));
        assert!(!is_safe_entry(Path::new("a/../../b")));
        assert!(is_safe_entry(Path::new("./var/log/x.log")));
    }

    #[test]
    fn other_files_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bundle.zip");
        fs::write(&path, b"PK").unwrap();
        let err = stage(&path, &dir.path().join("t")).unwrap_err();
        assert!(err.contains("unsupported bundle file"));
    }

    #[test]
    fn corrupt_archive_fails_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bundle.tgz");
        fs::write(&path, b"definitely not gzip").unwrap();
        let target = dir.path().join("t");
        assert!(stage(&path, &target).is_err());
        assert!(!target.exists());
    }

    #[test]
    fn removing_missing_staging_dir_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(remove_staged(&dir.path().join("gone")).is_ok());
    }
}
