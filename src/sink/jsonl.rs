//! Append-only JSON Lines sink: one JSON object per sample.

use super::SampleSink;
use crate::error::SinkError;
use crate::types::MetricSample;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

/// Append target that can be cut back to an earlier length.
trait Truncate: Write {
    fn current_len(&mut self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn current_len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append `buf` in full or not at all.
fn append_whole<T: Truncate>(target: &mut T, buf: &[u8]) -> io::Result<()> {
    let start = target.current_len()?;
    let result = target.write_all(buf).and_then(|_| target.flush());
    if result.is_err() {
        if let Err(undo) = target.truncate_to(start) {
            warn!(error = %undo, len = start, "Failed to roll back partial append");
        }
    }
    result
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it and its parent directories if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = Self::append_handle(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_handle(path: &Path) -> Result<File, SinkError> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }

    fn encode(sample: &MetricSample, buf: &mut Vec<u8>) -> Result<(), SinkError> {
        serde_json::to_writer(&mut *buf, sample)
            .map_err(|e| SinkError::Row(format!("Failed to encode sample: {}", e)))?;
        buf.push(b'\n');
        Ok(())
    }
}

impl SampleSink for JsonLinesSink {
    fn bulk_load(&self, samples: &[MetricSample]) -> Result<usize, SinkError> {
        let mut buf = Vec::with_capacity(samples.len() * 128);
        for sample in samples {
            Self::encode(sample, &mut buf)?;
        }
        let mut file = self.file.lock();
        append_whole(&mut *file, &buf)
            .map_err(|e| SinkError::Bulk(format!("Failed to append batch: {}", e)))?;
        Ok(samples.len())
    }

    fn insert_row(&self, sample: &MetricSample) -> Result<(), SinkError> {
        let mut buf = Vec::with_capacity(128);
        Self::encode(sample, &mut buf)?;
        let mut file = self.file.lock();
        append_whole(&mut *file, &buf)
            .map_err(|e| SinkError::Row(format!("Failed to append sample: {}", e)))
    }

    /// Rewrites the file without the bundle's lines.
    fn purge_bundle(&self, bundle_id: &str) -> Result<usize, SinkError> {
        let mut file = self.file.lock();

        let tmp = self.path.with_extension("purge.tmp");
        let mut removed = 0usize;
        {
            let reader = BufReader::new(File::open(&self.path)?);
            let mut out = BufWriter::new(File::create(&tmp)?);
            for line in reader.lines() {
                let line = line?;
                let belongs = serde_json::from_str::<MetricSample>(&line)
                    .map(|s| s.label("bundle_id") == Some(bundle_id))
                    .unwrap_or(false);
                if belongs {
                    removed += 1;
                } else {
                    out.write_all(line.as_bytes())?;
                    out.write_all(b"\n")?;
                }
            }
            out.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        *file = Self::append_handle(&self.path)?;
        debug!(
            bundle_id,
            removed,
            path = %self.path.display(),
            "Purged samples from JSON lines sink"
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Labels;
    use tempfile::TempDir;

    fn sample(bundle: &str, value: f64) -> MetricSample {
        let mut labels = Labels::new();
        labels.insert("bundle_id".to_string(), bundle.to_string());
        MetricSample::new("mem_free_percent", value, 1_700_000_000_000, labels)
    }

    fn read_back(path: &Path) -> Vec<MetricSample> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn bulk_and_row_writes_append_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("samples.jsonl");
        let sink = JsonLinesSink::open(&path).unwrap();
        assert_eq!(sink.bulk_load(&[sample("a", 1.0), sample("a", 2.0)]).unwrap(), 2);
        sink.insert_row(&sample("b", 3.0)).unwrap();

        let stored = read_back(&path);
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[2].value, 3.0);
        assert_eq!(stored[2].label("bundle_id"), Some("b"));
    }

    #[test]
    fn purge_rewrites_without_bundle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("samples.jsonl");
        let sink = JsonLinesSink::open(&path).unwrap();
        sink.bulk_load(&[sample("a", 1.0), sample("b", 2.0), sample("a", 3.0)])
            .unwrap();
        assert_eq!(sink.purge_bundle("a").unwrap(), 2);
        sink.insert_row(&sample("c", 4.0)).unwrap();

        let names: Vec<String> = read_back(&path)
            .iter()
            .filter_map(|s| s.label("bundle_id").map(str::to_string))
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    /// In-memory file that accepts at most `capacity` bytes.
    struct SmallDisk {
        data: Vec<u8>,
        capacity: usize,
    }

    impl Write for SmallDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.capacity.saturating_sub(self.data.len());
            if room == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left"));
            }
            let n = room.min(buf.len());
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Truncate for SmallDisk {
        fn current_len(&mut self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn failed_append_leaves_no_partial_lines() {
        let mut disk = SmallDisk {
            data: b"kept\n".to_vec(),
            capacity: 16,
        };
        assert!(append_whole(&mut disk, b"first line\nsecond line\n").is_err());
        assert_eq!(disk.data, b"kept\n");

        // Writing the same rows one at a time afterwards stores each exactly once
        append_whole(&mut disk, b"first\n").unwrap();
        assert!(append_whole(&mut disk, b"second\n").is_err());
        assert_eq!(disk.data, b"kept\nfirst\n");
    }

    #[test]
    fn bulk_after_row_writes_keeps_order_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("samples.jsonl");
        let sink = JsonLinesSink::open(&path).unwrap();
        sink.insert_row(&sample("a", 1.0)).unwrap();
        sink.bulk_load(&[sample("a", 2.0), sample("a", 3.0)]).unwrap();

        let values: Vec<f64> = read_back(&path).iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }
}
