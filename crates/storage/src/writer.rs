//! Snapshot writing: every outstanding job as a length-prefixed frame in
//! one zstd stream, with a JSON sidecar describing the result.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::info;

use spindle_core::codec::{encode_job, CODEC_VERSION};
use spindle_core::Job;

use crate::backend::StorageBackend;
use crate::error::StorageError;

pub const SNAPSHOT_FILE: &str = "snapshot.dat";
pub const META_FILE: &str = "meta.json";

/// Snapshot metadata stored as meta.json.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct SnapshotMeta {
    pub job_count: usize,
    pub raw_bytes: u64,
    pub size_bytes: u64,
    pub codec_version: u8,
    pub compression: String,
    pub created_at: DateTime<Utc>,
}

pub struct SnapshotWriter {
    dir: PathBuf,
    encoder: zstd::Encoder<'static, Box<dyn Write + Send>>,
    raw_bytes: u64,
    job_count: usize,
}

impl SnapshotWriter {
    /// Open a fresh snapshot stream on the backend's staged write stream,
    /// truncating any previous one.
    pub fn create(backend: &StorageBackend) -> Result<SnapshotWriter, StorageError> {
        let encoder = zstd::Encoder::new(backend.writer()?, 3).map_err(StorageError::Io)?;
        Ok(SnapshotWriter {
            dir: backend.snapshot_dir().to_path_buf(),
            encoder,
            raw_bytes: 0,
            job_count: 0,
        })
    }

    /// Append one encoded job to the zstd-compressed stream.
    pub fn append(&mut self, job: &Job) -> Result<(), StorageError> {
        let encoded = encode_job(job)?;

        let len = encoded.len() as u32;
        self.encoder.write_all(&len.to_le_bytes())?;
        self.encoder.write_all(&encoded)?;

        self.raw_bytes += 4 + encoded.len() as u64;
        self.job_count += 1;
        Ok(())
    }

    /// Finish the zstd stream and write meta.json.
    pub fn finalize(self) -> Result<SnapshotMeta, StorageError> {
        let mut sink = self.encoder.finish().map_err(StorageError::Io)?;
        sink.flush()?;
        drop(sink);

        let snapshot_path = self.dir.join(SNAPSHOT_FILE);
        let size_bytes = fs::metadata(&snapshot_path).map(|m| m.len()).unwrap_or(0);

        let meta = SnapshotMeta {
            job_count: self.job_count,
            raw_bytes: self.raw_bytes,
            size_bytes,
            codec_version: CODEC_VERSION,
            compression: "zstd".to_string(),
            created_at: Utc::now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| StorageError::Other(e.to_string()))?;
        fs::write(self.dir.join(META_FILE), meta_json)?;

        info!(
            jobs = meta.job_count,
            size_bytes = meta.size_bytes,
            raw_bytes = meta.raw_bytes,
            "snapshot written to {}",
            snapshot_path.display()
        );
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use uuid::Uuid;

    use crate::backend::LocalBackend;

    fn test_backend() -> (StorageBackend, PathBuf) {
        let dir = std::env::temp_dir().join(format!("spindle-writer-test-{}", Uuid::new_v4()));
        let backend = StorageBackend::Local(LocalBackend::new(dir.clone()).unwrap());
        (backend, dir)
    }

    #[test]
    fn writes_stream_and_meta_sidecar() {
        let (backend, dir) = test_backend();
        let mut writer = SnapshotWriter::create(&backend).unwrap();
        for i in 0..4 {
            let job = Job::new(format!("w{i}"), Utc::now(), Bytes::from_static(b"payload"));
            writer.append(&job).unwrap();
        }
        let meta = writer.finalize().unwrap();

        assert_eq!(meta.job_count, 4);
        assert_eq!(meta.codec_version, CODEC_VERSION);
        assert!(meta.raw_bytes > 0);
        assert!(dir.join(SNAPSHOT_FILE).exists());

        let sidecar: SnapshotMeta =
            serde_json::from_str(&fs::read_to_string(dir.join(META_FILE)).unwrap()).unwrap();
        assert_eq!(sidecar.job_count, 4);
        assert_eq!(sidecar.compression, "zstd");

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn create_truncates_a_previous_snapshot() {
        let (backend, dir) = test_backend();
        let mut writer = SnapshotWriter::create(&backend).unwrap();
        writer
            .append(&Job::new("old", Utc::now(), Bytes::from_static(b"x")))
            .unwrap();
        writer.finalize().unwrap();

        let writer = SnapshotWriter::create(&backend).unwrap();
        let meta = writer.finalize().unwrap();
        assert_eq!(meta.job_count, 0);

        fs::remove_dir_all(&dir).ok();
    }
}
