//! Snapshot reading: decompress the staged stream once, iterate frames.

use bytes::Bytes;
use tracing::warn;

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::writer::{SnapshotMeta, META_FILE};

pub struct SnapshotReader {
    /// Fully decompressed frame stream.
    data: Vec<u8>,
    meta: Option<SnapshotMeta>,
}

impl SnapshotReader {
    /// Open the backend's staged snapshot stream. Remote backends must
    /// have hydrated the stage first via [`StorageBackend::prepare_read`].
    pub fn open(backend: &StorageBackend) -> Result<SnapshotReader, StorageError> {
        let data = zstd::decode_all(backend.reader()?).map_err(StorageError::Io)?;

        // The sidecar is informational; reading proceeds without it.
        let meta = std::fs::read_to_string(backend.snapshot_dir().join(META_FILE))
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok());

        Ok(SnapshotReader { data, meta })
    }

    pub fn meta(&self) -> Option<&SnapshotMeta> {
        self.meta.as_ref()
    }

    /// Iterate the encoded job frames in write order.
    pub fn frames(&self) -> FrameIter<'_> {
        FrameIter {
            data: &self.data,
            pos: 0,
        }
    }

    /// Copy every frame out as an owned buffer.
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames().map(Bytes::copy_from_slice).collect()
    }
}

pub struct FrameIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.pos == self.data.len() {
            return None;
        }
        if self.pos + 4 > self.data.len() {
            warn!(
                trailing_bytes = self.data.len() - self.pos,
                "snapshot stream ends mid-frame, rest ignored"
            );
            self.pos = self.data.len();
            return None;
        }

        let len =
            u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap()) as usize;

        if self.pos + 4 + len > self.data.len() {
            warn!(
                frame_len = len,
                trailing_bytes = self.data.len() - self.pos,
                "snapshot stream truncated inside a frame, rest ignored"
            );
            self.pos = self.data.len();
            return None;
        }

        let frame = &self.data[self.pos + 4..self.pos + 4 + len];
        self.pos += 4 + len;
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    use chrono::Utc;
    use uuid::Uuid;

    use spindle_core::codec::decode_job;
    use spindle_core::Job;

    use crate::backend::LocalBackend;
    use crate::writer::{SnapshotWriter, SNAPSHOT_FILE};

    fn test_backend() -> (StorageBackend, PathBuf) {
        let dir = std::env::temp_dir().join(format!("spindle-reader-test-{}", Uuid::new_v4()));
        let backend = StorageBackend::Local(LocalBackend::new(dir.clone()).unwrap());
        (backend, dir)
    }

    #[test]
    fn reads_back_what_the_writer_wrote() {
        let (backend, dir) = test_backend();
        let jobs: Vec<Job> = (0..3)
            .map(|i| {
                Job::new(
                    format!("r{i}"),
                    Utc::now() + chrono::Duration::seconds(i),
                    Bytes::from(format!("body-{i}")),
                )
            })
            .collect();

        let mut writer = SnapshotWriter::create(&backend).unwrap();
        for job in &jobs {
            writer.append(job).unwrap();
        }
        writer.finalize().unwrap();

        let reader = SnapshotReader::open(&backend).unwrap();
        assert_eq!(reader.meta().unwrap().job_count, 3);

        let decoded: Vec<Job> = reader
            .frames()
            .map(|frame| decode_job(frame).unwrap())
            .collect();
        assert_eq!(decoded, jobs);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_snapshot_is_a_distinct_error() {
        let (backend, dir) = test_backend();
        match SnapshotReader::open(&backend) {
            Err(StorageError::NoSnapshot(_)) => {}
            Err(other) => panic!("expected NoSnapshot, got {other}"),
            Ok(_) => panic!("expected NoSnapshot, got a reader"),
        }
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn truncated_stream_stops_instead_of_failing() {
        let (backend, dir) = test_backend();
        let mut writer = SnapshotWriter::create(&backend).unwrap();
        writer
            .append(&Job::new("whole", Utc::now(), Bytes::from_static(b"ok")))
            .unwrap();
        writer.finalize().unwrap();

        // Recompress with a half frame glued on the end.
        let reader = SnapshotReader::open(&backend).unwrap();
        let mut raw: Vec<u8> = Vec::new();
        for frame in reader.frames() {
            raw.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            raw.extend_from_slice(frame);
        }
        raw.extend_from_slice(&100u32.to_le_bytes());
        raw.extend_from_slice(b"short");
        let recompressed = zstd::encode_all(raw.as_slice(), 3).unwrap();
        fs::write(dir.join(SNAPSHOT_FILE), recompressed).unwrap();

        let reader = SnapshotReader::open(&backend).unwrap();
        let frames = reader.into_frames();
        assert_eq!(frames.len(), 1, "only the whole frame survives");
        assert_eq!(decode_job(&frames[0]).unwrap().id(), "whole");

        fs::remove_dir_all(&dir).ok();
    }
}
