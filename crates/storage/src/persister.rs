//! The hub-facing persistence facade: one snapshot writer at a time over
//! a storage backend.

use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Mutex;
use std::thread;

use bytes::Bytes;
use tracing::info;

use spindle_core::{Config, Job, Persister, SpindleError};

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::reader::SnapshotReader;
use crate::writer::SnapshotWriter;

/// Bounded so a slow consumer backpressures the reading thread instead of
/// buffering the whole snapshot.
const RECOVER_CHANNEL_DEPTH: usize = 256;

pub struct SnapshotPersister {
    backend: StorageBackend,
    // std::sync lock, never held across .await (this crate's persister
    // side is fully synchronous).
    writer: Mutex<Option<SnapshotWriter>>,
}

impl SnapshotPersister {
    pub fn new(backend: StorageBackend) -> SnapshotPersister {
        SnapshotPersister {
            backend,
            writer: Mutex::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Result<SnapshotPersister, StorageError> {
        Ok(SnapshotPersister::new(StorageBackend::from_config(config)?))
    }

    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }
}

impl Persister for SnapshotPersister {
    /// Drop the previous snapshot and open a fresh writer for this cycle.
    /// Refused while another cycle is still open: resetting mid-cycle
    /// would silently discard frames that cycle already acknowledged.
    fn reset(&self) -> Result<(), SpindleError> {
        let mut writer = self.writer.lock().unwrap();
        if writer.is_some() {
            return Err(SpindleError::Storage(
                "a snapshot cycle is already open; finalize it first".to_string(),
            ));
        }
        self.backend.reset()?;
        *writer = Some(SnapshotWriter::create(&self.backend)?);
        Ok(())
    }

    fn persist(&self, job: &Job) -> Result<(), SpindleError> {
        let mut writer = self.writer.lock().unwrap();
        match writer.as_mut() {
            Some(writer) => Ok(writer.append(job)?),
            None => Err(SpindleError::Storage(
                "persist called before reset opened a writer".to_string(),
            )),
        }
    }

    /// First call closes the stream and ships it; later calls are no-ops.
    fn finalize(&self) -> Result<(), SpindleError> {
        let taken = self.writer.lock().unwrap().take();
        let Some(writer) = taken else {
            return Ok(());
        };
        let meta = writer.finalize()?;
        self.backend.close()?;
        info!(jobs = meta.job_count, "snapshot finalized at {}", self.backend);
        Ok(())
    }

    /// Stream back the frames of the latest snapshot. The channel closes
    /// once every frame has been delivered.
    fn recover(&self) -> Result<Receiver<Bytes>, SpindleError> {
        self.backend.prepare_read()?;
        let reader = SnapshotReader::open(&self.backend)?;
        if let Some(meta) = reader.meta() {
            info!(
                jobs = meta.job_count,
                created_at = %meta.created_at,
                "recovering snapshot from {}",
                self.backend
            );
        }

        let (tx, rx) = sync_channel(RECOVER_CHANNEL_DEPTH);
        thread::spawn(move || {
            for frame in reader.frames() {
                if tx.send(Bytes::copy_from_slice(frame)).is_err() {
                    // Consumer hung up; nothing left to deliver to.
                    break;
                }
            }
        });
        Ok(rx)
    }
}
