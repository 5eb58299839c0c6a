use std::fmt;
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::TryStreamExt;
use memmap2::Mmap;
use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use spindle_core::config::AwsConfig;
use spindle_core::Config;

use crate::error::StorageError;
use crate::writer::{META_FILE, SNAPSHOT_FILE};

/// Unified snapshot backend.
///
/// Writing and reading always happen against a local directory; the S3
/// variant mirrors that directory to object keys on close and hydrates it
/// back before a read.
pub enum StorageBackend {
    Local(LocalBackend),
    S3(S3Backend),
}

impl StorageBackend {
    /// Select a backend from config: S3 when region and bucket are set,
    /// plain local filesystem otherwise.
    pub fn from_config(config: &Config) -> Result<StorageBackend, StorageError> {
        let snapshot_dir = config.storage.data_dir.join("snapshots");
        if config.aws.is_configured() {
            Ok(StorageBackend::S3(S3Backend::new(&config.aws, snapshot_dir)?))
        } else {
            Ok(StorageBackend::Local(LocalBackend::new(snapshot_dir)?))
        }
    }

    /// Directory the snapshot files live in locally. For S3 this is the
    /// staging area, not the durable home.
    pub fn snapshot_dir(&self) -> &Path {
        match self {
            StorageBackend::Local(b) => &b.snapshot_dir,
            StorageBackend::S3(b) => &b.stage_dir,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, StorageBackend::S3(_))
    }

    /// Clear the previous snapshot so a fresh cycle can write.
    pub fn reset(&self) -> Result<(), StorageError> {
        let dir = self.snapshot_dir();
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        std::fs::create_dir_all(dir)?;

        if let StorageBackend::S3(s3) = self {
            s3.runtime.block_on(s3.delete_remote())?;
        }
        Ok(())
    }

    /// Open the staged snapshot stream for writing, truncating any
    /// previous one. Writing is always local; [`Self::close`] ships the
    /// result for remote backends.
    pub fn writer(&self) -> Result<Box<dyn Write + Send>, StorageError> {
        let dir = self.snapshot_dir();
        std::fs::create_dir_all(dir)?;
        let file = std::fs::File::create(dir.join(SNAPSHOT_FILE))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    /// Open the staged snapshot stream for reading, memory-mapped. Call
    /// [`Self::prepare_read`] first so a remote snapshot has been pulled
    /// into the stage.
    pub fn reader(&self) -> Result<Box<dyn Read + Send>, StorageError> {
        let path = self.snapshot_dir().join(SNAPSHOT_FILE);
        if !path.exists() {
            return Err(StorageError::NoSnapshot(path.display().to_string()));
        }
        let file = std::fs::File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Box::new(Cursor::new(mmap)))
    }

    /// Ship a finished snapshot to its durable home. Local snapshots are
    /// already in place; S3 uploads the staged files.
    pub fn close(&self) -> Result<(), StorageError> {
        match self {
            StorageBackend::Local(_) => Ok(()),
            StorageBackend::S3(s3) => {
                let uploaded = s3.runtime.block_on(s3.upload_staged())?;
                info!(files = uploaded, "snapshot uploaded to {self}");
                Ok(())
            }
        }
    }

    /// Make the latest snapshot readable from [`Self::snapshot_dir`],
    /// downloading it first when it lives in S3.
    pub fn prepare_read(&self) -> Result<(), StorageError> {
        match self {
            StorageBackend::Local(_) => Ok(()),
            StorageBackend::S3(s3) => s3.runtime.block_on(s3.download_latest()),
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Local(b) => write!(f, "local:{}", b.snapshot_dir.display()),
            StorageBackend::S3(b) => write!(f, "s3://{}/{}", b.bucket, b.prefix),
        }
    }
}

/// Local filesystem backend.
pub struct LocalBackend {
    pub snapshot_dir: PathBuf,
}

impl LocalBackend {
    pub fn new(snapshot_dir: PathBuf) -> Result<LocalBackend, StorageError> {
        std::fs::create_dir_all(&snapshot_dir)?;
        info!("snapshot storage: local backend at {}", snapshot_dir.display());
        Ok(LocalBackend { snapshot_dir })
    }
}

/// S3 backend: stages snapshot files locally and mirrors them to a fixed
/// pair of object keys under the configured prefix.
pub struct S3Backend {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
    stage_dir: PathBuf,
    // object_store is async end to end; the persister runs on plain
    // threads, so the backend carries its own single-thread runtime.
    runtime: Runtime,
}

impl S3Backend {
    pub fn new(aws: &AwsConfig, stage_dir: PathBuf) -> Result<S3Backend, StorageError> {
        let bucket = aws
            .bucket
            .as_deref()
            .ok_or_else(|| StorageError::NotConfigured("S3_BUCKET not set".into()))?;
        let region = aws
            .region
            .as_deref()
            .ok_or_else(|| StorageError::NotConfigured("AWS_REGION not set".into()))?;

        let mut builder = AmazonS3Builder::new().with_region(region);

        if let Some(ref key) = aws.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(ref secret) = aws.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }

        if let Some(ref endpoint) = aws.endpoint {
            if !endpoint.is_empty() {
                // Ensure endpoint has a scheme — object_store requires absolute URLs
                let endpoint_url =
                    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                        endpoint.clone()
                    } else {
                        format!("https://{}", endpoint)
                    };
                builder = builder
                    .with_bucket_name(bucket)
                    .with_endpoint(&endpoint_url)
                    .with_allow_http(endpoint_url.starts_with("http://"));
            }
        } else {
            // Standard AWS S3 — use with_url for proper endpoint resolution
            let url = format!("s3://{}", bucket);
            builder = builder.with_url(&url);
        }

        let store = builder.build()?;
        let prefix = aws.snapshot_prefix.trim_matches('/').to_string();

        std::fs::create_dir_all(&stage_dir)?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        info!(
            "snapshot storage: S3 backend s3://{}/{} (region: {})",
            bucket, prefix, region
        );

        Ok(S3Backend {
            store: Arc::new(store),
            bucket: bucket.to_string(),
            prefix,
            stage_dir,
            runtime,
        })
    }

    fn key(&self, filename: &str) -> String {
        if self.prefix.is_empty() {
            filename.to_string()
        } else {
            format!("{}/{}", self.prefix, filename)
        }
    }

    /// Upload the staged snapshot files, overwriting the previous pair.
    async fn upload_staged(&self) -> Result<usize, StorageError> {
        let mut uploaded = 0usize;
        for filename in [SNAPSHOT_FILE, META_FILE] {
            let local_path = self.stage_dir.join(filename);
            if !local_path.exists() {
                continue;
            }

            let data = tokio::fs::read(&local_path).await.map_err(StorageError::Io)?;
            let path = object_store::path::Path::from(self.key(filename).as_str());
            self.store.put(&path, bytes::Bytes::from(data).into()).await?;
            uploaded += 1;
        }
        Ok(uploaded)
    }

    /// Download the remote snapshot pair into the staging directory.
    async fn download_latest(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.stage_dir)
            .await
            .map_err(StorageError::Io)?;

        let snapshot_key = self.key(SNAPSHOT_FILE);
        let path = object_store::path::Path::from(snapshot_key.as_str());
        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(StorageError::NoSnapshot(format!(
                    "s3://{}/{}",
                    self.bucket, snapshot_key
                )));
            }
            Err(e) => return Err(e.into()),
        };
        let data = result.bytes().await?;
        tokio::fs::write(self.stage_dir.join(SNAPSHOT_FILE), &data)
            .await
            .map_err(StorageError::Io)?;

        // Meta sidecar is informational; a missing one is not an error.
        let meta_path = object_store::path::Path::from(self.key(META_FILE).as_str());
        if let Ok(result) = self.store.get(&meta_path).await {
            if let Ok(data) = result.bytes().await {
                let _ = tokio::fs::write(self.stage_dir.join(META_FILE), &data).await;
            }
        }
        Ok(())
    }

    /// Delete every object under the snapshot prefix.
    async fn delete_remote(&self) -> Result<(), StorageError> {
        // Never sweep an unprefixed bucket.
        if self.prefix.is_empty() {
            return Ok(());
        }

        let prefix_path = object_store::path::Path::from(self.prefix.as_str());
        let mut listing = self.store.list(Some(&prefix_path));
        while let Some(meta) = listing.try_next().await? {
            if let Err(e) = self.store.delete(&meta.location).await {
                warn!("failed to delete stale snapshot object {}: {e}", meta.location);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_dir() -> PathBuf {
        std::env::temp_dir().join(format!("spindle-backend-test-{}", Uuid::new_v4()))
    }

    #[test]
    fn local_backend_creates_its_directory() {
        let dir = test_dir();
        let backend = StorageBackend::Local(LocalBackend::new(dir.clone()).unwrap());
        assert!(dir.is_dir());
        assert!(!backend.is_remote());
        assert_eq!(backend.snapshot_dir(), dir.as_path());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reset_clears_previous_files() {
        let dir = test_dir();
        let backend = StorageBackend::Local(LocalBackend::new(dir.clone()).unwrap());
        std::fs::write(dir.join(SNAPSHOT_FILE), b"stale").unwrap();

        backend.reset().unwrap();
        assert!(dir.is_dir());
        assert!(!dir.join(SNAPSHOT_FILE).exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn writer_then_reader_round_trip_the_staged_stream() {
        let dir = test_dir();
        let backend = StorageBackend::Local(LocalBackend::new(dir.clone()).unwrap());

        let mut sink = backend.writer().unwrap();
        sink.write_all(b"framed bytes").unwrap();
        sink.flush().unwrap();
        drop(sink);

        backend.prepare_read().unwrap();
        let mut out = Vec::new();
        backend.reader().unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"framed bytes");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reader_without_a_snapshot_is_a_distinct_error() {
        let dir = test_dir();
        let backend = StorageBackend::Local(LocalBackend::new(dir.clone()).unwrap());
        match backend.reader() {
            Err(StorageError::NoSnapshot(_)) => {}
            Err(other) => panic!("expected NoSnapshot, got {other}"),
            Ok(_) => panic!("expected NoSnapshot, got a reader"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn display_names_the_durable_home() {
        let dir = test_dir();
        let backend = StorageBackend::Local(LocalBackend::new(dir.clone()).unwrap());
        let shown = backend.to_string();
        assert!(shown.starts_with("local:"), "got {shown}");
        std::fs::remove_dir_all(&dir).ok();
    }
}
