//! Durable snapshots for the scheduler.
//!
//! A snapshot is a single zstd-compressed stream of length-prefixed encoded
//! jobs plus a JSON meta sidecar. [`SnapshotPersister`] wires the writer and
//! reader to a [`StorageBackend`], which is either a local directory or an
//! S3 prefix mirrored through a local staging directory.

pub mod backend;
pub mod error;
pub mod persister;
pub mod reader;
pub mod writer;

pub use backend::{LocalBackend, S3Backend, StorageBackend};
pub use error::StorageError;
pub use persister::SnapshotPersister;
pub use reader::SnapshotReader;
pub use writer::{SnapshotMeta, SnapshotWriter, META_FILE, SNAPSHOT_FILE};
