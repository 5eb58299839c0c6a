use thiserror::Error;

use spindle_core::SpindleError;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("core error: {0}")]
    Core(#[from] SpindleError),

    #[error("no snapshot: {0}")]
    NoSnapshot(String),

    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("{0}")]
    Other(String),
}

/// The persister speaks the core error type at its trait boundary; local
/// detail that has no core counterpart flattens into a message.
impl From<StorageError> for SpindleError {
    fn from(err: StorageError) -> SpindleError {
        match err {
            StorageError::Io(io) => SpindleError::Io(io),
            StorageError::Core(core) => core,
            StorageError::NoSnapshot(what) => SpindleError::NoSnapshot(what),
            other => SpindleError::Storage(other.to_string()),
        }
    }
}
