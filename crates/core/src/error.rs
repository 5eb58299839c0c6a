use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpindleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported job encoding version {0}")]
    UnsupportedCodecVersion(u8),

    #[error("truncated job encoding while reading {0}")]
    TruncatedEncoding(&'static str),

    #[error("unexpected trailing bytes after job encoding: {0}")]
    TrailingBytes(usize),

    #[error("job id is not valid UTF-8: {0}")]
    InvalidJobId(#[from] std::string::FromUtf8Error),

    #[error("trigger time not representable as epoch nanoseconds: {0}")]
    TriggerOutOfRange(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("no snapshot found at {0}")]
    NoSnapshot(String),

    #[error("{0}")]
    Other(String),
}
