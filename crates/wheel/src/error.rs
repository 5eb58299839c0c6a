use chrono::{DateTime, Utc};
use thiserror::Error;

use spindle_core::{SpindleError, TimeBound};

#[derive(Error, Debug)]
pub enum WheelError {
    #[error("job {id} already exists")]
    DuplicateJob { id: String },

    #[error("job {id} triggers at {trigger_at} outside spoke bound {bound}")]
    OutOfBounds {
        id: String,
        trigger_at: DateTime<Utc>,
        bound: TimeBound,
    },

    #[error("job {id} triggers at {trigger_at}, too far ahead to schedule")]
    TriggerOutOfRange {
        id: String,
        trigger_at: DateTime<Utc>,
    },

    #[error("job {id} not found")]
    NotFound { id: String },

    #[error("no job became ready within {waited_ms} ms")]
    Timeout { waited_ms: u64 },

    #[error("persistence: {0}")]
    Persistence(#[from] SpindleError),
}

impl WheelError {
    /// Client-facing errors get reported; everything else is operational.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            WheelError::DuplicateJob { .. }
                | WheelError::TriggerOutOfRange { .. }
                | WheelError::NotFound { .. }
                | WheelError::Timeout { .. }
        )
    }
}
