pub mod codec;
pub mod config;
pub mod error;
pub mod job;
pub mod persist;
pub mod temporal;

pub use config::Config;
pub use error::SpindleError;
pub use job::{Job, Sizeable, DEFAULT_TIME_TO_RUN, JOB_OVERHEAD_BYTES};
pub use persist::{persist_stream, Persister};
pub use temporal::{TemporalState, TimeBound};
