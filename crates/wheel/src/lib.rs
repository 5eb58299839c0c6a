//! Time-wheel delay queue: jobs bucketed into fixed-span windows, drained
//! in window order with overdue work always first.

pub mod error;
pub mod filter;
pub mod hub;
pub mod monitor;
pub mod pqueue;
pub mod spoke;

pub use error::WheelError;
pub use hub::{Hub, HubStats, RestoreStats, NEXT_POLL_INTERVAL};
pub use monitor::{MemoryMonitor, NoopMonitor, WatermarkMonitor};
pub use pqueue::{Prioritized, PriorityQueue};
pub use spoke::Spoke;
