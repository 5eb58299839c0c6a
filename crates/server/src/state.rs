use std::sync::Arc;

use chrono::{DateTime, Utc};

use spindle_core::Persister;
use spindle_wheel::{Hub, MemoryMonitor};

/// Shared handles behind every request.
///
/// The hub and monitor are the same instances the engine runs on; the
/// monitor handle exists here so the enqueue path can fence before it
/// touches the hub.
pub struct AppState {
    pub hub: Arc<Hub>,
    pub persister: Arc<dyn Persister>,
    pub monitor: Arc<dyn MemoryMonitor>,
    pub storage_name: String,
    pub started_at: DateTime<Utc>,
}
