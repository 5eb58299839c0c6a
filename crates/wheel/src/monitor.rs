//! Producer backpressure on accounted payload bytes.
//!
//! The hub grows and shrinks a byte counter as jobs come and go; protocol
//! adapters call `fence` before admitting new work. Which strategy runs is
//! decided once at construction; an unconfigured scheduler gets the no-op
//! monitor and pays nothing per call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use spindle_core::Sizeable;
use tracing::{error, info, warn};

pub trait MemoryMonitor: Send + Sync {
    /// Account bytes for an accepted item.
    fn increment(&self, item: &dyn Sizeable);

    /// Release bytes for a consumed or cancelled item. Every decrement must
    /// pair with an earlier increment of the same item.
    fn decrement(&self, item: &dyn Sizeable);

    /// Block the caller while the high watermark stands breached.
    fn fence(&self);

    /// Non-blocking point-in-time check of the breach flag.
    fn breached(&self) -> bool;

    /// Currently accounted bytes.
    fn used_bytes(&self) -> u64;
}

/// Disabled mode: every operation is free, nothing ever fences.
#[derive(Debug, Default)]
pub struct NoopMonitor;

impl MemoryMonitor for NoopMonitor {
    fn increment(&self, _item: &dyn Sizeable) {}

    fn decrement(&self, _item: &dyn Sizeable) {}

    fn fence(&self) {}

    fn breached(&self) -> bool {
        false
    }

    fn used_bytes(&self) -> u64 {
        0
    }
}

/// Watermark monitor with a hysteresis band.
///
/// The breach flag raises when usage reaches `high` and lowers only once
/// usage drops below `recovery`, so fenced producers wake together on one
/// crossing instead of thrashing at the boundary. The counter itself is a
/// lock-free atomic; it changes far more often than anyone fences.
#[derive(Debug)]
pub struct WatermarkMonitor {
    used: AtomicU64,
    high: u64,
    recovery: u64,
    breached: AtomicBool,
    gate: Mutex<()>,
    released: Condvar,
}

impl WatermarkMonitor {
    pub fn new(high: u64, recovery: u64) -> WatermarkMonitor {
        assert!(high > 0, "high watermark must be positive");
        assert!(
            recovery <= high,
            "recovery watermark must not exceed the high watermark"
        );
        WatermarkMonitor {
            used: AtomicU64::new(0),
            high,
            recovery,
            breached: AtomicBool::new(false),
            gate: Mutex::new(()),
            released: Condvar::new(),
        }
    }
}

impl MemoryMonitor for WatermarkMonitor {
    fn increment(&self, item: &dyn Sizeable) {
        let size = item.size_of();
        let used = self.used.fetch_add(size, Ordering::SeqCst) + size;
        if used >= self.high && !self.breached.swap(true, Ordering::SeqCst) {
            warn!(
                used_bytes = used,
                high_watermark = self.high,
                "memory watermark breached; fencing producers"
            );
        }
    }

    fn decrement(&self, item: &dyn Sizeable) {
        let size = item.size_of();

        // CAS loop so an unpaired decrement is caught as underflow instead
        // of wrapping the counter around.
        let mut current = self.used.load(Ordering::SeqCst);
        let used = loop {
            if size > current {
                error!(
                    used_bytes = current,
                    release_bytes = size,
                    "memory accounting underflow; counter reset to zero"
                );
                self.used.store(0, Ordering::SeqCst);
                break 0;
            }
            match self.used.compare_exchange(
                current,
                current - size,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break current - size,
                Err(seen) => current = seen,
            }
        };

        if used < self.recovery && self.breached.load(Ordering::SeqCst) {
            // Clear under the gate so a fencer checking the flag cannot
            // slip between our store and the notify.
            let _guard = self.gate.lock().unwrap();
            if self.breached.swap(false, Ordering::SeqCst) {
                info!(
                    used_bytes = used,
                    recovery_watermark = self.recovery,
                    "memory usage recovered; releasing fence"
                );
            }
            self.released.notify_all();
        }
    }

    fn fence(&self) {
        let mut guard = self.gate.lock().unwrap();
        while self.breached.load(Ordering::SeqCst) {
            guard = self.released.wait(guard).unwrap();
        }
    }

    fn breached(&self) -> bool {
        self.breached.load(Ordering::SeqCst)
    }

    fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }
}
