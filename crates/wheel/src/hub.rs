//! The wheel itself: routes jobs into time-bounded spokes and drains them
//! in window order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use spindle_core::codec::decode_job;
use spindle_core::{Job, Persister, SpindleError, TemporalState, TimeBound};

use crate::error::WheelError;
use crate::filter::ExistenceFilter;
use crate::monitor::{MemoryMonitor, NoopMonitor};
use crate::pqueue::PriorityQueue;
use crate::spoke::Spoke;

/// Back-off between readiness polls in [`Hub::next_wait`].
pub const NEXT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Counters reported by [`Hub::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub outstanding_jobs: u64,
    pub added_total: u64,
    pub removed_total: u64,
    pub spoke_count: usize,
    pub past_pending: usize,
    pub memory_used_bytes: u64,
    pub memory_breached: bool,
}

/// Outcome of a [`Hub::restore`] pass. Failures are counted, never fatal.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct RestoreStats {
    pub restored: u64,
    pub decode_failures: u64,
    pub add_failures: u64,
}

/// Hierarchical delay queue over bucketed time windows.
///
/// The hub owns a permanent past spoke for overdue work, at most one
/// "current" spoke being drained, and a min-heap of future spokes keyed by
/// window start. Adds route to a bucket by trigger time; [`Hub::next`]
/// drains overdue work first, then the current window, promoting the next
/// window only once the playing one is spent.
///
/// The hub lock serializes routing, promotion and consumption. Each spoke
/// carries its own lock for job-level mutation, so adds landing in two
/// different existing windows only contend on the hub for the routing
/// decision. `next` holds the hub lock for its full duration, which
/// serializes consumers; that single critical section is the throughput
/// ceiling under many concurrent callers.
pub struct Hub {
    span: chrono::Duration,
    monitor: Arc<dyn MemoryMonitor>,
    // Auto-id state sits outside the hub lock.
    id_prefix: String,
    id_seq: AtomicU64,
    inner: Mutex<HubInner>,
}

struct HubInner {
    past: Arc<Spoke>,
    current: Option<Arc<Spoke>>,
    future: PriorityQueue<Arc<Spoke>>,
    // Every registered window, the promoted current one included; a spoke
    // leaves the map only at retirement or pruning.
    spoke_map: HashMap<TimeBound, Arc<Spoke>>,
    filter: ExistenceFilter,
    added_total: u64,
    removed_total: u64,
}

impl Hub {
    /// Window geometry is fixed for the hub's lifetime. `span` is floored
    /// to whole milliseconds, so anything under one millisecond is refused
    /// here instead of failing on the first add.
    pub fn new(span: chrono::Duration, monitor: Arc<dyn MemoryMonitor>) -> Hub {
        assert!(
            span >= chrono::Duration::milliseconds(1),
            "spoke span must be at least one millisecond"
        );
        Hub {
            span,
            monitor,
            id_prefix: format!("j{:08x}", Uuid::new_v4().as_fields().0),
            id_seq: AtomicU64::new(0),
            inner: Mutex::new(HubInner {
                past: Arc::new(Spoke::past()),
                current: None,
                future: PriorityQueue::new(),
                spoke_map: HashMap::new(),
                filter: ExistenceFilter::new(),
                added_total: 0,
                removed_total: 0,
            }),
        }
    }

    /// A hub with memory accounting disabled.
    pub fn unmonitored(span: chrono::Duration) -> Hub {
        Hub::new(span, Arc::new(NoopMonitor))
    }

    /// Mint an id for a caller who did not supply one: a random
    /// per-process prefix plus a monotonic counter. The prefix keeps
    /// fresh ids from colliding with ids restored out of a snapshot.
    pub fn next_id(&self) -> String {
        format!("{}-{}", self.id_prefix, self.id_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Route a job to the bucket owning its trigger time.
    ///
    /// Fails on a duplicate id among currently outstanding jobs, and on a
    /// trigger so close to the end of the representable timeline that no
    /// window can hold it. Inside those limits a well-formed job is never
    /// rejected; a bound mismatch on the routed spoke is a wheel bug and
    /// aborts loudly.
    pub fn add_job(&self, job: Job) -> Result<(), WheelError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();

        // Two-phase duplicate check: the filter clears most fresh ids in
        // O(1); only a filter hit pays for the full ownership scan.
        if inner.filter.may_contain(job.id()) && find_owner(&inner, job.id()).is_some() {
            return Err(WheelError::DuplicateJob {
                id: job.id().to_string(),
            });
        }

        let spoke = match job.temporal_state(now) {
            // Elapsed triggers must stay retrievable, so they land in the
            // all-encompassing past bucket rather than a dead window.
            TemporalState::Past | TemporalState::Current => Arc::clone(&inner.past),
            TemporalState::Future => {
                match future_spoke_for(&mut inner, job.trigger_at(), self.span) {
                    Some(spoke) => spoke,
                    None => {
                        return Err(WheelError::TriggerOutOfRange {
                            id: job.id().to_string(),
                            trigger_at: job.trigger_at(),
                        })
                    }
                }
            }
        };

        self.monitor.increment(&job);
        let id = job.id().to_string();
        if let Err(e) = spoke.add_job(job) {
            // Routing chose this spoke because the trigger is inside its
            // window; a rejection here means the wheel's geometry is broken.
            panic!("routed spoke rejected job {id}: {e}");
        }
        inner.filter.add(&id);
        inner.added_total += 1;
        Ok(())
    }

    /// Pop the next ready job, or `None` when nothing is due yet.
    pub fn next(&self) -> Option<Job> {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();

        // Overdue work always wins.
        if let Some(job) = inner.past.next(now) {
            self.finish_pop(&mut inner, &job);
            return Some(job);
        }

        // Retire the playing spoke once its window has elapsed and it has
        // nothing left to yield.
        let spent = match &inner.current {
            Some(current) => {
                current.pending_count() == 0
                    && current.temporal_state(now) == TemporalState::Past
            }
            None => false,
        };
        if spent {
            if let Some(current) = inner.current.take() {
                inner.spoke_map.remove(&current.bound());
            }
        }

        // Promote the earliest registered window, unless it has not
        // started yet. Re-heapify first to shake out any ordering drift.
        if inner.current.is_none() {
            inner.future.reheapify();
            let ready = match inner.future.peek() {
                Some(spoke) => spoke.temporal_state(now) != TemporalState::Future,
                None => false,
            };
            if !ready {
                return None;
            }
            inner.current = inner.future.pop();
        }

        let job = inner.current.as_ref().and_then(|current| current.next(now));
        if let Some(job) = &job {
            self.finish_pop(&mut inner, job);
        }
        job
    }

    /// Block until a job is ready or `timeout` elapses.
    ///
    /// A bounded poll loop backing off [`NEXT_POLL_INTERVAL`] between
    /// attempts, not a registered wake-up. A zero timeout is a single
    /// non-blocking poll.
    pub fn next_wait(&self, timeout: Duration) -> Result<Job, WheelError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(job) = self.next() {
                return Ok(job);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WheelError::Timeout {
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            thread::sleep((deadline - now).min(NEXT_POLL_INTERVAL));
        }
    }

    /// Remove a job by id. Idempotent: cancelling an id that was already
    /// consumed, already cancelled or never added is success.
    pub fn cancel(&self, id: &str) -> Result<(), WheelError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.filter.may_contain(id) {
            return Ok(());
        }
        let Some(owner) = find_owner(&inner, id) else {
            // Filter false positive.
            return Ok(());
        };
        match owner.cancel(id) {
            Ok(job) => {
                self.finish_pop(&mut inner, &job);
                Ok(())
            }
            // The owner was located under this same lock, but a miss is
            // still just a cancel of something already gone.
            Err(_) => Ok(()),
        }
    }

    /// Clone up to `limit` outstanding jobs without consuming anything:
    /// the past bucket first, then each registered window in unspecified
    /// order. A best-effort view, not a consistent snapshot.
    pub fn inspect(&self, limit: usize) -> Vec<Job> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::with_capacity(limit.min(64));
        inner.past.snapshot_jobs(limit, &mut out);
        for spoke in inner.spoke_map.values() {
            if out.len() >= limit {
                break;
            }
            spoke.snapshot_jobs(limit, &mut out);
        }
        out
    }

    /// Write every outstanding job to `persister`, one worker per spoke,
    /// then finalize. Returns immediately; per-job failures stream on the
    /// receiver, which closes when the whole cycle is done.
    pub fn persist(&self, persister: Arc<dyn Persister>) -> Receiver<WheelError> {
        let (err_tx, err_rx) = mpsc::channel();

        // Spoke handles are captured under the lock; the writing happens
        // outside it, bucket by bucket. The current spoke is still
        // registered in spoke_map, so map values plus the past spoke
        // cover every outstanding job exactly once.
        let spokes: Vec<Arc<Spoke>> = {
            let inner = self.inner.lock().unwrap();
            let mut spokes: Vec<Arc<Spoke>> = inner.spoke_map.values().cloned().collect();
            spokes.push(Arc::clone(&inner.past));
            spokes
        };

        thread::spawn(move || {
            let started = Instant::now();
            if let Err(e) = persister.reset() {
                tracing::error!("snapshot reset failed: {e}");
                let _ = err_tx.send(WheelError::Persistence(e));
                return;
            }

            let mut workers = Vec::with_capacity(spokes.len());
            for spoke in spokes {
                let persister = Arc::clone(&persister);
                let err_tx = err_tx.clone();
                workers.push(thread::spawn(move || {
                    spoke.persist_all(persister.as_ref(), &err_tx)
                }));
            }

            let mut written = 0usize;
            for worker in workers {
                match worker.join() {
                    Ok(count) => written += count,
                    Err(_) => {
                        let _ = err_tx.send(WheelError::Persistence(SpindleError::Other(
                            "snapshot worker panicked".into(),
                        )));
                    }
                }
            }

            match persister.finalize() {
                Ok(()) => {
                    tracing::info!(
                        jobs = written,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "snapshot complete"
                    );
                }
                Err(e) => {
                    tracing::error!("snapshot finalize failed: {e}");
                    let _ = err_tx.send(WheelError::Persistence(e));
                }
            }
        });

        err_rx
    }

    /// Re-add every job recovered from `persister`. Frames that fail to
    /// decode and jobs the hub refuses are counted and skipped, never
    /// fatal.
    pub fn restore(&self, persister: &dyn Persister) -> Result<RestoreStats, WheelError> {
        let frames = persister.recover()?;
        let mut stats = RestoreStats::default();
        for frame in frames.iter() {
            let job = match decode_job(&frame) {
                Ok(job) => job,
                Err(e) => {
                    stats.decode_failures += 1;
                    tracing::warn!("skipping undecodable snapshot frame: {e}");
                    continue;
                }
            };
            let id = job.id().to_string();
            match self.add_job(job) {
                Ok(()) => stats.restored += 1,
                Err(e) => {
                    stats.add_failures += 1;
                    tracing::warn!(job_id = %id, "restore re-add failed: {e}");
                }
            }
        }
        tracing::info!(
            restored = stats.restored,
            decode_failures = stats.decode_failures,
            add_failures = stats.add_failures,
            "restore complete"
        );
        Ok(stats)
    }

    /// Drop registered windows that have fully elapsed and hold no jobs.
    ///
    /// `next` already retires the current spoke lazily; this sweep is for
    /// windows that emptied out via cancel and never got promoted. Returns
    /// how many were dropped.
    pub fn prune(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.lock().unwrap();
        let current_bound = inner.current.as_ref().map(|c| c.bound());

        let dead: Vec<TimeBound> = inner
            .spoke_map
            .iter()
            .filter(|(bound, spoke)| {
                Some(**bound) != current_bound
                    && bound.temporal_state(now) == TemporalState::Past
                    && spoke.pending_count() == 0
            })
            .map(|(bound, _)| *bound)
            .collect();

        for bound in &dead {
            inner.spoke_map.remove(bound);
        }
        let HubInner {
            future, spoke_map, ..
        } = &mut *inner;
        future.retain(|spoke| spoke_map.contains_key(&spoke.bound()));

        if !dead.is_empty() {
            tracing::debug!(pruned = dead.len(), "dropped spent spokes");
        }
        dead.len()
    }

    /// Jobs currently owned by the wheel.
    pub fn pending_count(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.added_total - inner.removed_total
    }

    pub fn stats(&self) -> HubStats {
        let inner = self.inner.lock().unwrap();
        HubStats {
            outstanding_jobs: inner.added_total - inner.removed_total,
            added_total: inner.added_total,
            removed_total: inner.removed_total,
            spoke_count: inner.spoke_map.len(),
            past_pending: inner.past.pending_count(),
            memory_used_bytes: self.monitor.used_bytes(),
            memory_breached: self.monitor.breached(),
        }
    }

    // Bookkeeping shared by every path that takes a job out of the wheel.
    fn finish_pop(&self, inner: &mut HubInner, job: &Job) {
        inner.filter.remove(job.id());
        inner.removed_total += 1;
        self.monitor.decrement(job);
    }
}

/// Confirmatory ownership scan: the past bucket, the playing spoke, then
/// every registered window. O(spokes), only reached on a filter hit.
fn find_owner(inner: &HubInner, id: &str) -> Option<Arc<Spoke>> {
    if inner.past.owns_job(id) {
        return Some(Arc::clone(&inner.past));
    }
    if let Some(current) = &inner.current {
        if current.owns_job(id) {
            return Some(Arc::clone(current));
        }
    }
    inner.spoke_map.values().find(|s| s.owns_job(id)).map(Arc::clone)
}

/// The spoke owning a future trigger, creating and registering its window
/// on first use. `None` when no whole window can contain the trigger, in
/// which case nothing has been registered.
fn future_spoke_for(
    inner: &mut HubInner,
    trigger_at: DateTime<Utc>,
    span: chrono::Duration,
) -> Option<Arc<Spoke>> {
    // Fast path: most near-term traffic lands in the window already
    // playing.
    if let Some(current) = &inner.current {
        if current.bound().contains(trigger_at) {
            return Some(Arc::clone(current));
        }
    }
    let bound = TimeBound::containing(trigger_at, span)?;
    if let Some(spoke) = inner.spoke_map.get(&bound) {
        return Some(Arc::clone(spoke));
    }
    let spoke = Arc::new(Spoke::new(bound));
    inner.spoke_map.insert(bound, Arc::clone(&spoke));
    inner.future.push(Arc::clone(&spoke));
    Some(spoke)
}
