//! A time-bounded bucket of jobs.

use std::collections::HashSet;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use spindle_core::{Job, Persister, TemporalState, TimeBound};

use crate::error::WheelError;
use crate::pqueue::{Prioritized, PriorityQueue};

/// Jobs order by trigger time.
impl Prioritized for Job {
    fn priority(&self) -> DateTime<Utc> {
        self.trigger_at()
    }
}

/// Bucket handles order by window start, so the hub's heap always exposes
/// the next window to begin.
impl Prioritized for Arc<Spoke> {
    fn priority(&self) -> DateTime<Utc> {
        self.bound().start
    }
}

/// A bucket owning one half-open slice of the timeline.
///
/// Every outstanding job whose trigger falls inside `bound` lives here: a
/// min-heap by trigger time for draining plus a membership set for O(1)
/// ownership checks. The spoke carries its own lock so snapshot readers
/// (persist workers, inspection) proceed bucket-by-bucket without holding
/// the whole wheel still.
#[derive(Debug)]
pub struct Spoke {
    id: Uuid,
    bound: TimeBound,
    inner: Mutex<SpokeInner>,
}

#[derive(Debug)]
struct SpokeInner {
    jobs: PriorityQueue<Job>,
    members: HashSet<String>,
}

impl Spoke {
    pub fn new(bound: TimeBound) -> Spoke {
        Spoke {
            id: Uuid::new_v4(),
            bound,
            inner: Mutex::new(SpokeInner {
                jobs: PriorityQueue::new(),
                members: HashSet::new(),
            }),
        }
    }

    /// The permanent catch-all for overdue work: one window over the whole
    /// representable timeline, so a trigger that has already elapsed can
    /// never fail its containment check.
    pub fn past() -> Spoke {
        Spoke::new(TimeBound::new(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bound(&self) -> TimeBound {
        self.bound
    }

    /// Classify the window against `now`: `Future` before it starts,
    /// `Current` while it straddles, `Past` once it has elapsed.
    pub fn temporal_state(&self, now: DateTime<Utc>) -> TemporalState {
        self.bound.temporal_state(now)
    }

    /// Insert a job whose trigger falls inside this bucket's window.
    /// O(log n).
    pub fn add_job(&self, job: Job) -> Result<(), WheelError> {
        if !self.bound.contains(job.trigger_at()) {
            return Err(WheelError::OutOfBounds {
                id: job.id().to_string(),
                trigger_at: job.trigger_at(),
                bound: self.bound,
            });
        }
        let mut inner = self.inner.lock().unwrap();
        inner.members.insert(job.id().to_string());
        inner.jobs.push(job);
        Ok(())
    }

    /// Pop the earliest job if it is ready at `now`. A bucket whose window
    /// has begun can still hold triggers that haven't; those stay put, and
    /// the heap is untouched.
    pub fn next(&self, now: DateTime<Utc>) -> Option<Job> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.jobs.peek()?.temporal_state(now).is_ready() {
            return None;
        }
        let job = inner.jobs.pop()?;
        inner.members.remove(job.id());
        Some(job)
    }

    /// Remove a job by id: O(1) membership check, then the O(n) heap scan
    /// plus heap fix. Returns the removed job so the caller can release its
    /// accounted bytes.
    pub fn cancel(&self, id: &str) -> Result<Job, WheelError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.members.remove(id) {
            return Err(WheelError::NotFound { id: id.to_string() });
        }
        // Membership and heap change together under this lock; a listed id
        // missing from the heap means the bucket is corrupt.
        let index = match inner.jobs.position(|j| j.id() == id) {
            Some(index) => index,
            None => panic!("spoke {}: membership lists job {id} but the heap does not", self.id),
        };
        match inner.jobs.remove(index) {
            Some(job) => Ok(job),
            None => panic!("spoke {}: heap position {index} vanished during cancel", self.id),
        }
    }

    /// O(1) membership check.
    pub fn owns_job(&self, id: &str) -> bool {
        self.inner.lock().unwrap().members.contains(id)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }

    /// Hand every job to the persister without draining anything: a
    /// snapshot, not a consume. Failures stream per job so one bad write
    /// doesn't hide the rest. Returns how many were written.
    pub fn persist_all(&self, persister: &dyn Persister, errors: &Sender<WheelError>) -> usize {
        let inner = self.inner.lock().unwrap();
        let mut written = 0;
        for job in inner.jobs.iter() {
            match persister.persist(job) {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::warn!(job_id = %job.id(), spoke_id = %self.id, "persist failed: {e}");
                    let _ = errors.send(WheelError::Persistence(e));
                }
            }
        }
        written
    }

    /// Clone jobs into `out` until it holds `limit` entries. Arbitrary
    /// order within the bucket; payload clones are cheap.
    pub fn snapshot_jobs(&self, limit: usize, out: &mut Vec<Job>) {
        let inner = self.inner.lock().unwrap();
        for job in inner.jobs.iter() {
            if out.len() >= limit {
                break;
            }
            out.push(job.clone());
        }
    }
}
