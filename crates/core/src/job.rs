//! The unit of delayed work.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::temporal::TemporalState;

/// Fixed bookkeeping overhead charged per job, on top of id and payload
/// bytes. Covers heap entries, membership bookkeeping, and struct fields.
pub const JOB_OVERHEAD_BYTES: u64 = 64;

/// Time-to-run carried for jobs submitted without one.
pub const DEFAULT_TIME_TO_RUN: Duration = Duration::from_secs(30);

/// Anything that can report its accounted byte footprint to the memory
/// monitor. Estimates must be deterministic: increment and decrement of the
/// same value have to cancel exactly.
pub trait Sizeable {
    fn size_of(&self) -> u64;
}

/// A job: opaque payload plus the instant it becomes due.
///
/// Identity and trigger time are fixed at construction; the scheduler
/// relies on both never changing while the job is outstanding. `priority`
/// and `time_to_run` ride along for wire compatibility but play no part in
/// scheduling order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    id: String,
    trigger_at: DateTime<Utc>,
    body: Bytes,
    priority: i32,
    time_to_run: Duration,
}

impl Job {
    pub fn new(id: impl Into<String>, trigger_at: DateTime<Utc>, body: Bytes) -> Job {
        Job {
            id: id.into(),
            trigger_at,
            body,
            priority: 0,
            time_to_run: DEFAULT_TIME_TO_RUN,
        }
    }

    /// Construct with explicit carried metadata (wire decode, tests).
    pub fn with_options(
        id: impl Into<String>,
        trigger_at: DateTime<Utc>,
        body: Bytes,
        priority: i32,
        time_to_run: Duration,
    ) -> Job {
        Job {
            id: id.into(),
            trigger_at,
            body,
            priority,
            time_to_run,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn trigger_at(&self) -> DateTime<Utc> {
        self.trigger_at
    }

    /// Payload bytes; cloning a job shares the payload, so snapshot and
    /// inspect paths copy cheaply.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn time_to_run(&self) -> Duration {
        self.time_to_run
    }

    /// Classify the trigger instant against `now`. Pure; `Current` (trigger
    /// exactly now) counts as ready everywhere readiness is decided.
    pub fn temporal_state(&self, now: DateTime<Utc>) -> TemporalState {
        TemporalState::of_instant(self.trigger_at, now)
    }
}

impl Sizeable for Job {
    fn size_of(&self) -> u64 {
        JOB_OVERHEAD_BYTES + self.id.len() as u64 + self.body.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn size_accounts_overhead_id_and_body() {
        let job = Job::new("j-1", Utc::now(), Bytes::from_static(b"hello"));
        assert_eq!(job.size_of(), JOB_OVERHEAD_BYTES + 3 + 5);

        // Deterministic: same value, same estimate.
        assert_eq!(job.size_of(), job.clone().size_of());
    }

    #[test]
    fn temporal_state_tracks_trigger() {
        let now = Utc::now();
        let due = Job::new("a", now - ChronoDuration::seconds(1), Bytes::new());
        let ahead = Job::new("b", now + ChronoDuration::seconds(1), Bytes::new());
        assert_eq!(due.temporal_state(now), TemporalState::Past);
        assert_eq!(ahead.temporal_state(now), TemporalState::Future);
        assert!(!ahead.temporal_state(now).is_ready());
    }

    #[test]
    fn defaults_are_carried_not_scheduling_inputs() {
        let job = Job::new("x", Utc::now(), Bytes::new());
        assert_eq!(job.priority(), 0);
        assert_eq!(job.time_to_run(), DEFAULT_TIME_TO_RUN);
    }
}
