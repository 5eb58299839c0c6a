//! Snapshot contract between the scheduler and durable storage.
//!
//! One snapshot cycle is: `reset` once, `persist` for every outstanding job
//! (possibly from several threads at once), `finalize` once. `recover`
//! replays the last finalized snapshot as raw encoded buffers, one job per
//! buffer, leaving decoding to the consumer so a corrupt record can be
//! skipped instead of killing the whole recovery.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::SpindleError;
use crate::job::Job;

pub trait Persister: Send + Sync {
    /// Drop any previous snapshot so the next cycle starts clean.
    fn reset(&self) -> Result<(), SpindleError>;

    /// Append one job to the snapshot being written. Safe to call from
    /// multiple threads of the same cycle.
    fn persist(&self, job: &Job) -> Result<(), SpindleError>;

    /// Flush and seal the snapshot. Idempotent; a second call is a no-op.
    fn finalize(&self) -> Result<(), SpindleError>;

    /// Stream back every encoded job from the last finalized snapshot.
    /// The channel closes when the snapshot is exhausted.
    fn recover(&self) -> Result<Receiver<Bytes>, SpindleError>;
}

/// Drain a channel of jobs into `persister` on a worker thread.
///
/// Failures stream back per job; the drain keeps going so one bad write
/// does not abort the rest of the cycle. The error channel closes when the
/// job channel does.
pub fn persist_stream(
    persister: Arc<dyn Persister>,
    jobs: Receiver<Job>,
) -> Receiver<SpindleError> {
    let (err_tx, err_rx) = mpsc::channel();
    std::thread::spawn(move || {
        for job in jobs {
            if let Err(e) = persister.persist(&job) {
                tracing::warn!(job_id = %job.id(), "persist failed: {e}");
                // Error receiver may already be gone; keep draining either
                // way so the producer side never blocks.
                let _ = err_tx.send(e);
            }
        }
    });
    err_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;

    /// In-memory persister that can be told to fail on specific ids.
    struct MemPersister {
        stored: Mutex<Vec<String>>,
        fail_on: &'static str,
    }

    impl Persister for MemPersister {
        fn reset(&self) -> Result<(), SpindleError> {
            self.stored.lock().unwrap().clear();
            Ok(())
        }

        fn persist(&self, job: &Job) -> Result<(), SpindleError> {
            if job.id() == self.fail_on {
                return Err(SpindleError::Storage(format!("refused {}", job.id())));
            }
            self.stored.lock().unwrap().push(job.id().to_string());
            Ok(())
        }

        fn finalize(&self) -> Result<(), SpindleError> {
            Ok(())
        }

        fn recover(&self) -> Result<Receiver<Bytes>, SpindleError> {
            let (_, rx) = mpsc::channel();
            Ok(rx)
        }
    }

    #[test]
    fn stream_persists_everything_and_reports_failures_per_job() {
        let persister = Arc::new(MemPersister {
            stored: Mutex::new(Vec::new()),
            fail_on: "bad",
        });

        let (job_tx, job_rx) = mpsc::channel();
        let errors = persist_stream(persister.clone(), job_rx);

        for id in ["a", "bad", "b"] {
            job_tx.send(Job::new(id, Utc::now(), Bytes::new())).unwrap();
        }
        drop(job_tx);

        let errs: Vec<_> = errors.iter().collect();
        assert_eq!(errs.len(), 1, "only the poisoned job should error");

        let stored = persister.stored.lock().unwrap();
        assert_eq!(&*stored, &["a", "b"], "failure must not stop the drain");
    }
}
