//! In-process worker pool.
//!
//! Job ids flow through a bounded channel into
//! `for_each_concurrent(workers)`. The store stays the source of truth: the
//! channel only speeds up pickup, and anything that misses it (full queue,
//! restart, submission from another process) is found again by
//! [`crate::service::JobService::recover_pending`].

use crate::error::JobError;
use crate::runner::JobRunner;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Handle for enqueueing job ids. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<String>,
    in_flight: InFlight,
}

impl JobQueue {
    /// Queue a job for execution.
    ///
    /// Returns `Ok(false)` when the id is already queued or running, or when
    /// the queue is full (the job stays `submitted` and is recovered later).
    pub fn enqueue(&self, job_id: &str) -> Result<bool, JobError> {
        {
            let mut in_flight = self
                .in_flight
                .lock()
                .map_err(|_| JobError::Internal("in-flight set poisoned".into()))?;
            if !in_flight.insert(job_id.to_string()) {
                return Ok(false);
            }
        }

        match self.tx.try_send(job_id.to_string()) {
            Ok(()) => {
                debug!(job_id, "Job enqueued");
                Ok(true)
            }
            Err(e) => {
                self.release(job_id);
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        warn!(job_id, "Job queue full; job will be picked up on recovery");
                        Ok(false)
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        Err(JobError::Internal("job queue is shut down".into()))
                    }
                }
            }
        }
    }

    /// Number of ids queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn release(&self, job_id: &str) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(job_id);
        }
    }
}

/// Start `workers` concurrent executors fed by a new queue.
///
/// The pool stops once every [`JobQueue`] clone is dropped and the queued
/// jobs have finished.
pub fn spawn_workers(
    runner: Arc<JobRunner>,
    workers: usize,
    capacity: usize,
) -> (JobQueue, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel::<String>(capacity.max(1));
    let queue = JobQueue {
        tx,
        in_flight: Arc::default(),
    };
    // The pool holds only the in-flight set, never a sender, so dropping
    // every queue handle ends the stream.
    let releaser = Arc::clone(&queue.in_flight);

    let handle = tokio::spawn(async move {
        info!(workers, "Worker pool started");
        ReceiverStream::new(rx)
            .for_each_concurrent(workers.max(1), |job_id| {
                let runner = Arc::clone(&runner);
                let in_flight = Arc::clone(&releaser);
                async move {
                    let task = tokio::spawn({
                        let runner = Arc::clone(&runner);
                        let job_id = job_id.clone();
                        async move { runner.run(&job_id).await }
                    });
                    match task.await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => error!(job_id = %job_id, error = %e, "Job run aborted"),
                        Err(join) => {
                            error!(job_id = %job_id, error = %join, "Worker task panicked");
                            runner
                                .fail_abandoned(&job_id, "Internal error: worker task panicked")
                                .await;
                        }
                    }
                    if let Ok(mut set) = in_flight.lock() {
                        set.remove(&job_id);
                    }
                }
            })
            .await;
        info!("Worker pool stopped");
    });

    (queue, handle)
}
