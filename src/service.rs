//! The job service: submission, status queries, listing and background
//! maintenance.
//!
//! ```text
//!  submit ──▶ validate ──▶ store.create(submitted) ──▶ queue ──▶ runner
//!                                   ▲                    ▲
//!  get_status / list_jobs ──────────┘   recover_pending ─┘ (start-up, loop)
//! ```
//!
//! With `workers = 0` the service only records submissions; a separate
//! process sharing the same store (`docjobs serve`) executes them.

use crate::artifact::ArtifactStore;
use crate::callback::{notify_terminal, HttpNotifier, Notifier};
use crate::config::{ConversionKind, ServiceConfig};
use crate::engine::{ConversionEngine, Engines};
use crate::error::{JobError, WaitError};
use crate::job::{Job, JobList, JobStatus, JobUpdate, SubmitReceipt, SubmitRequest};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::queue::{spawn_workers, JobQueue};
use crate::runner::JobRunner;
use crate::store::JobStore;
use crate::wait::{wait_for_job, StatusSource, WaitOptions};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Largest page accepted by [`JobService::list_jobs`].
pub const MAX_LIST_LIMIT: usize = 1000;

/// Builder for [`JobService`].
pub struct JobServiceBuilder {
    config: ServiceConfig,
    store: Option<Arc<dyn JobStore>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    engines: Engines,
    notifier: Option<Arc<dyn Notifier>>,
    progress: Option<ProgressCallback>,
}

impl JobServiceBuilder {
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Register the engine for one conversion kind.
    pub fn engine(mut self, kind: ConversionKind, engine: Arc<dyn ConversionEngine>) -> Self {
        self.engines.register(kind, engine);
        self
    }

    /// Replace the callback transport. Default: [`HttpNotifier`].
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    /// Start the service: spawn workers, recover pending jobs and start the
    /// maintenance loop if configured. Must be called inside a tokio runtime.
    pub async fn start(self) -> Result<JobService, JobError> {
        let store = self
            .store
            .ok_or_else(|| JobError::InvalidConfig("a job store is required".into()))?;
        let artifacts = self
            .artifacts
            .ok_or_else(|| JobError::InvalidConfig("an artifact store is required".into()))?;
        if self.engines.is_empty() {
            return Err(JobError::InvalidConfig(
                "at least one conversion engine is required".into(),
            ));
        }
        let notifier: Arc<dyn Notifier> = match self.notifier {
            Some(n) => n,
            None => Arc::new(HttpNotifier::new(Duration::from_secs(
                self.config.callback_timeout_secs,
            ))?),
        };
        let progress = self
            .progress
            .unwrap_or_else(|| Arc::new(NoopProgressCallback));

        let runner = Arc::new(JobRunner::new(
            Arc::clone(&store),
            Arc::clone(&artifacts),
            self.engines.clone(),
            Arc::clone(&notifier),
            progress,
        ));

        let (queue, workers) = if self.config.workers > 0 {
            let (queue, handle) = spawn_workers(
                Arc::clone(&runner),
                self.config.workers,
                self.config.queue_capacity,
            );
            (Some(queue), Some(handle))
        } else {
            info!("No in-process workers; running in submit-only mode");
            (None, None)
        };

        let maintenance = Maintenance {
            store: Arc::clone(&store),
            queue: queue.clone(),
            notifier,
            stale_after: self.config.stale_after,
        };

        if queue.is_some() && self.config.recover_on_start {
            let recovered = maintenance.recover_pending().await?;
            if recovered > 0 {
                info!(recovered, "Re-queued pending jobs");
            }
        }

        let maintenance_task = self.config.maintenance_interval.map(|every| {
            let m = maintenance.clone();
            tokio::spawn(async move { m.run_every(every).await })
        });

        info!(
            workers = self.config.workers,
            engines = ?self.engines,
            "Job service started"
        );

        Ok(JobService {
            config: self.config,
            store,
            engines: self.engines,
            runner,
            queue,
            workers,
            maintenance,
            maintenance_task,
        })
    }
}

/// Asynchronous conversion job service.
///
/// # Example
/// ```rust,no_run
/// use docjobs::{
///     ConversionKind, FsArtifactStore, JobService, MemoryJobStore, PdfRasterEngine,
///     ServiceConfig, SubmitRequest, WaitOptions,
/// };
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let service = JobService::builder()
///     .config(ServiceConfig::builder().default_namespace("documents").build()?)
///     .store(Arc::new(MemoryJobStore::new()))
///     .artifacts(Arc::new(FsArtifactStore::new("./data/artifacts")))
///     .engine(ConversionKind::PdfToPng, Arc::new(PdfRasterEngine::new()))
///     .start()
///     .await?;
///
/// let receipt = service.submit(SubmitRequest::new("reports/q3.pdf")).await?;
/// let job = service.wait(&receipt.job_id, WaitOptions::default()).await?;
/// println!("{} pages", job.artifacts.len());
/// service.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct JobService {
    config: ServiceConfig,
    store: Arc<dyn JobStore>,
    engines: Engines,
    runner: Arc<JobRunner>,
    queue: Option<JobQueue>,
    workers: Option<JoinHandle<()>>,
    maintenance: Maintenance,
    maintenance_task: Option<JoinHandle<()>>,
}

impl JobService {
    pub fn builder() -> JobServiceBuilder {
        JobServiceBuilder {
            config: ServiceConfig::default(),
            store: None,
            artifacts: None,
            engines: Engines::new(),
            notifier: None,
            progress: None,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Validate and persist a new job, then hand it to the workers.
    ///
    /// Returns as soon as the `submitted` record is written. Validation
    /// errors are returned here and nothing is persisted.
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitReceipt, JobError> {
        let resolved = request.resolve(&self.config)?;
        if !self.engines.supports(resolved.kind) {
            return Err(JobError::validation(
                "kind",
                format!("'{}' is not supported by this service", resolved.kind),
            ));
        }

        let job = Job::new(resolved, self.config.retention, Utc::now());
        let receipt = SubmitReceipt {
            job_id: job.job_id.clone(),
            status: job.status,
        };
        info!(
            job_id = %receipt.job_id,
            kind = %job.request.kind,
            source = %job.request.source_key,
            "Job submitted"
        );
        self.store.create(job).await?;

        if let Some(queue) = &self.queue {
            if let Err(e) = queue.enqueue(&receipt.job_id) {
                // The record is durable; recovery picks it up later.
                warn!(job_id = %receipt.job_id, error = %e, "Could not enqueue job");
            }
        }
        Ok(receipt)
    }

    /// Current record of a job. Missing and expired jobs are
    /// [`JobError::JobNotFound`].
    pub async fn get_status(&self, job_id: &str) -> Result<Job, JobError> {
        self.store.get(job_id).await
    }

    /// Most recent jobs first, optionally filtered by status. `limit` is
    /// clamped to `1..=1000`.
    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<JobList, JobError> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let jobs: Vec<_> = self
            .store
            .list(status, limit)
            .await?
            .iter()
            .map(Job::summary)
            .collect();
        Ok(JobList {
            count: jobs.len(),
            jobs,
        })
    }

    /// Poll this service until the job finishes. See [`wait_for_job`].
    pub async fn wait(&self, job_id: &str, options: WaitOptions) -> Result<Job, WaitError> {
        wait_for_job(self, job_id, options).await
    }

    /// Queue every `submitted` job in the store. Returns how many were newly
    /// queued. A no-op in submit-only mode.
    pub async fn recover_pending(&self) -> Result<usize, JobError> {
        self.maintenance.recover_pending().await
    }

    /// Fail `processing` jobs without an update for `stale_after`. Returns
    /// how many were failed. A no-op unless `stale_after` is configured.
    pub async fn reap_stale(&self) -> Result<usize, JobError> {
        self.maintenance.reap_stale().await
    }

    /// Delete expired records from the store.
    pub async fn purge_expired(&self) -> Result<usize, JobError> {
        self.maintenance.store.purge_expired().await
    }

    /// Stop the maintenance loop, then let queued and running jobs finish
    /// and their callbacks go out.
    pub async fn shutdown(mut self) {
        if let Some(task) = self.maintenance_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.maintenance.queue = None;
        self.queue = None;
        if let Some(workers) = self.workers.take() {
            if let Err(e) = workers.await {
                warn!(error = %e, "Worker pool ended abnormally");
            }
        }
        self.runner.flush_callbacks().await;
        info!("Job service stopped");
    }
}

#[async_trait]
impl StatusSource for JobService {
    async fn job_status(&self, job_id: &str) -> Result<Job, JobError> {
        self.get_status(job_id).await
    }
}

// ── Maintenance ──────────────────────────────────────────────────────────

#[derive(Clone)]
struct Maintenance {
    store: Arc<dyn JobStore>,
    queue: Option<JobQueue>,
    notifier: Arc<dyn Notifier>,
    stale_after: Option<Duration>,
}

impl Maintenance {
    async fn recover_pending(&self) -> Result<usize, JobError> {
        let Some(queue) = &self.queue else {
            return Ok(0);
        };
        let pending = self.store.list(Some(JobStatus::Submitted), usize::MAX).await?;
        let mut queued = 0;
        // Oldest first so earlier submissions run first.
        for job in pending.iter().rev() {
            if queue.enqueue(&job.job_id)? {
                queued += 1;
            }
        }
        Ok(queued)
    }

    async fn reap_stale(&self) -> Result<usize, JobError> {
        let Some(stale_after) = self.stale_after else {
            return Ok(0);
        };
        let threshold = chrono::Duration::from_std(stale_after)
            .map_err(|e| JobError::InvalidConfig(format!("stale_after: {e}")))?;
        let cutoff = Utc::now() - threshold;

        let mut reaped = 0;
        for job in self
            .store
            .list(Some(JobStatus::Processing), usize::MAX)
            .await?
        {
            if job.updated_at >= cutoff {
                continue;
            }
            let message = format!(
                "Job abandoned: no progress for {}s (worker stopped or crashed)",
                stale_after.as_secs()
            );
            match self.store.update(&job.job_id, JobUpdate::failed(message)).await {
                Ok(failed) => {
                    warn!(job_id = %job.job_id, progress = job.progress, "Reaped stale job");
                    notify_terminal(self.notifier.as_ref(), &failed).await;
                    reaped += 1;
                }
                Err(e) if e.is_stale() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(reaped)
    }

    async fn run_every(self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; start-up recovery already ran.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    async fn tick(&self) {
        match self.recover_pending().await {
            Ok(0) => {}
            Ok(n) => info!(queued = n, "Picked up pending jobs"),
            Err(e) => warn!(error = %e, "Pending-job scan failed"),
        }
        match self.reap_stale().await {
            Ok(0) => {}
            Ok(n) => info!(reaped = n, "Failed stale jobs"),
            Err(e) => warn!(error = %e, "Stale-job scan failed"),
        }
        match self.store.purge_expired().await {
            Ok(0) => {}
            Ok(n) => debug!(purged = n, "Purged expired jobs"),
            Err(e) => warn!(error = %e, "Purge failed"),
        }
    }
}
