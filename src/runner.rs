//! Background execution of a single job.
//!
//! [`JobRunner::run`] drives one record from `submitted` to a terminal state:
//!
//! ```text
//! submitted ──▶ processing(10) ──▶ source fetched(20) ──▶ converted(40)
//!     ──▶ unit i of n (40 + 50·i/n) ──▶ completed(100)
//!                 any step fails ──▶ failed (progress kept)
//! ```
//!
//! Artifacts are collected in memory and written together with the
//! `completed` status, so no reader ever sees a non-terminal job with
//! artifacts. Uploads made before a failure are not rolled back.
//!
//! Completion callbacks run on their own tasks and never hold a worker slot;
//! [`JobRunner::flush_callbacks`] waits for the outstanding ones.

use crate::artifact::ArtifactStore;
use crate::callback::{notify_terminal, Notifier};
use crate::convert::{fetch_source, run_engine};
use crate::engine::Engines;
use crate::error::JobError;
use crate::job::{Job, JobStatus, JobUpdate, ResultArtifact};
use crate::pipeline::emit::{emit_unit, output_key};
use crate::progress::{self, ProgressCallback};
use crate::store::JobStore;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Executes jobs against the injected collaborators.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    engines: Engines,
    notifier: Arc<dyn Notifier>,
    progress: ProgressCallback,
    callbacks: Mutex<JoinSet<()>>,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        engines: Engines,
        notifier: Arc<dyn Notifier>,
        progress: ProgressCallback,
    ) -> Self {
        Self {
            store,
            artifacts,
            engines,
            notifier,
            progress,
            callbacks: Mutex::new(JoinSet::new()),
        }
    }

    /// Run the job to a terminal state.
    ///
    /// Returns the terminal record written by this run, or `None` when the
    /// job was not runnable (already picked up, finished, expired) or was
    /// finished by someone else mid-flight.
    pub async fn run(&self, job_id: &str) -> Result<Option<Job>, JobError> {
        let job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(e) if e.is_stale() => {
                debug!(job_id, "Job vanished before start; skipping");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if job.status != JobStatus::Submitted {
            debug!(job_id, status = %job.status, "Job already picked up; skipping");
            return Ok(None);
        }

        let start = Instant::now();
        info!(
            job_id,
            kind = %job.request.kind,
            source = %job.request.source_key,
            "Starting job"
        );

        let job = match self.checkpoint(job_id, JobUpdate::processing(progress::STARTED)).await {
            Ok(job) => job,
            Err(e) if e.is_stale() => return Ok(None),
            Err(e) => return Err(e),
        };
        self.progress.on_job_start(job_id);

        let outcome = self.execute(&job).await;

        let update = match outcome {
            Ok(artifacts) => JobUpdate::completed(artifacts),
            Err(e) if e.is_stale() => {
                info!(job_id, "Job was finished elsewhere; stopping");
                return Ok(None);
            }
            Err(e) => {
                warn!(job_id, error = %e, "Job failed");
                JobUpdate::failed(e.to_string())
            }
        };

        let finished = match self.store.update(job_id, update).await {
            Ok(job) => job,
            Err(e) if e.is_stale() => {
                info!(job_id, "Job was finished elsewhere; stopping");
                return Ok(None);
            }
            Err(e) => {
                error!(job_id, error = %e, "Failed to record terminal state");
                return Err(e);
            }
        };

        match finished.status {
            JobStatus::Completed => {
                info!(
                    job_id,
                    units = finished.artifacts.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Job completed"
                );
                self.progress
                    .on_job_complete(job_id, finished.artifacts.len());
            }
            _ => {
                let message = finished.error_message.as_deref().unwrap_or_default();
                self.progress.on_job_failed(job_id, message);
            }
        }

        self.dispatch_callback(&finished);
        Ok(Some(finished))
    }

    /// Mark a job failed after its worker task died. Stale jobs are left
    /// alone.
    pub async fn fail_abandoned(&self, job_id: &str, reason: &str) {
        match self.store.update(job_id, JobUpdate::failed(reason)).await {
            Ok(job) => {
                self.progress.on_job_failed(job_id, reason);
                self.dispatch_callback(&job);
            }
            Err(e) if e.is_stale() => {}
            Err(e) => error!(job_id, error = %e, "Failed to record abandoned job"),
        }
    }

    /// Wait for every callback dispatched so far.
    pub async fn flush_callbacks(&self) {
        let mut pending = match self.callbacks.lock() {
            Ok(mut set) => std::mem::take(&mut *set),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Callback task ended abnormally");
            }
        }
    }

    fn dispatch_callback(&self, job: &Job) {
        if job.request.callback_url.is_none() {
            return;
        }
        let notifier = Arc::clone(&self.notifier);
        let job = job.clone();
        let mut set = match self.callbacks.lock() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Reap finished deliveries so the set stays small.
        while set.try_join_next().is_some() {}
        set.spawn(async move { notify_terminal(notifier.as_ref(), &job).await });
    }

    async fn execute(&self, job: &Job) -> Result<Vec<ResultArtifact>, JobError> {
        let job_id = job.job_id.as_str();
        let request = &job.request;

        // ── Step 1: Retrieve source ──────────────────────────────────────────
        let source = fetch_source(self.artifacts.as_ref(), request).await?;
        debug!(job_id, bytes = source.len(), "Source retrieved");
        self.checkpoint(job_id, JobUpdate::progress(progress::SOURCE_FETCHED))
            .await?;

        // ── Step 2: Convert ──────────────────────────────────────────────────
        let engine = self.engines.get(request.kind).ok_or_else(|| {
            JobError::Internal(format!("no engine registered for {}", request.kind))
        })?;
        let units = run_engine(engine.as_ref(), source, &request.params).await?;
        let total = units.len();
        info!(job_id, engine = engine.name(), units = total, "Conversion finished");
        self.checkpoint(
            job_id,
            JobUpdate::progress(progress::CONVERTED).with_total_units(total),
        )
        .await?;
        self.progress.on_units_discovered(job_id, total);

        // ── Step 3: Emit units ───────────────────────────────────────────────
        let stem = request.source_stem();
        let mut artifacts = Vec::with_capacity(total);
        for (done, unit) in units.into_iter().enumerate() {
            let index = unit.index;
            let key = output_key(&request.output_prefix, Some(job_id), stem, &unit.suffix);
            let artifact = emit_unit(
                self.artifacts.as_ref(),
                &request.namespace,
                &key,
                unit,
                request.return_inline,
            )
            .await?;
            artifacts.push(artifact);

            let pct = progress::unit_progress(done + 1, total);
            self.checkpoint(job_id, JobUpdate::progress(pct)).await?;
            self.progress.on_unit_complete(job_id, index, total, pct);
        }

        Ok(artifacts)
    }

    async fn checkpoint(&self, job_id: &str, update: JobUpdate) -> Result<Job, JobError> {
        let job = self.store.update(job_id, update).await?;
        self.progress.on_checkpoint(job_id, job.progress);
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::MemoryArtifactStore;
    use crate::callback::CallbackPayload;
    use crate::config::{ConversionKind, RenderParams, ServiceConfig};
    use crate::engine::{ConversionEngine, RenderedUnit};
    use crate::error::EngineError;
    use crate::job::SubmitRequest;
    use crate::progress::NoopProgressCallback;
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Pages(usize);

    #[async_trait]
    impl ConversionEngine for Pages {
        fn name(&self) -> &str {
            "pages"
        }

        async fn convert(
            &self,
            _source: Vec<u8>,
            _params: &RenderParams,
        ) -> Result<Vec<RenderedUnit>, EngineError> {
            Ok((1..=self.0)
                .map(|n| RenderedUnit {
                    index: n,
                    suffix: format!("_page_{n}.png"),
                    content_type: "image/png".into(),
                    bytes: vec![n as u8; 8],
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<CallbackPayload>>);

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, _url: &str, payload: &CallbackPayload) -> Result<(), JobError> {
            self.0.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryJobStore>,
        artifacts: Arc<MemoryArtifactStore>,
        notifier: Arc<Recording>,
        runner: JobRunner,
    }

    fn fixture(pages: usize) -> Fixture {
        let store = Arc::new(MemoryJobStore::new());
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let notifier = Arc::new(Recording::default());
        let runner = JobRunner::new(
            store.clone(),
            artifacts.clone(),
            Engines::new().with(ConversionKind::PdfToPng, Arc::new(Pages(pages))),
            notifier.clone(),
            Arc::new(NoopProgressCallback),
        );
        Fixture {
            store,
            artifacts,
            notifier,
            runner,
        }
    }

    async fn submit(store: &MemoryJobStore, callback: Option<&str>) -> String {
        let config = ServiceConfig::builder()
            .default_namespace("docs")
            .build()
            .unwrap();
        let mut req = SubmitRequest::new("in/deck.pdf");
        req.callback_url = callback.map(str::to_string);
        let job = Job::new(
            req.resolve(&config).unwrap(),
            Duration::from_secs(60),
            Utc::now(),
        );
        let id = job.job_id.clone();
        store.create(job).await.unwrap();
        id
    }

    #[tokio::test]
    async fn runs_to_completion_with_job_scoped_keys() {
        let f = fixture(2);
        f.artifacts.insert("docs", "in/deck.pdf", b"%PDF".to_vec()).await;
        let id = submit(&f.store, None).await;

        let job = f.runner.run(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.total_units, Some(2));
        assert_eq!(
            job.artifacts[1].key(),
            Some(format!("converted/{id}/deck_page_2.png").as_str())
        );
        assert_eq!(f.artifacts.keys("docs").await.len(), 3);
    }

    #[tokio::test]
    async fn missing_source_fails_at_first_checkpoint() {
        let f = fixture(1);
        let id = submit(&f.store, Some("http://hooks.test/done")).await;

        let job = f.runner.run(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.progress, progress::STARTED);
        assert!(job
            .error_message
            .as_deref()
            .unwrap()
            .contains("Failed to retrieve source"));
        f.runner.flush_callbacks().await;
        assert_eq!(f.notifier.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_submitted_jobs_are_skipped() {
        let f = fixture(1);
        let id = submit(&f.store, None).await;
        f.store
            .update(&id, JobUpdate::processing(10))
            .await
            .unwrap();
        assert!(f.runner.run(&id).await.unwrap().is_none());
        assert!(f.runner.run("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn zero_units_fail_the_job() {
        let f = fixture(0);
        f.artifacts.insert("docs", "in/deck.pdf", b"%PDF".to_vec()).await;
        let id = submit(&f.store, None).await;
        let job = f.runner.run(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.artifacts.is_empty());
    }

    #[tokio::test]
    async fn fail_abandoned_leaves_terminal_jobs_alone() {
        let f = fixture(1);
        f.artifacts.insert("docs", "in/deck.pdf", b"%PDF".to_vec()).await;
        let id = submit(&f.store, None).await;
        f.runner.run(&id).await.unwrap();
        f.runner.fail_abandoned(&id, "worker died").await;
        let job = f.store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    /// Delivers after a pause, like a slow endpoint.
    struct Slow(Duration, Mutex<usize>);

    #[async_trait]
    impl Notifier for Slow {
        async fn notify(&self, _url: &str, _payload: &CallbackPayload) -> Result<(), JobError> {
            tokio::time::sleep(self.0).await;
            *self.1.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_callback_does_not_delay_the_run() {
        let store = Arc::new(MemoryJobStore::new());
        let artifacts = Arc::new(MemoryArtifactStore::new());
        artifacts.insert("docs", "in/deck.pdf", b"%PDF".to_vec()).await;
        let notifier = Arc::new(Slow(Duration::from_millis(500), Mutex::new(0)));
        let runner = JobRunner::new(
            store.clone(),
            artifacts,
            Engines::new().with(ConversionKind::PdfToPng, Arc::new(Pages(1))),
            notifier.clone(),
            Arc::new(NoopProgressCallback),
        );
        let id = submit(&store, Some("http://hooks.test/slow")).await;

        let started = Instant::now();
        let job = runner.run(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(*notifier.1.lock().unwrap(), 0);

        runner.flush_callbacks().await;
        assert_eq!(*notifier.1.lock().unwrap(), 1);
    }
}
