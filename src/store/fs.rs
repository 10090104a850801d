use super::JobStore;
use crate::artifact::atomic_write;
use crate::error::JobError;
use crate::job::{newest_first, Job, JobStatus, JobUpdate};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

static JOB_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

/// Job store keeping one JSON document per job under a directory.
///
/// Records survive restarts and can be shared between a submitting process
/// and a `serve` worker process. Writes are atomic (temp file + rename);
/// read-modify-write cycles are serialised within this process.
#[derive(Debug, Clone)]
pub struct FsJobStore {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FsJobStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, JobError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| JobError::storage("open job store", e))?;
        debug!(dir = %dir.display(), "Opened job store");
        Ok(Self {
            dir,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, job_id: &str) -> Option<PathBuf> {
        JOB_ID_RE
            .is_match(job_id)
            .then(|| self.dir.join(format!("{job_id}.json")))
    }

    async fn read(&self, job_id: &str) -> Result<Option<Job>, JobError> {
        let Some(path) = self.path_of(job_id) else {
            return Ok(None);
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| JobError::storage("decode job record", format!("{job_id}: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(JobError::storage("read job record", e)),
        }
    }

    async fn write(&self, job: &Job) -> Result<(), JobError> {
        let path = self
            .path_of(&job.job_id)
            .ok_or_else(|| JobError::Internal(format!("invalid job id '{}'", job.job_id)))?;
        let bytes = serde_json::to_vec_pretty(job)
            .map_err(|e| JobError::storage("encode job record", e))?;
        atomic_write(&path, &bytes).await
    }

    /// Every decodable record in the directory. Unreadable files are skipped.
    async fn scan(&self) -> Result<Vec<(PathBuf, Job)>, JobError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| JobError::storage("list job records", e))?;
        let mut jobs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| JobError::storage("list job records", e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                // Removed between listing and reading.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(JobError::storage("read job record", e)),
            };
            match serde_json::from_slice::<Job>(&bytes) {
                Ok(job) => jobs.push((path, job)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable job record"),
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn create(&self, job: Job) -> Result<(), JobError> {
        let _guard = self.write_lock.lock().await;
        let path = self
            .path_of(&job.job_id)
            .ok_or_else(|| JobError::Internal(format!("invalid job id '{}'", job.job_id)))?;
        if tokio::fs::try_exists(&path)
            .await
            .map_err(|e| JobError::storage("create job record", e))?
        {
            return Err(JobError::DuplicateKey { job_id: job.job_id });
        }
        self.write(&job).await
    }

    async fn get(&self, job_id: &str) -> Result<Job, JobError> {
        let now = Utc::now();
        self.read(job_id)
            .await?
            .filter(|job| !job.is_expired(now))
            .ok_or_else(|| JobError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    async fn update(&self, job_id: &str, update: JobUpdate) -> Result<Job, JobError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut job = self
            .read(job_id)
            .await?
            .filter(|job| !job.is_expired(now))
            .ok_or_else(|| JobError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        job.apply(update, now)?;
        self.write(&job).await?;
        Ok(job)
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobError> {
        let now = Utc::now();
        let mut jobs: Vec<Job> = self
            .scan()
            .await?
            .into_iter()
            .map(|(_, job)| job)
            .filter(|job| !job.is_expired(now))
            .filter(|job| status.map_or(true, |s| job.status == s))
            .collect();
        jobs.sort_by(newest_first);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn purge_expired(&self) -> Result<usize, JobError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut removed = 0;
        for (path, job) in self.scan().await? {
            if !job.is_expired(now) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(JobError::storage("purge job record", e)),
            }
        }
        Ok(removed)
    }
}
