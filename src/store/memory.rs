use super::JobStore;
use crate::error::JobError;
use crate::job::{newest_first, Job, JobStatus, JobUpdate};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-local job store backed by a `HashMap`.
///
/// Records do not survive a restart; use [`super::FsJobStore`] when a worker
/// process must pick up jobs submitted by another process.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held, expired ones included.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: Job) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.job_id) {
            return Err(JobError::DuplicateKey { job_id: job.job_id });
        }
        jobs.insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Job, JobError> {
        let now = Utc::now();
        self.jobs
            .read()
            .await
            .get(job_id)
            .filter(|job| !job.is_expired(now))
            .cloned()
            .ok_or_else(|| JobError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    async fn update(&self, job_id: &str, update: JobUpdate) -> Result<Job, JobError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .filter(|job| !job.is_expired(now))
            .ok_or_else(|| JobError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        job.apply(update, now)?;
        Ok(job.clone())
    }

    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobError> {
        let now = Utc::now();
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|job| !job.is_expired(now))
            .filter(|job| status.map_or(true, |s| job.status == s))
            .cloned()
            .collect();
        matching.sort_by(newest_first);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn purge_expired(&self) -> Result<usize, JobError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !job.is_expired(now));
        Ok(before - jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::job::SubmitRequest;
    use std::time::Duration;

    fn job(retention: Duration) -> Job {
        let config = ServiceConfig::builder()
            .default_namespace("docs")
            .build()
            .unwrap();
        let request = SubmitRequest::new("a.pdf").resolve(&config).unwrap();
        Job::new(request, retention, Utc::now())
    }

    #[tokio::test]
    async fn create_get_update() {
        let store = MemoryJobStore::new();
        let j = job(Duration::from_secs(60));
        let id = j.job_id.clone();
        store.create(j.clone()).await.unwrap();

        assert!(matches!(
            store.create(j).await,
            Err(JobError::DuplicateKey { .. })
        ));

        let updated = store.update(&id, JobUpdate::processing(10)).await.unwrap();
        assert_eq!(updated.status, JobStatus::Processing);
        assert_eq!(store.get(&id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = MemoryJobStore::new();
        assert!(matches!(
            store.get("missing").await,
            Err(JobError::JobNotFound { .. })
        ));
        assert!(matches!(
            store.update("missing", JobUpdate::progress(5)).await,
            Err(JobError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn expired_records_are_hidden_then_purged() {
        let store = MemoryJobStore::new();
        let j = job(Duration::from_millis(20));
        let id = j.job_id.clone();
        store.create(j).await.unwrap();
        store.create(job(Duration::from_secs(60))).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.get(&id).await.is_err());
        assert_eq!(store.list(None, 100).await.unwrap().len(), 1);
        assert_eq!(store.len().await, 2);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn list_filters_and_orders_newest_first() {
        let store = MemoryJobStore::new();
        let first = job(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = job(Duration::from_secs(60));
        let (first_id, second_id) = (first.job_id.clone(), second.job_id.clone());
        store.create(first).await.unwrap();
        store.create(second).await.unwrap();
        store
            .update(&first_id, JobUpdate::processing(10))
            .await
            .unwrap();

        let all = store.list(None, 10).await.unwrap();
        assert_eq!(all[0].job_id, second_id);
        assert_eq!(all[1].job_id, first_id);

        let processing = store.list(Some(JobStatus::Processing), 10).await.unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].job_id, first_id);

        assert_eq!(store.list(None, 1).await.unwrap().len(), 1);
    }
}
