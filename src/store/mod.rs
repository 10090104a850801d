//! Job record persistence.
//!
//! A [`JobStore`] is the single source of truth for job state. Every mutation
//! goes through [`JobStore::update`], which applies the change with
//! [`Job::apply`](crate::job::Job::apply) atomically with respect to other
//! updates of the same record. Expired records are invisible to reads even
//! before [`JobStore::purge_expired`] physically removes them.

mod fs;
mod memory;

pub use fs::FsJobStore;
pub use memory::MemoryJobStore;

use crate::error::JobError;
use crate::job::{Job, JobStatus, JobUpdate};
use async_trait::async_trait;

/// Durable storage of job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new record. Fails with [`JobError::DuplicateKey`] when the
    /// id is taken.
    async fn create(&self, job: Job) -> Result<(), JobError>;

    /// Fetch a record. Missing and expired records are
    /// [`JobError::JobNotFound`].
    async fn get(&self, job_id: &str) -> Result<Job, JobError>;

    /// Apply a partial update and return the new record.
    async fn update(&self, job_id: &str, update: JobUpdate) -> Result<Job, JobError>;

    /// Unexpired records, newest first, optionally filtered by status.
    async fn list(&self, status: Option<JobStatus>, limit: usize) -> Result<Vec<Job>, JobError>;

    /// Physically delete expired records and return how many were removed.
    async fn purge_expired(&self) -> Result<usize, JobError>;
}
