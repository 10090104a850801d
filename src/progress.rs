//! Progress checkpoints and the job progress observer.
//!
//! Job progress is persisted at fixed checkpoints; only their order matters
//! to clients. Between [`CONVERTED`] and [`UNITS_DONE`] progress moves
//! linearly with the number of emitted units.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::service::JobServiceBuilder::progress_callback`] to receive the
//! same events in-process (e.g. to drive a terminal progress bar). Observer
//! calls never affect the job.
//!
//! # Example
//!
//! ```rust
//! use docjobs::JobProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     units: AtomicUsize,
//! }
//!
//! impl JobProgressCallback for CountingCallback {
//!     fn on_unit_complete(&self, job_id: &str, unit: usize, total: usize, progress: u8) {
//!         self.units.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{job_id}: unit {unit}/{total} ({progress}%)");
//!     }
//! }
//! ```

use std::sync::Arc;

/// Job picked up by a worker.
pub const STARTED: u8 = 10;
/// Source document retrieved.
pub const SOURCE_FETCHED: u8 = 20;
/// Engine finished; units known.
pub const CONVERTED: u8 = 40;
/// Every unit emitted.
pub const UNITS_DONE: u8 = 90;
pub const COMPLETE: u8 = 100;

/// Progress after `done` of `total` units have been emitted.
pub fn unit_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return CONVERTED;
    }
    let span = (UNITS_DONE - CONVERTED) as usize;
    let done = done.min(total);
    CONVERTED + (span * done / total) as u8
}

/// Called by the job runner as a job moves through its lifecycle.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events for different jobs may arrive concurrently
/// from different worker tasks.
pub trait JobProgressCallback: Send + Sync {
    /// Worker picked the job up.
    fn on_job_start(&self, job_id: &str) {
        let _ = job_id;
    }

    /// A checkpoint was persisted.
    fn on_checkpoint(&self, job_id: &str, progress: u8) {
        let _ = (job_id, progress);
    }

    /// The engine produced `total` units.
    fn on_units_discovered(&self, job_id: &str, total: usize) {
        let _ = (job_id, total);
    }

    /// Unit `unit` (1-based) was emitted.
    fn on_unit_complete(&self, job_id: &str, unit: usize, total: usize, progress: u8) {
        let _ = (job_id, unit, total, progress);
    }

    fn on_job_complete(&self, job_id: &str, total: usize) {
        let _ = (job_id, total);
    }

    fn on_job_failed(&self, job_id: &str, error: &str) {
        let _ = (job_id, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type held by the service.
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn checkpoints_are_ordered() {
        let points = [STARTED, SOURCE_FETCHED, CONVERTED, UNITS_DONE, COMPLETE];
        assert!(points.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn unit_progress_interpolates() {
        assert_eq!(unit_progress(0, 4), 40);
        assert_eq!(unit_progress(1, 4), 52);
        assert_eq!(unit_progress(2, 4), 65);
        assert_eq!(unit_progress(4, 4), 90);
        assert_eq!(unit_progress(9, 4), 90);
        assert_eq!(unit_progress(0, 0), 40);
    }

    #[test]
    fn unit_progress_is_monotonic() {
        let total = 37;
        let values: Vec<u8> = (0..=total).map(|d| unit_progress(d, total)).collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    struct TrackingCallback {
        units: AtomicUsize,
        failures: AtomicUsize,
    }

    impl JobProgressCallback for TrackingCallback {
        fn on_unit_complete(&self, _job_id: &str, _unit: usize, _total: usize, _progress: u8) {
            self.units.fetch_add(1, Ordering::SeqCst);
        }

        fn on_job_failed(&self, _job_id: &str, _error: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_job_start("j");
        cb.on_checkpoint("j", 10);
        cb.on_units_discovered("j", 3);
        cb.on_unit_complete("j", 1, 3, 56);
        cb.on_job_complete("j", 3);
        cb.on_job_failed("j", "boom");
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = Arc::new(TrackingCallback {
            units: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        });
        let cb: ProgressCallback = tracker.clone();
        cb.on_unit_complete("j", 1, 2, 65);
        cb.on_unit_complete("j", 2, 2, 90);
        cb.on_job_failed("k", "x");
        // defaults are no-ops
        cb.on_job_start("j");

        assert_eq!(tracker.units.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.failures.load(Ordering::SeqCst), 1);
    }
}
