//! Progress reporting for long-running runs.
//!
//! Stages report at every chunk boundary through a [`ProgressReporter`]; the
//! executor keeps run-level [`ProgressCounters`] that any task can read.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::models::StageId;

/// One chunk-boundary report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub file: String,
    pub stage: StageId,
    pub rows_done: usize,
    pub rows_total: usize,
}

impl ProgressUpdate {
    pub fn fraction(&self) -> f64 {
        if self.rows_total == 0 {
            1.0
        } else {
            self.rows_done as f64 / self.rows_total as f64
        }
    }
}

/// Receiver of chunk-boundary reports. Called from worker threads.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: &ProgressUpdate);
}

impl<F> ProgressReporter for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _update: &ProgressUpdate) {}
}

/// Emits reports as `tracing` debug events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, update: &ProgressUpdate) {
        tracing::debug!(
            file = %update.file,
            stage = %update.stage,
            rows_done = update.rows_done,
            rows_total = update.rows_total,
            "chunk processed"
        );
    }
}

/// Snapshot of the run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub files_total: usize,
    pub files_done: usize,
    pub rows_processed: usize,
}

/// Shared atomic counters, cloned into worker jobs.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounters {
    files_total: Arc<AtomicUsize>,
    files_done: Arc<AtomicUsize>,
    rows_processed: Arc<AtomicUsize>,
}

impl ProgressCounters {
    pub fn new(files_total: usize) -> Self {
        let counters = Self::default();
        counters.files_total.store(files_total, Ordering::Relaxed);
        counters
    }

    pub fn file_done(&self) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rows(&self, rows: usize) {
        self.rows_processed.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            files_total: self.files_total.load(Ordering::Relaxed),
            files_done: self.files_done.load(Ordering::Relaxed),
            rows_processed: self.rows_processed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_reporter() {
        let seen = Mutex::new(Vec::new());
        let reporter = |u: &ProgressUpdate| seen.lock().unwrap().push(u.rows_done);
        reporter.report(&ProgressUpdate {
            file: "a.csv".into(),
            stage: StageId::StaticSampleRemover,
            rows_done: 10,
            rows_total: 40,
        });
        assert_eq!(*seen.lock().unwrap(), vec![10]);
    }

    #[test]
    fn test_counters_shared_across_clones() {
        let counters = ProgressCounters::new(3);
        let clone = counters.clone();
        clone.file_done();
        clone.add_rows(120);

        let snap = counters.snapshot();
        assert_eq!(snap.files_total, 3);
        assert_eq!(snap.files_done, 1);
        assert_eq!(snap.rows_processed, 120);
    }

    #[test]
    fn test_fraction_of_empty_file() {
        let update = ProgressUpdate {
            file: "a.csv".into(),
            stage: StageId::SizeFilter,
            rows_done: 0,
            rows_total: 0,
        };
        assert_eq!(update.fraction(), 1.0);
    }
}
