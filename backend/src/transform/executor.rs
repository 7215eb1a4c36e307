//! Pipeline executor.
//!
//! Runs a profile over a batch in two phases:
//!
//! ```text
//!  phase 1 (parallel, one blocking job per file, bounded by a semaphore)
//!    size_filter -> header_standardizer -> ... -> quaternion_column_remover
//!                         │ cache lookup per stage, lineage buffered per file
//!  ───────────────────── barrier: every job joined ─────────────────────
//!  phase 2 (caller, sequential)
//!    anomaly_detector over all survivors -> resequencer in input order
//! ```
//!
//! A file's lineage buffer is committed only when its chain finished. A
//! cancelled file reverts to `Pending` and its buffer is dropped; phase 2 does
//! not run after a cancellation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::logs::{log_info, log_info_indent, log_success, log_warning, log_warning_indent};
use crate::cache::{chain_fingerprint, CacheManager};
use crate::error::{PipelineError, PipelineResult, StageError};
use crate::lineage::{LineageAction, LineageBuffer, LineageEntry, LineageTracker};
use crate::models::trajectory::DEFAULT_SPEED_FIELD;
use crate::models::{
    Diagnostics, Exclusion, ExclusionCause, FileEntry, FileStatus, StageResult, StageStep, TrajectoryStats,
};
use crate::parser::DEFAULT_CHUNK_ROWS;
use crate::transform::profile::{AnomalyParams, CleaningProfile, ResequencerParams, StageConfig, StageSpec};
use crate::transform::progress::{NoopReporter, ProgressCounters, ProgressReporter};
use crate::transform::stages::{assign_names, check_schema, detect_anomalies, AnomalyReport, CorpusMember, StageContext};

/// Worker count when the hardware concurrency is unknown.
const FALLBACK_WORKERS: usize = 4;

/// Summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub run: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u128,
    pub files_total: usize,
    /// Files whose per-file chain finished (active or excluded).
    pub files_completed: usize,
    /// Files left `Pending` by a cancellation.
    pub files_cancelled: usize,
    pub files_active: usize,
    pub files_excluded: usize,
    pub cancelled: bool,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Present when the anomaly detector ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<AnomalyReport>,
}

/// Files after a run, in input order, and the run summary.
#[derive(Debug)]
pub struct RunOutcome {
    pub files: Vec<FileEntry>,
    pub report: RunReport,
}

/// Shared state one run works against.
pub struct RunScope<'a> {
    pub profile: &'a Arc<CleaningProfile>,
    pub cache: &'a Arc<CacheManager>,
    pub lineage: &'a Arc<LineageTracker>,
    pub run: u64,
    pub cancel: &'a CancellationToken,
}

/// Bounded worker pool running the stage chain over a batch.
#[derive(Clone)]
pub struct PipelineExecutor {
    workers: usize,
    chunk_rows: usize,
    progress: Arc<dyn ProgressReporter>,
}

impl Default for PipelineExecutor {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(FALLBACK_WORKERS);
        Self {
            workers,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            progress: Arc::new(NoopReporter),
        }
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("workers", &self.workers)
            .field("chunk_rows", &self.chunk_rows)
            .finish()
    }
}

impl PipelineExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows.max(1);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// Workers used for a batch of `files`: never more than there are files.
    pub fn pool_size(&self, files: usize) -> usize {
        self.workers.min(files).max(1)
    }

    /// Run the profile over `files`. The profile is validated first.
    pub async fn run(&self, files: Vec<FileEntry>, scope: RunScope<'_>) -> PipelineResult<RunOutcome> {
        scope.profile.validate()?;
        if files.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let cache_before = scope.cache.stats();
        let files_total = files.len();

        log_info(format!(
            "Run {}: {} files, {} enabled stages",
            scope.run,
            files_total,
            scope.profile.stages.iter().filter(|s| s.enabled).count()
        ));

        let (mut files, completed, cancelled_files) = self.run_per_file(files, &scope).await?;
        let cancelled = scope.cancel.is_cancelled();

        let mut anomaly = None;
        if cancelled {
            log_warning(format!("Run {} cancelled: {} files not completed", scope.run, cancelled_files));
        } else {
            anomaly = run_corpus_stages(&mut files, &scope);
        }

        let cache_after = scope.cache.stats();
        let files_active = files.iter().filter(|f| f.status.is_active()).count();
        let files_excluded = files.iter().filter(|f| f.status.exclusion().is_some()).count();

        let report = RunReport {
            run_id: Uuid::new_v4(),
            run: scope.run,
            started_at,
            duration_ms: clock.elapsed().as_millis(),
            files_total,
            files_completed: completed,
            files_cancelled: cancelled_files,
            files_active,
            files_excluded,
            cancelled,
            cache_hits: cache_after.hits.saturating_sub(cache_before.hits),
            cache_misses: cache_after.misses.saturating_sub(cache_before.misses),
            anomaly,
        };

        if !cancelled {
            log_success(format!(
                "Run {} finished: {} active, {} excluded ({} cache hits)",
                scope.run, files_active, files_excluded, report.cache_hits
            ));
        }

        Ok(RunOutcome { files, report })
    }

    /// Phase 1: every file's per-file chain on the worker pool.
    async fn run_per_file(
        &self,
        files: Vec<FileEntry>,
        scope: &RunScope<'_>,
    ) -> PipelineResult<(Vec<FileEntry>, usize, usize)> {
        let workers = self.pool_size(files.len());
        let semaphore = Arc::new(Semaphore::new(workers));
        let counters = ProgressCounters::new(files.len());
        let mut slots: Vec<Option<FileEntry>> = vec![None; files.len()];
        let mut jobs = JoinSet::new();
        let mut completed = 0;
        let mut cancelled_files = 0;

        log_info_indent(format!("Phase 1: per-file stages on {} workers", workers), 1);

        for (slot, mut entry) in files.into_iter().enumerate() {
            entry.reset();
            if entry.ingested.is_none() {
                // Ingest failures are already excluded.
                completed += 1;
                slots[slot] = Some(entry);
                continue;
            }
            if scope.cancel.is_cancelled() {
                cancelled_files += 1;
                slots[slot] = Some(entry);
                continue;
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::Worker(e.to_string()))?;

            let job = FileJob {
                profile: Arc::clone(scope.profile),
                cache: Arc::clone(scope.cache),
                progress: Arc::clone(&self.progress),
                cancel: scope.cancel.clone(),
                chunk_rows: self.chunk_rows,
                run: scope.run,
            };

            jobs.spawn_blocking(move || {
                let _permit = permit;
                let outcome = job.run(&mut entry);
                (slot, entry, outcome)
            });
        }

        while let Some(joined) = jobs.join_next().await {
            let (slot, mut entry, outcome) = joined.map_err(|e| PipelineError::Worker(e.to_string()))?;
            match outcome {
                Ok(buffer) => {
                    scope.lineage.commit(&entry.source.name, buffer);
                    counters.file_done();
                    completed += 1;
                    if let FileStatus::Excluded(ex) = &entry.status {
                        log_warning_indent(
                            format!("{} excluded by {}: {}", entry.source.name, ex.stage_label(), ex.reason),
                            2,
                        );
                    }
                }
                Err(_) => {
                    entry.reset();
                    cancelled_files += 1;
                }
            }
            slots[slot] = Some(entry);
        }

        let snapshot = counters.snapshot();
        tracing::debug!(files_done = snapshot.files_done, files_total = snapshot.files_total, "phase 1 joined");

        Ok((slots.into_iter().flatten().collect(), completed, cancelled_files))
    }
}

/// Everything one blocking job needs, owned.
struct FileJob {
    profile: Arc<CleaningProfile>,
    cache: Arc<CacheManager>,
    progress: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
    chunk_rows: usize,
    run: u64,
}

fn lineage_entry(run: u64, spec: &StageSpec, action: LineageAction, diagnostics: &Diagnostics, excluded: bool) -> LineageEntry {
    LineageEntry {
        run,
        stage: spec.id(),
        action,
        config: spec.config.parameters(),
        records_in: diagnostics.records_in,
        records_out: diagnostics.records_out,
        excluded,
        timestamp: Utc::now(),
    }
}

impl FileJob {
    /// Run the per-file stages on one entry.
    ///
    /// Only fails on cancellation; every other problem excludes the file.
    fn run(&self, entry: &mut FileEntry) -> Result<LineageBuffer, StageError> {
        let mut buffer = LineageBuffer::new();
        let Some(mut current) = entry.ingested.clone() else {
            return Ok(buffer);
        };

        let source = entry.source.clone();
        let ctx = StageContext::new(&source, &self.cancel)
            .with_chunk_rows(self.chunk_rows)
            .with_progress(self.progress.as_ref());
        let mut fingerprint = source.fingerprint.clone();
        // Malformed ingest rows are reported on the first stage that runs.
        let mut ingest_skips = entry.rows_skipped;

        for spec in &self.profile.stages {
            let Some(stage) = spec.config.as_file_stage() else {
                continue;
            };
            fingerprint = chain_fingerprint(&fingerprint, spec.id(), spec.enabled, &spec.config.parameters());

            if !spec.enabled {
                let diagnostics = Diagnostics::passthrough(current.len());
                buffer.push(lineage_entry(self.run, spec, LineageAction::Skipped, &diagnostics, false));
                entry.steps.push(StageStep {
                    stage: spec.id(),
                    result: None,
                    cache_hit: false,
                });
                continue;
            }

            let (result, cache_hit) = match self.cache.get(&fingerprint) {
                Some(hit) => (hit, true),
                None => {
                    let computed = check_schema(stage, &current)
                        .map_err(StageError::from)
                        .and_then(|()| stage.apply(&current, &ctx));

                    let mut result = match computed {
                        Ok(result) => result,
                        Err(StageError::Schema(e)) => StageResult::excluded(
                            Arc::clone(&current),
                            Exclusion::new(spec.id(), ExclusionCause::Schema, e.to_string()),
                        ),
                        Err(StageError::Cancelled) => return Err(StageError::Cancelled),
                    };
                    result.diagnostics.rows_skipped = ingest_skips;
                    let result = Arc::new(result);
                    self.cache.insert(&source.fingerprint, fingerprint.clone(), Arc::clone(&result));
                    (result, false)
                }
            };
            ingest_skips = 0;

            let action = if cache_hit { LineageAction::Cached } else { LineageAction::Applied };
            buffer.push(lineage_entry(
                self.run,
                spec,
                action,
                &result.diagnostics,
                result.exclusion.is_some(),
            ));
            entry.steps.push(StageStep {
                stage: spec.id(),
                result: Some(Arc::clone(&result)),
                cache_hit,
            });

            if let Some(exclusion) = &result.exclusion {
                entry.current = Some(Arc::clone(&result.dataset));
                entry.status = FileStatus::Excluded(exclusion.clone());
                return Ok(buffer);
            }
            current = Arc::clone(&result.dataset);
        }

        entry.current = Some(current);
        entry.status = FileStatus::Active;
        Ok(buffer)
    }
}

/// Phase 2: corpus stages over the survivors, in profile order.
fn run_corpus_stages(files: &mut [FileEntry], scope: &RunScope<'_>) -> Option<AnomalyReport> {
    let mut anomaly = None;

    for spec in scope.profile.stages.iter().filter(|s| s.id().is_corpus()) {
        if !spec.enabled {
            for entry in files.iter_mut().filter(|f| f.status.is_active()) {
                let records = entry.final_records();
                scope.lineage.append(
                    &entry.source.name,
                    lineage_entry(scope.run, spec, LineageAction::Skipped, &Diagnostics::passthrough(records), false),
                );
                entry.steps.push(StageStep {
                    stage: spec.id(),
                    result: None,
                    cache_hit: false,
                });
            }
            continue;
        }

        match &spec.config {
            StageConfig::AnomalyDetector(params) => {
                anomaly = Some(apply_anomaly_detector(files, spec, params, scope));
            }
            StageConfig::Resequencer(params) => apply_resequencer(files, spec, params, scope),
            _ => {}
        }
    }

    anomaly
}

fn apply_anomaly_detector(
    files: &mut [FileEntry],
    spec: &StageSpec,
    params: &AnomalyParams,
    scope: &RunScope<'_>,
) -> AnomalyReport {
    let survivors: Vec<usize> = (0..files.len()).filter(|&i| files[i].status.is_active()).collect();
    let stats: Vec<TrajectoryStats> = survivors
        .iter()
        .map(|&i| match &files[i].current {
            Some(ds) => TrajectoryStats::compute(ds, Some(DEFAULT_SPEED_FIELD)),
            None => TrajectoryStats::default(),
        })
        .collect();
    let members: Vec<CorpusMember<'_>> = survivors
        .iter()
        .zip(&stats)
        .map(|(&i, stats)| CorpusMember {
            index: files[i].source.index,
            name: &files[i].source.name,
            stats,
        })
        .collect();

    let report = detect_anomalies(params, &members);
    log_info_indent(
        format!(
            "Phase 2: anomaly detection over {} files, {} flagged",
            members.len(),
            report.flagged.len()
        ),
        1,
    );

    for &i in &survivors {
        let entry = &mut files[i];
        let Some(current) = entry.current.clone() else { continue };

        let mut result = StageResult::unchanged(current);
        if let Some(flag) = report.flagged.iter().find(|e| e.index == entry.source.index) {
            let summary: Vec<String> = flag
                .findings
                .iter()
                .map(|f| format!("{} = {:.3} (z = {:.2})", f.metric.as_str(), f.value, f.z_score))
                .collect();
            let reason = format!("Anomalous {}", summary.join(", "));
            result.diagnostics.flags.push("anomaly".to_string());
            result.diagnostics.notes.push(reason.clone());
            if flag.excluded {
                result.exclusion = Some(Exclusion::new(spec.id(), ExclusionCause::Anomaly, reason));
            }
        }

        scope.lineage.append(
            &entry.source.name,
            lineage_entry(
                scope.run,
                spec,
                LineageAction::Applied,
                &result.diagnostics,
                result.exclusion.is_some(),
            ),
        );
        if let Some(exclusion) = &result.exclusion {
            entry.status = FileStatus::Excluded(exclusion.clone());
        }
        entry.steps.push(StageStep {
            stage: spec.id(),
            result: Some(Arc::new(result)),
            cache_hit: false,
        });
    }

    report
}

fn apply_resequencer(files: &mut [FileEntry], spec: &StageSpec, params: &ResequencerParams, scope: &RunScope<'_>) {
    let survivors: Vec<usize> = (0..files.len()).filter(|&i| files[i].status.is_active()).collect();
    let names = assign_names(params, survivors.len());

    for (&i, name) in survivors.iter().zip(names) {
        let entry = &mut files[i];
        let Some(current) = entry.current.clone() else { continue };

        let result = StageResult::unchanged(current)
            .with_diagnostics(|d| d.with_note(format!("renamed '{}' to '{}'", entry.source.name, name)));
        scope.lineage.append(
            &entry.source.name,
            lineage_entry(scope.run, spec, LineageAction::Applied, &result.diagnostics, false),
        );
        entry.output_name = Some(name);
        entry.steps.push(StageStep {
            stage: spec.id(),
            result: Some(Arc::new(result)),
            cache_hit: false,
        });
    }

    log_info_indent(format!("Phase 2: resequenced {} files", survivors.len()), 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::profile::SizeFilterParams;
    use crate::transform::progress::ProgressUpdate;
    use crate::models::StageId;
    use crate::transform::Session;
    use std::sync::Mutex;

    fn flight_csv(static_rows: usize, moving_rows: usize) -> String {
        let mut csv = String::from("sec,position_n,position_e,position_d,vg\n");
        for i in 0..static_rows {
            csv.push_str(&format!("{},0,0,0,0\n", i));
        }
        for i in 0..moving_rows {
            let n = (i + 1) as f64 * 2.0;
            csv.push_str(&format!("{},{},0,-1,5\n", static_rows + i, n));
        }
        csv
    }

    /// Three files with distinct content, so nothing is served from the cache.
    fn session() -> Session {
        let mut profile = CleaningProfile::default();
        let pos = profile.position(StageId::SizeFilter).unwrap();
        profile.stages[pos] = StageSpec::new(StageConfig::SizeFilter(SizeFilterParams { min_size_mb: 0.0 }));

        let mut session = Session::new(profile).unwrap();
        session.add_file("a.csv", flight_csv(60, 30).as_bytes());
        session.add_file("b.csv", flight_csv(55, 40).as_bytes());
        session.add_file("c.csv", flight_csv(50, 35).as_bytes());
        session
    }

    #[test]
    fn test_pool_never_exceeds_files() {
        assert_eq!(PipelineExecutor::new().with_workers(8).pool_size(3), 3);
        assert_eq!(PipelineExecutor::new().with_workers(2).pool_size(10), 2);
        assert_eq!(PipelineExecutor::new().with_workers(4).pool_size(0), 1);
        assert_eq!(PipelineExecutor::new().with_workers(0).workers(), 1);
    }

    #[tokio::test]
    async fn test_single_worker_runs_files_one_at_a_time() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = move |u: &ProgressUpdate| sink.lock().unwrap().push(u.file.clone());
        let executor = PipelineExecutor::new()
            .with_workers(1)
            .with_chunk_rows(8)
            .with_progress(Arc::new(reporter));

        let mut session = session();
        let report = session.run(&executor, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.files_completed, 3);

        let mut order = seen.lock().unwrap().clone();
        order.dedup();
        assert_eq!(order, vec!["a.csv", "b.csv", "c.csv"]);
    }

    #[tokio::test]
    async fn test_malformed_rows_reported_on_first_stage() {
        let mut csv = flight_csv(60, 30);
        csv.push_str("90,1\n");

        let mut session = session();
        session.add_file("d.csv", csv.as_bytes());
        assert_eq!(session.file("d.csv").unwrap().rows_skipped, 1);
        session.run(&PipelineExecutor::new().with_workers(2), &CancellationToken::new()).await.unwrap();

        let steps = &session.file("d.csv").unwrap().steps;
        let skipped: Vec<usize> = steps
            .iter()
            .filter_map(|s| s.result.as_ref())
            .map(|r| r.diagnostics.rows_skipped)
            .collect();
        assert_eq!(skipped[0], 1);
        assert!(skipped[1..].iter().all(|&n| n == 0));
        assert_eq!(session.file("a.csv").unwrap().steps[0].result.as_ref().unwrap().diagnostics.rows_skipped, 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_keeps_completed_files() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let reporter = move |u: &ProgressUpdate| {
            if u.file == "b.csv" {
                trigger.cancel();
            }
        };
        let executor = PipelineExecutor::new()
            .with_workers(1)
            .with_chunk_rows(8)
            .with_progress(Arc::new(reporter));

        let mut session = session();
        let report = session.run(&executor, &cancel).await.unwrap().clone();
        assert!(report.cancelled);
        assert_eq!(report.files_completed, 1);
        assert_eq!(report.files_cancelled, 2);
        assert!(report.anomaly.is_none());

        let files = session.files();
        assert_eq!(files[0].status, FileStatus::Active);
        assert_eq!(files[0].steps.len(), 6);
        for entry in &files[1..] {
            assert_eq!(entry.status, FileStatus::Pending);
            assert!(entry.steps.is_empty());
        }

        let lineage = session.lineage();
        assert_eq!(lineage.history("a.csv").len(), 6);
        assert!(lineage.history("b.csv").is_empty());
        assert!(lineage.history("c.csv").is_empty());
    }
}
