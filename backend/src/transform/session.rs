//! Interactive cleaning session.
//!
//! A [`Session`] owns the loaded files, the active profile and the shared
//! cache and lineage. Editing the profile returns the set of stages whose
//! results are stale; the next [`Session::run`] recomputes those and serves
//! everything upstream from the cache.

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::analytics::{AnalyticsAggregator, CorpusSummary};
use crate::api::logs::{log_info, log_warning};
use crate::cache::CacheManager;
use crate::error::{ConfigError, ConfigResult, ExportResult, IngestError, PipelineError, PipelineResult};
use crate::export::{BatchSummary, Exporter};
use crate::lineage::LineageTracker;
use crate::models::{FileEntry, SourceInfo, StageId};
use crate::parser::{source_info, FileAnalysis, FileIngestor};
use crate::transform::executor::{PipelineExecutor, RunReport, RunScope};
use crate::transform::profile::{CleaningProfile, Invalidation, StageSpec};
use crate::transform::stages::AnomalyReport;

pub struct Session {
    files: Vec<FileEntry>,
    profile: Arc<CleaningProfile>,
    cache: Arc<CacheManager>,
    lineage: Arc<LineageTracker>,
    analytics: AnalyticsAggregator,
    ingestor: FileIngestor,
    next_index: usize,
    /// Bumped after each run and on every file add or remove.
    generation: u64,
    runs: u64,
    last_report: Option<RunReport>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            profile: Arc::new(CleaningProfile::default()),
            cache: Arc::new(CacheManager::new()),
            lineage: Arc::new(LineageTracker::new()),
            analytics: AnalyticsAggregator::default(),
            ingestor: FileIngestor::default(),
            next_index: 0,
            generation: 0,
            runs: 0,
            last_report: None,
        }
    }
}

impl Session {
    /// Session over a validated profile.
    pub fn new(profile: CleaningProfile) -> ConfigResult<Self> {
        profile.validate()?;
        Ok(Self {
            profile: Arc::new(profile),
            ..Self::default()
        })
    }

    pub fn with_ingestor(mut self, ingestor: FileIngestor) -> Self {
        self.ingestor = ingestor;
        self
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Ingest `bytes` as a file named `name`.
    ///
    /// A file that cannot be ingested is kept, excluded with an ingest cause.
    /// Adding a name that is already loaded replaces the earlier file.
    pub fn add_file(&mut self, name: &str, bytes: &[u8]) -> &FileEntry {
        let source = self.next_source(name, bytes);

        let entry = match self.ingestor.ingest_bytes(bytes, &CancellationToken::new()) {
            Ok(ingested) => {
                log_info(format!(
                    "Loaded {}: {} records, {} columns ({}, '{}')",
                    name,
                    ingested.dataset.len(),
                    ingested.dataset.fields().len(),
                    ingested.encoding,
                    ingested.delimiter.escape_default()
                ));
                if ingested.rows_skipped > 0 {
                    log_warning(format!("{}: {} malformed rows skipped", name, ingested.rows_skipped));
                }
                FileEntry::ingested(source, ingested.dataset, ingested.baseline, ingested.rows_skipped)
            }
            Err(e) => {
                log_warning(format!("{} could not be ingested: {}", name, e));
                FileEntry::failed(source, e.to_string())
            }
        };

        self.push(entry)
    }

    /// Read a file from disk and add it under its file name.
    ///
    /// An unreadable file is kept, excluded with an ingest cause, like an empty one.
    pub fn add_path(&mut self, path: impl AsRef<Path>) -> &FileEntry {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        match std::fs::read(path) {
            Ok(bytes) => self.add_file(&name, &bytes),
            Err(e) => {
                let err = IngestError::Io(e);
                log_warning(format!("{} could not be ingested: {}", name, err));
                let source = self.next_source(&name, &[]);
                self.push(FileEntry::failed(source, err.to_string()))
            }
        }
    }

    /// Source info for a new file, dropping any earlier file of the same name.
    fn next_source(&mut self, name: &str, bytes: &[u8]) -> SourceInfo {
        if self.files.iter().any(|f| f.source.name == name) {
            log_warning(format!("Replacing previously loaded {}", name));
            self.remove_file(name);
        }
        let source = source_info(self.next_index, name, bytes);
        self.next_index += 1;
        source
    }

    fn push(&mut self, entry: FileEntry) -> &FileEntry {
        self.generation += 1;
        self.files.push(entry);
        &self.files[self.files.len() - 1]
    }

    /// Drop a file and, unless another file has the same content, its cache entries.
    pub fn remove_file(&mut self, name: &str) -> Option<FileEntry> {
        let pos = self.files.iter().position(|f| f.source.name == name)?;
        let removed = self.files.remove(pos);

        let shared = self
            .files
            .iter()
            .any(|f| f.source.fingerprint == removed.source.fingerprint);
        if !shared {
            let evicted = self.cache.evict_source(&removed.source.fingerprint);
            tracing::debug!(file = name, evicted, "cache entries evicted");
        }

        self.generation += 1;
        Some(removed)
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn file(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.source.name == name)
    }

    /// Column profile and baseline statistics of an ingested file.
    pub fn analyze(&self, name: &str) -> Option<FileAnalysis> {
        let entry = self.file(name)?;
        let dataset = entry.ingested.as_ref()?;
        let baseline = entry.baseline.as_ref()?;
        Some(FileAnalysis::new(&entry.source, dataset, baseline, entry.rows_skipped))
    }

    // =========================================================================
    // Profile
    // =========================================================================

    pub fn profile(&self) -> &CleaningProfile {
        &self.profile
    }

    /// Replace the profile. Returns the stages whose results are now stale.
    pub fn set_profile(&mut self, profile: CleaningProfile) -> ConfigResult<Invalidation> {
        profile.validate()?;
        let invalidation = self.profile.invalidation(&profile);
        if !invalidation.is_empty() {
            log_info(format!(
                "Profile '{}' updated: {} stages to re-run",
                profile.name,
                invalidation.stages.len()
            ));
        }
        self.profile = Arc::new(profile);
        Ok(invalidation)
    }

    /// Replace the stage at `position`.
    pub fn update_stage(&mut self, position: usize, spec: StageSpec) -> ConfigResult<Invalidation> {
        let mut edited = CleaningProfile::clone(&self.profile);
        let slot = edited
            .stages
            .get_mut(position)
            .ok_or(ConfigError::NoSuchPosition(position))?;
        *slot = spec;
        self.set_profile(edited)
    }

    /// Toggle one stage by id.
    pub fn set_stage_enabled(&mut self, stage: StageId, enabled: bool) -> ConfigResult<Invalidation> {
        let position = self
            .profile
            .position(stage)
            .ok_or(ConfigError::NoSuchPosition(self.profile.stages.len()))?;
        let mut spec = self.profile.stages[position].clone();
        spec.enabled = enabled;
        self.update_stage(position, spec)
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Run the profile over every loaded file.
    pub async fn run(&mut self, executor: &PipelineExecutor, cancel: &CancellationToken) -> PipelineResult<&RunReport> {
        if self.files.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let run = self.runs + 1;
        let scope = RunScope {
            profile: &self.profile,
            cache: &self.cache,
            lineage: &self.lineage,
            run,
            cancel,
        };
        // Files are cloned so a failed run leaves the session untouched.
        let outcome = executor.run(self.files.clone(), scope).await?;

        self.runs = run;
        self.files = outcome.files;
        self.generation += 1;
        Ok(self.last_report.insert(outcome.report))
    }

    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    pub fn anomaly_report(&self) -> Option<&AnomalyReport> {
        self.last_report.as_ref().and_then(|r| r.anomaly.as_ref())
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn lineage(&self) -> &Arc<LineageTracker> {
        &self.lineage
    }

    // =========================================================================
    // Outputs
    // =========================================================================

    /// Corpus summary of the latest run, recomputed only when the generation moved.
    pub fn summary(&self) -> Arc<CorpusSummary> {
        self.analytics
            .summary(self.generation, &self.files, self.anomaly_report())
    }

    /// Write every surviving file and `batch_summary.json` into `dir`.
    pub fn export(&self, dir: impl AsRef<Path>) -> ExportResult<BatchSummary> {
        Exporter::new(dir.as_ref()).export(&self.files, self.anomaly_report())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExclusionCause, FileStatus};
    use crate::transform::profile::{SampleRemoverParams, SizeFilterParams, StageConfig};

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

    fn small_files_profile() -> CleaningProfile {
        let mut profile = CleaningProfile::default();
        let pos = profile.position(StageId::SizeFilter).unwrap();
        profile.stages[pos] = StageSpec::new(StageConfig::SizeFilter(SizeFilterParams { min_size_mb: 0.0 }));
        profile
    }

    fn executor() -> PipelineExecutor {
        PipelineExecutor::new().with_workers(2).with_chunk_rows(16)
    }

    #[test]
    fn test_failed_ingest_is_kept_excluded() {
        let mut session = Session::default();
        let entry = session.add_file("empty.csv", b"");
        assert!(entry.ingested.is_none());
        assert_eq!(entry.status.exclusion().unwrap().stage_label(), "ingest");
        assert_eq!(session.generation(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_path_is_excluded_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.csv");
        std::fs::write(&good, flight_csv(60, 30)).unwrap();

        let mut session = Session::new(small_files_profile()).unwrap();
        let missing = session.add_path(dir.path().join("missing.csv"));
        assert!(missing.ingested.is_none());
        assert_eq!(missing.source.name, "missing.csv");
        session.add_path(&good);
        assert_eq!(session.files().len(), 2);

        let report = session.run(&executor(), &CancellationToken::new()).await.unwrap();
        assert_eq!(report.files_active, 1);

        let batch = BatchSummary::build(session.files(), session.anomaly_report());
        assert_eq!(batch.excluded.len(), 1);
        assert_eq!(batch.excluded[0].file, "missing.csv");
        assert_eq!(batch.excluded[0].cause, ExclusionCause::Ingest);
        assert!(batch.excluded[0].stage.is_none());
        assert_eq!(batch.exclusions_by_stage.get("ingest"), Some(&1));
        assert!(batch.excluded[0].reason.starts_with("Failed to read file"));
    }

    #[test]
    fn test_add_same_name_replaces() {
        let mut session = Session::default();
        session.add_file("a.csv", flight_csv(2, 20).as_bytes());
        session.add_file("a.csv", flight_csv(0, 20).as_bytes());
        assert_eq!(session.files().len(), 1);
        assert_eq!(session.files()[0].original_records(), 20);
        assert_eq!(session.files()[0].source.index, 1);
    }

    #[test]
    fn test_update_stage_reports_invalidation() {
        let mut session = Session::default();
        let pos = session.profile().position(StageId::StaticSampleRemover).unwrap();
        let spec = StageSpec::new(StageConfig::StaticSampleRemover(SampleRemoverParams {
            speed_threshold: 1.0,
            ..SampleRemoverParams::default()
        }));

        let invalidation = session.update_stage(pos, spec).unwrap();
        assert_eq!(invalidation.from_position, Some(pos));
        assert_eq!(invalidation.stages[0], StageId::StaticSampleRemover);
        assert_eq!(invalidation.stages.len(), session.profile().stages.len() - pos);
    }

    #[test]
    fn test_update_stage_out_of_range() {
        let mut session = Session::default();
        let spec = StageSpec::new(StageConfig::default_for(StageId::SizeFilter));
        assert!(matches!(
            session.update_stage(42, spec),
            Err(ConfigError::NoSuchPosition(42))
        ));
    }

    #[test]
    fn test_invalid_edit_keeps_previous_profile() {
        let mut session = Session::default();
        let pos = session.profile().position(StageId::SizeFilter).unwrap();
        let spec = StageSpec::new(StageConfig::SizeFilter(SizeFilterParams { min_size_mb: -1.0 }));
        assert!(session.update_stage(pos, spec).is_err());
        assert_eq!(*session.profile(), CleaningProfile::default());
    }

    #[tokio::test]
    async fn test_run_empty_session() {
        let mut session = Session::default();
        let result = session.run(&executor(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(PipelineError::EmptyInput)));
    }

    #[tokio::test]
    async fn test_rerun_serves_per_file_stages_from_cache() {
        let mut session = Session::new(small_files_profile()).unwrap();
        session.add_file("one.csv", flight_csv(60, 30).as_bytes());
        session.add_file("two.csv", flight_csv(55, 40).as_bytes());

        let first = session.run(&executor(), &CancellationToken::new()).await.unwrap();
        assert_eq!(first.cache_hits, 0);
        assert_eq!(first.files_active, 2);

        let second = session.run(&executor(), &CancellationToken::new()).await.unwrap();
        assert!(second.cache_hits > 0);
        assert_eq!(second.cache_misses, 0);
        assert_eq!(session.runs(), 2);
        assert_eq!(session.lineage().run_history("one.csv", 2).len(), 8);
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_files_pending() {
        let mut session = Session::new(small_files_profile()).unwrap();
        session.add_file("one.csv", flight_csv(60, 30).as_bytes());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = session.run(&executor(), &cancel).await.unwrap();
        assert!(report.cancelled);
        assert!(report.anomaly.is_none());
        assert_eq!(session.files()[0].status, FileStatus::Pending);
        assert!(session.lineage().history("one.csv").is_empty());
    }

    #[tokio::test]
    async fn test_remove_file_evicts_cache() {
        let mut session = Session::new(small_files_profile()).unwrap();
        session.add_file("one.csv", flight_csv(60, 30).as_bytes());
        session.add_file("two.csv", flight_csv(55, 40).as_bytes());
        session.run(&executor(), &CancellationToken::new()).await.unwrap();

        let before = session.cache().len();
        session.remove_file("one.csv").unwrap();
        assert!(session.cache().len() < before);
        assert!(!session.cache().is_empty());
        assert!(session.remove_file("one.csv").is_none());
    }
}
