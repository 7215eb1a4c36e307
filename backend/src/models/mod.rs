//! Domain models for the flight-log cleaning pipeline.
//!
//! This module contains the core data structures used throughout the pipeline:
//!
//! - [`Dataset`] - Immutable table of trajectory samples
//! - [`StageId`] - Identity of each cleaning stage
//! - [`StageResult`] - Output of one stage on one file
//! - [`FileEntry`] - One input file and its state in the current session
//! - [`TrajectoryStats`] - Baseline kinematics of a trajectory

pub mod dataset;
pub mod trajectory;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use dataset::{Dataset, FieldValue, Record};
pub use trajectory::{TrajectoryStats, POSITION_FIELDS};

/// Canonical ordered header of a trajectory log.
pub const CANONICAL_FIELDS: [&str; 27] = [
    "sec", "nanosec", "frame_id", "position_n", "position_e", "position_d",
    "va", "alpha", "beta", "phi", "theta", "psi", "chi", "u", "v", "w", "p", "q", "r",
    "vg", "wn", "we", "chi_deg", "psi_deg", "initial_lat", "initial_long", "initial_alt",
];

pub fn canonical_fields() -> Vec<String> {
    CANONICAL_FIELDS.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Stage Identity
// =============================================================================

/// Identity of a cleaning stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    SizeFilter,
    HeaderStandardizer,
    StaticFlightDetector,
    StaticStartTrimmer,
    StaticSampleRemover,
    QuaternionColumnRemover,
    AnomalyDetector,
    Resequencer,
}

impl StageId {
    pub const ALL: [StageId; 8] = [
        StageId::SizeFilter,
        StageId::HeaderStandardizer,
        StageId::StaticFlightDetector,
        StageId::StaticStartTrimmer,
        StageId::StaticSampleRemover,
        StageId::QuaternionColumnRemover,
        StageId::AnomalyDetector,
        StageId::Resequencer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SizeFilter => "size_filter",
            Self::HeaderStandardizer => "header_standardizer",
            Self::StaticFlightDetector => "static_flight_detector",
            Self::StaticStartTrimmer => "static_start_trimmer",
            Self::StaticSampleRemover => "static_sample_remover",
            Self::QuaternionColumnRemover => "quaternion_column_remover",
            Self::AnomalyDetector => "anomaly_detector",
            Self::Resequencer => "resequencer",
        }
    }

    /// Corpus stages need every file's per-file output before they can run.
    pub fn is_corpus(&self) -> bool {
        matches!(self, Self::AnomalyDetector | Self::Resequencer)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Exclusion
// =============================================================================

/// Why a file left the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionCause {
    Ingest,
    Schema,
    SizeFilter,
    Static,
    Anomaly,
}

/// Terminal exclusion of a file, with the step that decided it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    /// Excluding stage; `None` when ingestion failed before any stage ran.
    pub stage: Option<StageId>,
    pub cause: ExclusionCause,
    pub reason: String,
}

impl Exclusion {
    pub fn new(stage: StageId, cause: ExclusionCause, reason: impl Into<String>) -> Self {
        Self {
            stage: Some(stage),
            cause,
            reason: reason.into(),
        }
    }

    pub fn ingest(reason: impl Into<String>) -> Self {
        Self {
            stage: None,
            cause: ExclusionCause::Ingest,
            reason: reason.into(),
        }
    }

    /// Label used in summaries: the stage id, or `ingest`.
    pub fn stage_label(&self) -> &'static str {
        self.stage.map(|s| s.as_str()).unwrap_or("ingest")
    }
}

// =============================================================================
// Stage Results
// =============================================================================

/// Counters and messages produced by one stage on one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub records_in: usize,
    pub records_out: usize,
    pub records_removed: usize,
    pub records_changed: usize,
    pub rows_skipped: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Diagnostics {
    pub fn passthrough(records: usize) -> Self {
        Self {
            records_in: records,
            records_out: records,
            ..Self::default()
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }
}

/// Output dataset plus diagnostics and an optional exclusion marker.
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    pub dataset: Arc<Dataset>,
    pub diagnostics: Diagnostics,
    pub exclusion: Option<Exclusion>,
}

impl StageResult {
    /// Unchanged dataset.
    pub fn unchanged(dataset: Arc<Dataset>) -> Self {
        let n = dataset.len();
        Self {
            dataset,
            diagnostics: Diagnostics::passthrough(n),
            exclusion: None,
        }
    }

    /// New dataset derived from `records_in` input rows.
    pub fn transformed(dataset: Dataset, records_in: usize) -> Self {
        let out = dataset.len();
        Self {
            dataset: Arc::new(dataset),
            diagnostics: Diagnostics {
                records_in,
                records_out: out,
                records_removed: records_in.saturating_sub(out),
                ..Diagnostics::default()
            },
            exclusion: None,
        }
    }

    pub fn excluded(dataset: Arc<Dataset>, exclusion: Exclusion) -> Self {
        let mut result = Self::unchanged(dataset);
        result.exclusion = Some(exclusion);
        result
    }

    pub fn with_diagnostics(mut self, f: impl FnOnce(Diagnostics) -> Diagnostics) -> Self {
        self.diagnostics = f(self.diagnostics);
        self
    }
}

// =============================================================================
// File Entries
// =============================================================================

/// Source identity of an input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Position in input order.
    pub index: usize,
    pub name: String,
    pub raw_size: u64,
    /// SHA-256 of the raw bytes, hex encoded.
    pub fingerprint: String,
}

/// Lifecycle of a file within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileStatus {
    /// Not processed in the latest run (new, or the run was cancelled first).
    Pending,
    Active,
    Excluded(Exclusion),
}

impl FileStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, FileStatus::Active)
    }

    pub fn exclusion(&self) -> Option<&Exclusion> {
        match self {
            FileStatus::Excluded(e) => Some(e),
            _ => None,
        }
    }
}

/// One step of a file's chain in the latest run.
#[derive(Debug, Clone)]
pub struct StageStep {
    pub stage: StageId,
    /// `None` when the stage was disabled.
    pub result: Option<Arc<StageResult>>,
    pub cache_hit: bool,
}

/// An input file and its state in the session.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub source: SourceInfo,
    /// Parsed input; `None` when ingestion failed.
    pub ingested: Option<Arc<Dataset>>,
    /// Statistics of the ingested dataset.
    pub baseline: Option<TrajectoryStats>,
    /// Malformed rows dropped during ingestion.
    pub rows_skipped: usize,
    /// Latest dataset after the stages run so far.
    pub current: Option<Arc<Dataset>>,
    /// Stage chain of the latest run, in profile order.
    pub steps: Vec<StageStep>,
    pub status: FileStatus,
    /// Name assigned by the resequencer in the latest run.
    pub output_name: Option<String>,
}

impl FileEntry {
    /// Entry for a successfully ingested file.
    pub fn ingested(source: SourceInfo, dataset: Dataset, baseline: TrajectoryStats, rows_skipped: usize) -> Self {
        let dataset = Arc::new(dataset);
        Self {
            source,
            ingested: Some(Arc::clone(&dataset)),
            baseline: Some(baseline),
            rows_skipped,
            current: Some(dataset),
            steps: Vec::new(),
            status: FileStatus::Pending,
            output_name: None,
        }
    }

    /// Entry for a file that could not be ingested.
    pub fn failed(source: SourceInfo, reason: impl Into<String>) -> Self {
        Self {
            source,
            ingested: None,
            baseline: None,
            rows_skipped: 0,
            current: None,
            steps: Vec::new(),
            status: FileStatus::Excluded(Exclusion::ingest(reason)),
            output_name: None,
        }
    }

    /// Forget the previous run's chain. Ingest failures stay excluded.
    pub fn reset(&mut self) {
        if self.ingested.is_none() {
            return;
        }
        self.current = self.ingested.clone();
        self.steps.clear();
        self.status = FileStatus::Pending;
        self.output_name = None;
    }

    pub fn original_records(&self) -> usize {
        self.ingested.as_ref().map(|d| d.len()).unwrap_or(0)
    }

    pub fn final_records(&self) -> usize {
        match self.status {
            FileStatus::Active => self.current.as_ref().map(|d| d.len()).unwrap_or(0),
            _ => 0,
        }
    }

    /// Name used for export: resequenced name, or the source name.
    pub fn export_name(&self) -> &str {
        self.output_name.as_deref().unwrap_or(&self.source.name)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str) -> SourceInfo {
        SourceInfo {
            index: 0,
            name: name.into(),
            raw_size: 10,
            fingerprint: "abc".into(),
        }
    }

    #[test]
    fn test_stage_id_serde_matches_as_str() {
        for id in StageId::ALL {
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
    }

    #[test]
    fn test_corpus_stages() {
        assert!(StageId::AnomalyDetector.is_corpus());
        assert!(StageId::Resequencer.is_corpus());
        assert!(!StageId::StaticStartTrimmer.is_corpus());
    }

    #[test]
    fn test_failed_entry_stays_excluded_on_reset() {
        let mut entry = FileEntry::failed(source("bad.csv"), "File is empty");
        entry.reset();
        let exclusion = entry.status.exclusion().unwrap();
        assert_eq!(exclusion.stage_label(), "ingest");
        assert_eq!(exclusion.cause, ExclusionCause::Ingest);
    }

    #[test]
    fn test_reset_restores_ingested_dataset() {
        let ds = Dataset::new(vec!["sec".into()], vec![Record(vec![FieldValue::Number(1.0)])]);
        let mut entry = FileEntry::ingested(source("a.csv"), ds, TrajectoryStats::default(), 0);
        entry.current = Some(Arc::new(Dataset::new(vec!["sec".into()], vec![])));
        entry.status = FileStatus::Active;
        entry.output_name = Some("test 1.csv".into());

        entry.reset();
        assert_eq!(entry.current.as_ref().unwrap().len(), 1);
        assert_eq!(entry.status, FileStatus::Pending);
        assert_eq!(entry.export_name(), "a.csv");
    }

    #[test]
    fn test_transformed_counts_removed() {
        let ds = Dataset::new(vec!["sec".into()], vec![]);
        let result = StageResult::transformed(ds, 4);
        assert_eq!(result.diagnostics.records_removed, 4);
        assert_eq!(result.diagnostics.records_out, 0);
    }
}
