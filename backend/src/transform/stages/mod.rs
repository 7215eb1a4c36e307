//! Cleaning stages.
//!
//! Per-file stages implement [`FileStage`] on their parameter struct, so a
//! [`StageConfig`](super::StageConfig) is itself the registry entry. The two
//! corpus stages (`anomaly`, `resequence`) are plain functions over the whole
//! batch, driven by the executor after every file finished its per-file chain.

pub mod anomaly;
pub mod columns;
pub mod header;
pub mod resequence;
pub mod size_filter;
pub mod static_flight;
pub mod static_samples;
pub mod static_start;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{SchemaError, StageError, StageOutcome};
use crate::models::{Dataset, Record, SourceInfo, StageId, StageResult, POSITION_FIELDS};
use crate::parser::DEFAULT_CHUNK_ROWS;
use crate::transform::progress::{NoopReporter, ProgressReporter, ProgressUpdate};

pub use anomaly::{
    detect_anomalies, AnomalyEntry, AnomalyReport, CorpusMember, FileScores, MetricFinding, MetricScore, MetricSummary,
    Reference,
};
pub use resequence::assign_names;

/// One cleaning transformation applied to one file.
pub trait FileStage: Send + Sync {
    fn id(&self) -> StageId;

    /// Fields that must exist in the input; missing ones exclude the file.
    fn required_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Schema-affecting stages that must run first when enabled.
    fn depends_on(&self) -> &'static [StageId] {
        &[]
    }

    fn apply(&self, input: &Arc<Dataset>, ctx: &StageContext<'_>) -> StageOutcome<StageResult>;
}

/// Shared required-field list of the stages that read positions.
pub(crate) const POSITION_REQUIREMENT: &[&str] = &POSITION_FIELDS;

/// Header standardization must precede stages that read canonical names.
pub(crate) const AFTER_HEADER: &[StageId] = &[StageId::HeaderStandardizer];

/// Check that `input` carries every field `stage` needs.
pub fn check_schema(stage: &dyn FileStage, input: &Dataset) -> Result<(), SchemaError> {
    let missing: Vec<String> = stage
        .required_fields()
        .iter()
        .filter(|f| !input.has_field(f))
        .map(|f| f.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::MissingFields {
            stage: stage.id().to_string(),
            fields: missing,
        })
    }
}

/// What a stage sees besides its input: the source file, chunking and cancellation.
pub struct StageContext<'a> {
    pub source: &'a SourceInfo,
    pub chunk_rows: usize,
    cancel: &'a CancellationToken,
    progress: &'a dyn ProgressReporter,
}

static NOOP: NoopReporter = NoopReporter;

impl<'a> StageContext<'a> {
    pub fn new(source: &'a SourceInfo, cancel: &'a CancellationToken) -> Self {
        Self {
            source,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            cancel,
            progress: &NOOP,
        }
    }

    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows.max(1);
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Chunk boundary: fail on cancellation, otherwise report progress.
    pub fn checkpoint(&self, stage: StageId, rows_done: usize, rows_total: usize) -> StageOutcome<()> {
        if self.cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        self.progress.report(&ProgressUpdate {
            file: self.source.name.clone(),
            stage,
            rows_done,
            rows_total,
        });
        Ok(())
    }

    /// Keep the records for which `keep(index, record)` holds, chunk by chunk.
    pub fn filter_records<F>(&self, stage: StageId, input: &Dataset, mut keep: F) -> StageOutcome<Vec<Record>>
    where
        F: FnMut(usize, &Record) -> bool,
    {
        let total = input.len();
        let mut kept = Vec::with_capacity(total);
        for (chunk_no, chunk) in input.records().chunks(self.chunk_rows).enumerate() {
            let offset = chunk_no * self.chunk_rows;
            self.checkpoint(stage, offset, total)?;
            for (i, record) in chunk.iter().enumerate() {
                if keep(offset + i, record) {
                    kept.push(record.clone());
                }
            }
        }
        Ok(kept)
    }

    /// Rebuild every record with `map`, chunk by chunk.
    pub fn map_records<F>(&self, stage: StageId, input: &Dataset, mut map: F) -> StageOutcome<Vec<Record>>
    where
        F: FnMut(&Record) -> Record,
    {
        let total = input.len();
        let mut out = Vec::with_capacity(total);
        for (chunk_no, chunk) in input.records().chunks(self.chunk_rows).enumerate() {
            self.checkpoint(stage, chunk_no * self.chunk_rows, total)?;
            out.extend(chunk.iter().map(&mut map));
        }
        Ok(out)
    }
}
