//! Export of cleaned files and the batch summary.
//!
//! Each surviving dataset is written comma-separated with the canonical fields
//! first, under its resequenced name when one was assigned. The run summary
//! lands next to them as `batch_summary.json`.

pub mod preview;

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::analytics::reduction_percentage;
use crate::api::logs::{log_info_indent, log_success};
use crate::error::{ExportError, ExportResult};
use crate::models::{canonical_fields, Dataset, ExclusionCause, FileEntry, StageId};
use crate::transform::stages::AnomalyReport;

pub use preview::{downsample, TrajectoryPoint, VisualizationFeed, DEFAULT_MAX_POINTS};

pub const SUMMARY_FILE: &str = "batch_summary.json";

/// One excluded file in the batch summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedFile {
    pub file: String,
    /// Excluding stage; `None` for files that failed to load.
    pub stage: Option<StageId>,
    pub cause: ExclusionCause,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedFile {
    pub source: String,
    pub output: String,
    pub records: usize,
}

/// Per-stage exclusions and the overall data reduction of one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub files_total: usize,
    pub files_exported: usize,
    pub files_excluded: usize,
    pub exclusions_by_stage: BTreeMap<String, usize>,
    pub excluded: Vec<ExcludedFile>,
    pub records_original: usize,
    pub records_final: usize,
    pub records_removed: usize,
    pub data_reduction_percentage: f64,
    pub outputs: Vec<ExportedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<AnomalyReport>,
}

impl BatchSummary {
    pub fn build(files: &[FileEntry], anomaly: Option<&AnomalyReport>) -> Self {
        let mut exclusions_by_stage = BTreeMap::new();
        let mut excluded = Vec::new();
        for entry in files {
            if let Some(ex) = entry.status.exclusion() {
                *exclusions_by_stage.entry(ex.stage_label().to_string()).or_insert(0) += 1;
                excluded.push(ExcludedFile {
                    file: entry.source.name.clone(),
                    stage: ex.stage,
                    cause: ex.cause,
                    reason: ex.reason.clone(),
                });
            }
        }

        let outputs: Vec<ExportedFile> = files
            .iter()
            .filter(|f| f.status.is_active())
            .map(|f| ExportedFile {
                source: f.source.name.clone(),
                output: f.export_name().to_string(),
                records: f.final_records(),
            })
            .collect();

        let records_original: usize = files.iter().map(FileEntry::original_records).sum();
        let records_final: usize = files.iter().map(FileEntry::final_records).sum();

        Self {
            files_total: files.len(),
            files_exported: outputs.len(),
            files_excluded: excluded.len(),
            exclusions_by_stage,
            excluded,
            records_original,
            records_final,
            records_removed: records_original.saturating_sub(records_final),
            data_reduction_percentage: reduction_percentage(records_original, records_final),
            outputs,
            anomaly: anomaly.cloned(),
        }
    }
}

/// Field order for export: canonical fields present in `dataset`, then the rest.
pub fn export_field_order(dataset: &Dataset) -> Vec<usize> {
    let canonical = canonical_fields();
    let mut order: Vec<usize> = canonical
        .iter()
        .filter_map(|name| dataset.column_index(name))
        .collect();
    order.extend(
        dataset
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, name)| !canonical.contains(name))
            .map(|(i, _)| i),
    );
    order
}

/// Write `dataset` as comma-separated text in export field order.
pub fn write_dataset<W: std::io::Write>(dataset: &Dataset, writer: W) -> ExportResult<()> {
    let order = export_field_order(dataset);
    let mut csv = csv::Writer::from_writer(writer);

    csv.write_record(order.iter().map(|&i| dataset.fields()[i].as_str()))?;
    for record in dataset.records() {
        csv.write_record(order.iter().map(|&i| {
            record
                .get(i)
                .map(|v| v.to_string())
                .unwrap_or_default()
        }))?;
    }
    csv.flush()?;
    Ok(())
}

/// Writes cleaned files into one output directory.
#[derive(Debug, Clone)]
pub struct Exporter {
    output_dir: PathBuf,
}

impl Exporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write every active file and the batch summary.
    ///
    /// Fails before writing anything when two files resolve to the same name.
    pub fn export(&self, files: &[FileEntry], anomaly: Option<&AnomalyReport>) -> ExportResult<BatchSummary> {
        let mut names = HashSet::new();
        for entry in files.iter().filter(|f| f.status.is_active()) {
            let name = entry.export_name();
            if !names.insert(name) || name == SUMMARY_FILE {
                return Err(ExportError::DuplicateName(name.to_string()));
            }
        }

        fs::create_dir_all(&self.output_dir)?;

        for entry in files.iter().filter(|f| f.status.is_active()) {
            let Some(dataset) = entry.current.as_ref() else { continue };
            let path = self.output_dir.join(entry.export_name());
            write_dataset(dataset, fs::File::create(&path)?)?;
            log_info_indent(format!("{} -> {} ({} records)", entry.source.name, path.display(), dataset.len()), 1);
        }

        let summary = BatchSummary::build(files, anomaly);
        fs::write(
            self.output_dir.join(SUMMARY_FILE),
            serde_json::to_string_pretty(&summary)?,
        )?;

        log_success(format!(
            "Exported {} files to {} ({:.1}% data reduction)",
            summary.files_exported,
            self.output_dir.display(),
            summary.data_reduction_percentage
        ));
        Ok(summary)
    }
}
