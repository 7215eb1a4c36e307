//! Corpus analytics: per-file before/after counts, histograms of the baseline
//! metrics and the display form of the anomaly report.
//!
//! The summary is cached against the session generation and rebuilt
//! wholesale when the generation moves.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::models::{FileEntry, FileStatus, TrajectoryStats};
use crate::transform::profile::AnomalyMetric;
use crate::transform::stages::{AnomalyEntry, AnomalyReport, MetricFinding, Reference};

pub const DEFAULT_BINS: usize = 10;

/// Metrics bucketed into histograms.
pub const HISTOGRAM_METRICS: [AnomalyMetric; 4] = [
    AnomalyMetric::Duration,
    AnomalyMetric::TotalDistance,
    AnomalyMetric::MeanSpeed,
    AnomalyMetric::AltitudeChange,
];

/// Removed records over original records, in percent.
pub fn reduction_percentage(original: usize, remaining: usize) -> f64 {
    if original == 0 {
        0.0
    } else {
        original.saturating_sub(remaining) as f64 / original as f64 * 100.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub index: usize,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
    pub status: FileStatus,
    pub records_before: usize,
    pub records_after: usize,
    pub records_removed: usize,
    pub rows_skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<TrajectoryStats>,
}

impl FileSummary {
    fn from_entry(entry: &FileEntry) -> Self {
        let before = entry.original_records();
        let after = entry.final_records();
        Self {
            index: entry.source.index,
            name: entry.source.name.clone(),
            output_name: entry.output_name.clone(),
            status: entry.status.clone(),
            records_before: before,
            records_after: after,
            records_removed: before.saturating_sub(after),
            rows_skipped: entry.rows_skipped,
            baseline: entry.baseline.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Equal-width histogram; the last bin is closed on both ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub metric: AnomalyMetric,
    pub bins: Vec<HistogramBin>,
}

impl Histogram {
    pub fn build(metric: AnomalyMetric, values: &[f64], bins: usize) -> Self {
        let values: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        let (Some(lo), Some(hi)) = (
            values.iter().copied().reduce(f64::min),
            values.iter().copied().reduce(f64::max),
        ) else {
            return Self { metric, bins: Vec::new() };
        };

        if hi == lo {
            return Self {
                metric,
                bins: vec![HistogramBin {
                    lower: lo,
                    upper: hi,
                    count: values.len(),
                }],
            };
        }

        let bins = bins.max(1);
        let width = (hi - lo) / bins as f64;
        let mut counts = vec![0usize; bins];
        for v in &values {
            let slot = (((v - lo) / width) as usize).min(bins - 1);
            counts[slot] += 1;
        }

        Self {
            metric,
            bins: counts
                .into_iter()
                .enumerate()
                .map(|(i, count)| HistogramBin {
                    lower: lo + width * i as f64,
                    upper: if i + 1 == bins { hi } else { lo + width * (i + 1) as f64 },
                    count,
                })
                .collect(),
        }
    }

    pub fn total(&self) -> usize {
        self.bins.iter().map(|b| b.count).sum()
    }
}

/// A flagged file as shown to a reader.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyView {
    pub index: usize,
    pub file: String,
    pub excluded: bool,
    /// Largest absolute z-score among the findings.
    pub max_abs_z: f64,
    pub findings: Vec<MetricFinding>,
    pub message: String,
}

fn describe(finding: &MetricFinding) -> String {
    let z = finding.z_score;
    format!(
        "{} {:.3} is {:.2} standard deviations {} the {} mean {:.3}",
        finding.metric.as_str(),
        finding.value,
        z.abs(),
        if z >= 0.0 { "above" } else { "below" },
        match finding.reference {
            Reference::Others => "other files'",
            Reference::Corpus => "corpus",
        },
        finding.reference_mean
    )
}

impl AnomalyView {
    fn from_entry(entry: &AnomalyEntry) -> Self {
        let details: Vec<String> = entry.findings.iter().map(describe).collect();
        Self {
            index: entry.index,
            file: entry.file.clone(),
            excluded: entry.excluded,
            max_abs_z: entry.max_abs_z(),
            findings: entry.findings.clone(),
            message: format!("{}: {}", entry.file, details.join("; ")),
        }
    }
}

/// Flagged files, most anomalous first.
pub fn anomaly_views(report: &AnomalyReport) -> Vec<AnomalyView> {
    let mut entries: Vec<&AnomalyEntry> = report.flagged.iter().collect();
    entries.sort_by(|a, b| b.max_abs_z().total_cmp(&a.max_abs_z()).then(a.index.cmp(&b.index)));
    entries.into_iter().map(AnomalyView::from_entry).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct CorpusSummary {
    pub generation: u64,
    pub files_total: usize,
    pub files_active: usize,
    pub files_excluded: usize,
    pub files_pending: usize,
    pub records_original: usize,
    pub records_final: usize,
    pub records_removed: usize,
    pub reduction_percentage: f64,
    /// Excluded files per excluding stage (`ingest` for load failures).
    pub exclusions_by_stage: BTreeMap<String, usize>,
    pub files: Vec<FileSummary>,
    pub histograms: Vec<Histogram>,
    pub anomalies: Vec<AnomalyView>,
}

impl CorpusSummary {
    pub fn compute(generation: u64, files: &[FileEntry], anomaly: Option<&AnomalyReport>, bins: usize) -> Self {
        let summaries: Vec<FileSummary> = files.iter().map(FileSummary::from_entry).collect();

        let mut exclusions_by_stage = BTreeMap::new();
        for exclusion in files.iter().filter_map(|f| f.status.exclusion()) {
            *exclusions_by_stage
                .entry(exclusion.stage_label().to_string())
                .or_insert(0) += 1;
        }

        let survivors: Vec<&TrajectoryStats> = files
            .iter()
            .filter(|f| f.status.is_active())
            .filter_map(|f| f.baseline.as_ref())
            .collect();
        let histograms = HISTOGRAM_METRICS
            .iter()
            .map(|&metric| {
                let values: Vec<f64> = survivors.iter().map(|s| metric.value(s)).collect();
                Histogram::build(metric, &values, bins)
            })
            .collect();

        let records_original: usize = summaries.iter().map(|s| s.records_before).sum();
        let records_final: usize = summaries.iter().map(|s| s.records_after).sum();

        Self {
            generation,
            files_total: files.len(),
            files_active: files.iter().filter(|f| f.status.is_active()).count(),
            files_excluded: files.iter().filter(|f| f.status.exclusion().is_some()).count(),
            files_pending: files.iter().filter(|f| f.status == FileStatus::Pending).count(),
            records_original,
            records_final,
            records_removed: records_original.saturating_sub(records_final),
            reduction_percentage: reduction_percentage(records_original, records_final),
            exclusions_by_stage,
            files: summaries,
            histograms,
            anomalies: anomaly.map(anomaly_views).unwrap_or_default(),
        }
    }
}

/// Lazily recomputed [`CorpusSummary`].
#[derive(Debug)]
pub struct AnalyticsAggregator {
    bins: usize,
    cached: Mutex<Option<Arc<CorpusSummary>>>,
}

impl Default for AnalyticsAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_BINS)
    }
}

impl AnalyticsAggregator {
    pub fn new(bins: usize) -> Self {
        Self {
            bins: bins.max(1),
            cached: Mutex::new(None),
        }
    }

    /// The summary for `generation`, rebuilt when the cached one is older.
    pub fn summary(&self, generation: u64, files: &[FileEntry], anomaly: Option<&AnomalyReport>) -> Arc<CorpusSummary> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(summary) = cached.as_ref().filter(|s| s.generation == generation) {
            return Arc::clone(summary);
        }

        tracing::debug!(generation, files = files.len(), "recomputing corpus summary");
        let summary = Arc::new(CorpusSummary::compute(generation, files, anomaly, self.bins));
        *cached = Some(Arc::clone(&summary));
        summary
    }

    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dataset, Exclusion, ExclusionCause, FieldValue, Record, SourceInfo, StageId};

    fn entry(index: usize, name: &str, rows: usize, mean_speed: f64) -> FileEntry {
        let source = SourceInfo {
            index,
            name: name.into(),
            raw_size: 100,
            fingerprint: format!("{:064}", index),
        };
        let records = (0..rows).map(|i| Record(vec![FieldValue::Number(i as f64)])).collect();
        let baseline = TrajectoryStats {
            record_count: rows,
            mean_speed,
            duration: rows as f64,
            ..TrajectoryStats::default()
        };
        FileEntry::ingested(source, Dataset::new(vec!["sec".into()], records), baseline, 0)
    }

    #[test]
    fn test_histogram_equal_width() {
        let h = Histogram::build(AnomalyMetric::MeanSpeed, &[0.0, 1.0, 2.5, 9.0, 10.0], 10);
        assert_eq!(h.bins.len(), 10);
        assert_eq!(h.bins[0].count, 1);
        assert_eq!(h.bins[1].count, 1);
        assert_eq!(h.bins[2].count, 1);
        assert_eq!(h.bins[9].count, 2);
        assert_eq!(h.bins[9].upper, 10.0);
        assert_eq!(h.total(), 5);
    }

    #[test]
    fn test_histogram_degenerate() {
        let h = Histogram::build(AnomalyMetric::Duration, &[3.0, 3.0], 10);
        assert_eq!(h.bins.len(), 1);
        assert_eq!(h.bins[0].count, 2);
        assert!(Histogram::build(AnomalyMetric::Duration, &[], 10).bins.is_empty());
    }

    #[test]
    fn test_summary_counts_and_reduction() {
        let mut a = entry(0, "a.csv", 100, 10.0);
        a.status = FileStatus::Active;
        a.current = Some(Arc::new(Dataset::new(vec!["sec".into()], vec![Record(vec![FieldValue::Number(0.0)]); 60])));
        let mut b = entry(1, "b.csv", 100, 11.0);
        b.status = FileStatus::Excluded(Exclusion::new(StageId::StaticFlightDetector, ExclusionCause::Static, "static"));
        let c = FileEntry::failed(
            SourceInfo {
                index: 2,
                name: "c.csv".into(),
                raw_size: 0,
                fingerprint: String::new(),
            },
            "File is empty",
        );

        let summary = CorpusSummary::compute(4, &[a, b, c], None, DEFAULT_BINS);
        assert_eq!(summary.files_active, 1);
        assert_eq!(summary.files_excluded, 2);
        assert_eq!(summary.records_original, 200);
        assert_eq!(summary.records_final, 60);
        assert!((summary.reduction_percentage - 70.0).abs() < 1e-9);
        assert_eq!(summary.exclusions_by_stage["static_flight_detector"], 1);
        assert_eq!(summary.exclusions_by_stage["ingest"], 1);
        assert_eq!(summary.histograms.len(), 4);
        assert_eq!(summary.histograms[0].total(), 1);
    }

    #[test]
    fn test_anomaly_views_sorted_by_z() {
        let finding = |z: f64| MetricFinding {
            metric: AnomalyMetric::MeanSpeed,
            value: 50.0,
            reference: Reference::Others,
            reference_mean: 10.0,
            reference_std_dev: 1.0,
            z_score: z,
        };
        let report = AnomalyReport {
            flagged: vec![
                AnomalyEntry {
                    index: 0,
                    file: "low.csv".into(),
                    findings: vec![finding(-3.0)],
                    excluded: false,
                },
                AnomalyEntry {
                    index: 1,
                    file: "high.csv".into(),
                    findings: vec![finding(40.0)],
                    excluded: true,
                },
                AnomalyEntry {
                    index: 2,
                    file: "mid.csv".into(),
                    findings: vec![finding(5.0)],
                    excluded: false,
                },
            ],
            ..AnomalyReport::default()
        };

        let views = anomaly_views(&report);
        let order: Vec<&str> = views.iter().map(|v| v.file.as_str()).collect();
        assert_eq!(order, vec!["high.csv", "mid.csv", "low.csv"]);
        assert_eq!(views[0].max_abs_z, 40.0);
        assert!(views[2].message.contains("below"));
        assert!(views[0].message.starts_with("high.csv: mean_speed"));
    }

    #[test]
    fn test_aggregator_reuses_same_generation() {
        let aggregator = AnalyticsAggregator::default();
        let files = vec![entry(0, "a.csv", 10, 1.0)];

        let first = aggregator.summary(1, &files, None);
        let again = aggregator.summary(1, &[], None);
        assert!(Arc::ptr_eq(&first, &again));

        let next = aggregator.summary(2, &[], None);
        assert_eq!(next.files_total, 0);

        aggregator.invalidate();
        let rebuilt = aggregator.summary(2, &files, None);
        assert_eq!(rebuilt.files_total, 1);
    }
}
