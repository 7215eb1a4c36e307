//! Corpus-wide anomaly detection over per-file trajectory metrics.
//!
//! For every selected metric the population mean and standard deviation are
//! taken over the surviving files and each file gets its z-score
//! `(value - mean) / std`. A file is judged against the *other* surviving
//! files: it is flagged when `|value - mean| > threshold_sigma * std` with the
//! candidate left out, so a single extreme file cannot inflate the spread it
//! is measured against. When the other files have no spread at all, the full
//! corpus statistics are used instead.

use serde::Serialize;

use crate::models::TrajectoryStats;
use crate::transform::profile::{AnomalyMetric, AnomalyParams};

/// One surviving file as seen by the detector.
#[derive(Debug, Clone)]
pub struct CorpusMember<'a> {
    pub index: usize,
    pub name: &'a str,
    pub stats: &'a TrajectoryStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub metric: AnomalyMetric,
    pub mean: f64,
    pub std_dev: f64,
    pub files: usize,
}

/// Statistics a file was measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    /// Every surviving file except the candidate.
    Others,
    /// Every surviving file.
    Corpus,
}

/// One offending metric of a flagged file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricFinding {
    pub metric: AnomalyMetric,
    pub value: f64,
    pub reference: Reference,
    pub reference_mean: f64,
    pub reference_std_dev: f64,
    /// Deviation in reference standard deviations.
    pub z_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyEntry {
    pub index: usize,
    pub file: String,
    pub findings: Vec<MetricFinding>,
    pub excluded: bool,
}

impl AnomalyEntry {
    /// Largest absolute z-score among the findings.
    pub fn max_abs_z(&self) -> f64 {
        self.findings.iter().map(|f| f.z_score.abs()).fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricScore {
    pub metric: AnomalyMetric,
    /// `None` when the metric is not finite for this file.
    pub value: Option<f64>,
    /// Full-corpus z-score; `None` without a value or without corpus spread.
    pub z_score: Option<f64>,
}

/// Z-scores of one surviving file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileScores {
    pub index: usize,
    pub file: String,
    pub metrics: Vec<MetricScore>,
}

impl FileScores {
    pub fn z_score(&self, metric: AnomalyMetric) -> Option<f64> {
        self.metrics.iter().find(|m| m.metric == metric).and_then(|m| m.z_score)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub threshold_sigma: f64,
    pub files_considered: usize,
    pub metrics: Vec<MetricSummary>,
    pub scores: Vec<FileScores>,
    pub flagged: Vec<AnomalyEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AnomalyReport {
    pub fn is_flagged(&self, index: usize) -> bool {
        self.flagged.iter().any(|e| e.index == index)
    }

    pub fn scores_for(&self, index: usize) -> Option<&FileScores> {
        self.scores.iter().find(|s| s.index == index)
    }
}

fn mean_std(values: impl Iterator<Item = f64> + Clone) -> Option<(f64, f64)> {
    let n = values.clone().count();
    if n == 0 {
        return None;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let var = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    Some((mean, var.sqrt()))
}

/// Run the detector over the surviving corpus, in input order.
pub fn detect_anomalies(params: &AnomalyParams, corpus: &[CorpusMember<'_>]) -> AnomalyReport {
    let mut report = AnomalyReport {
        threshold_sigma: params.threshold_sigma,
        files_considered: corpus.len(),
        scores: corpus
            .iter()
            .map(|m| FileScores {
                index: m.index,
                file: m.name.to_string(),
                metrics: Vec::with_capacity(params.metrics.len()),
            })
            .collect(),
        ..AnomalyReport::default()
    };

    let mut findings: Vec<Vec<MetricFinding>> = vec![Vec::new(); corpus.len()];

    for &metric in &params.metrics {
        let values: Vec<Option<f64>> = corpus
            .iter()
            .map(|m| Some(metric.value(m.stats)).filter(|v| v.is_finite()))
            .collect();

        let corpus_stats = mean_std(values.iter().flatten().copied());
        if let Some((mean, std_dev)) = corpus_stats {
            report.metrics.push(MetricSummary {
                metric,
                mean,
                std_dev,
                files: values.iter().flatten().count(),
            });
        }

        for (scores, value) in report.scores.iter_mut().zip(&values) {
            let z_score = match (*value, corpus_stats) {
                (Some(v), Some((mean, std))) if std > 0.0 => Some((v - mean) / std),
                _ => None,
            };
            scores.metrics.push(MetricScore {
                metric,
                value: *value,
                z_score,
            });
        }

        if corpus.len() < params.min_files {
            continue;
        }

        for (i, value) in values.iter().enumerate() {
            let Some(value) = *value else { continue };
            let others = values
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .filter_map(|(_, v)| *v);
            let Some((others_mean, others_std)) = mean_std(others) else { continue };

            let (reference, ref_mean, ref_std) = match corpus_stats {
                Some((mean, std)) if others_std == 0.0 => (Reference::Corpus, mean, std),
                _ => (Reference::Others, others_mean, others_std),
            };
            if ref_std == 0.0 {
                continue;
            }

            if (value - ref_mean).abs() > params.threshold_sigma * ref_std {
                findings[i].push(MetricFinding {
                    metric,
                    value,
                    reference,
                    reference_mean: ref_mean,
                    reference_std_dev: ref_std,
                    z_score: (value - ref_mean) / ref_std,
                });
            }
        }
    }

    if corpus.len() < params.min_files {
        report.note = Some(format!(
            "{} surviving files, at least {} needed for anomaly detection",
            corpus.len(),
            params.min_files
        ));
    }

    report.flagged = corpus
        .iter()
        .zip(findings)
        .filter(|(_, f)| !f.is_empty())
        .map(|(member, findings)| AnomalyEntry {
            index: member.index,
            file: member.name.to_string(),
            findings,
            excluded: params.exclude,
        })
        .collect();

    report
}
