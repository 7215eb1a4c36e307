//! Column profiling for the `analyze` report.

use serde::Serialize;

use crate::models::trajectory::extent;
use crate::models::{Dataset, FieldValue, SourceInfo, TrajectoryStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Text,
    Empty,
}

/// Descriptive statistics of a numeric column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    /// Sample standard deviation; 0 for a single value.
    pub std: f64,
    /// Values outside `[q1 - 1.5 IQR, q3 + 1.5 IQR]`.
    pub outliers: usize,
    pub outlier_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    pub missing: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<NumericSummary>,
}

/// Per-file report of the `analyze` command.
#[derive(Debug, Clone, Serialize)]
pub struct FileAnalysis {
    pub filename: String,
    pub file_size_bytes: u64,
    pub file_size_mb: f64,
    pub row_count: usize,
    pub column_count: usize,
    pub rows_skipped: usize,
    pub missing_values: usize,
    pub missing_percentage: f64,
    pub static_percentage: f64,
    /// Bounding-box diagonal of the positions in metres; `None` without position columns.
    pub extent: Option<f64>,
    pub trajectory: TrajectoryStats,
    pub columns: Vec<ColumnProfile>,
}

impl FileAnalysis {
    pub fn new(source: &SourceInfo, dataset: &Dataset, baseline: &TrajectoryStats, rows_skipped: usize) -> Self {
        let columns = profile_columns(dataset);
        let missing_values: usize = columns.iter().map(|c| c.missing).sum();
        let cells = dataset.len() * dataset.fields().len();

        Self {
            filename: source.name.clone(),
            file_size_bytes: source.raw_size,
            file_size_mb: source.raw_size as f64 / (1024.0 * 1024.0),
            row_count: dataset.len(),
            column_count: dataset.fields().len(),
            rows_skipped,
            missing_values,
            missing_percentage: percentage(missing_values, cells),
            static_percentage: baseline.static_percentage(),
            extent: extent(dataset),
            trajectory: baseline.clone(),
            columns,
        }
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn summarize(mut values: Vec<f64>) -> Option<NumericSummary> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };

    let q1 = quantile(&values, 0.25);
    let q3 = quantile(&values, 0.75);
    let iqr = q3 - q1;
    let (lower, upper) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
    let outliers = values.iter().filter(|&&v| v < lower || v > upper).count();

    Some(NumericSummary {
        min: values[0],
        max: values[values.len() - 1],
        mean,
        median: quantile(&values, 0.5),
        std,
        outliers,
        outlier_percentage: percentage(outliers, values.len()),
    })
}

/// Profile every column of a dataset.
///
/// A column is numeric when all of its non-blank values are numbers.
pub fn profile_columns(dataset: &Dataset) -> Vec<ColumnProfile> {
    dataset
        .fields()
        .iter()
        .enumerate()
        .map(|(col, name)| {
            let mut numbers = Vec::new();
            let mut missing = 0;
            let mut text = false;

            for record in dataset.records() {
                match record.get(col) {
                    Some(FieldValue::Number(n)) => numbers.push(*n),
                    Some(FieldValue::Text(_)) => text = true,
                    Some(FieldValue::Blank) | None => missing += 1,
                }
            }

            let (kind, stats) = if text {
                (ColumnKind::Text, None)
            } else if numbers.is_empty() {
                (ColumnKind::Empty, None)
            } else {
                (ColumnKind::Numeric, summarize(numbers))
            };

            ColumnProfile {
                name: name.clone(),
                kind,
                missing,
                stats,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;

    fn column(values: &[&str]) -> Dataset {
        Dataset::new(
            vec!["x".into()],
            values.iter().map(|v| Record(vec![FieldValue::parse(v)])).collect(),
        )
    }

    #[test]
    fn test_numeric_summary() {
        let profile = profile_columns(&column(&["1", "2", "3", "4", ""]));
        let col = &profile[0];
        assert_eq!(col.kind, ColumnKind::Numeric);
        assert_eq!(col.missing, 1);

        let stats = col.stats.as_ref().unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.outliers, 0);
    }

    #[test]
    fn test_iqr_outlier() {
        let profile = profile_columns(&column(&["1", "2", "2", "3", "2", "100"]));
        let stats = profile[0].stats.as_ref().unwrap();
        assert_eq!(stats.outliers, 1);
    }

    #[test]
    fn test_text_and_empty_columns() {
        assert_eq!(profile_columns(&column(&["map", "1"]))[0].kind, ColumnKind::Text);
        let empty = &profile_columns(&column(&["", ""]))[0];
        assert_eq!(empty.kind, ColumnKind::Empty);
        assert_eq!(empty.missing, 2);
    }

    #[test]
    fn test_file_analysis_missing_percentage() {
        let ds = column(&["1", "", "3", ""]);
        let source = SourceInfo {
            index: 0,
            name: "a.csv".into(),
            raw_size: 2 * 1024 * 1024,
            fingerprint: String::new(),
        };
        let analysis = FileAnalysis::new(&source, &ds, &TrajectoryStats::default(), 0);
        assert_eq!(analysis.missing_values, 2);
        assert_eq!(analysis.missing_percentage, 50.0);
        assert_eq!(analysis.file_size_mb, 2.0);
    }
}
