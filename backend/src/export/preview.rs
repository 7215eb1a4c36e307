//! Downsampled trajectory feed for external viewers.
//!
//! The pipeline only supplies points; colour, camera and rendering belong to
//! the consumer.

use serde::Serialize;

use crate::models::trajectory::{timestamps, PositionColumns};
use crate::models::{Dataset, FileEntry};

pub const DEFAULT_MAX_POINTS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrajectoryPoint {
    /// Seconds since the first record.
    pub time: f64,
    pub position_n: f64,
    pub position_e: f64,
    pub position_d: f64,
    pub phi: Option<f64>,
    pub theta: Option<f64>,
    pub psi: Option<f64>,
    pub u: Option<f64>,
    pub v: Option<f64>,
    pub w: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisualizationFeed {
    pub file: String,
    pub output_name: String,
    pub total_points: usize,
    pub points: Vec<TrajectoryPoint>,
}

impl VisualizationFeed {
    /// Feed of an active file's cleaned dataset.
    pub fn for_entry(entry: &FileEntry, max_points: usize) -> Option<Self> {
        if !entry.status.is_active() {
            return None;
        }
        let dataset = entry.current.as_ref()?;
        Some(Self {
            file: entry.source.name.clone(),
            output_name: entry.export_name().to_string(),
            total_points: dataset.len(),
            points: downsample(dataset, max_points),
        })
    }
}

/// Every `ceil(n / max_points)`-th record with a complete position.
pub fn downsample(dataset: &Dataset, max_points: usize) -> Vec<TrajectoryPoint> {
    let Some(cols) = PositionColumns::resolve(dataset) else {
        return Vec::new();
    };
    let step = dataset.len().div_ceil(max_points.max(1)).max(1);
    let times = timestamps(dataset);
    let start = times.first().copied().unwrap_or(0.0);

    let column = |name: &str| dataset.column_index(name);
    let [phi, theta, psi, u, v, w] = ["phi", "theta", "psi", "u", "v", "w"].map(column);

    dataset
        .records()
        .iter()
        .zip(&times)
        .step_by(step)
        .filter_map(|(record, &t)| {
            let [n, e, d] = cols.position(record)?;
            let read = |idx: Option<usize>| idx.and_then(|i| record.number(i));
            Some(TrajectoryPoint {
                time: t - start,
                position_n: n,
                position_e: e,
                position_d: d,
                phi: read(phi),
                theta: read(theta),
                psi: read(psi),
                u: read(u),
                v: read(v),
                w: read(w),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldValue, Record};

    fn dataset(rows: usize) -> Dataset {
        let fields = ["sec", "position_n", "position_e", "position_d", "phi"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let records = (0..rows)
            .map(|i| {
                Record(vec![
                    FieldValue::Number(100.0 + i as f64),
                    FieldValue::Number(i as f64),
                    FieldValue::Number(0.0),
                    FieldValue::Number(-5.0),
                    FieldValue::Number(0.1),
                ])
            })
            .collect();
        Dataset::new(fields, records)
    }

    #[test]
    fn test_downsample_caps_points() {
        let points = downsample(&dataset(2500), DEFAULT_MAX_POINTS);
        assert_eq!(points.len(), 834);
        assert_eq!(points[0].time, 0.0);
        assert_eq!(points[1].time, 3.0);
        assert_eq!(points[1].phi, Some(0.1));
        assert_eq!(points[1].u, None);
    }

    #[test]
    fn test_small_dataset_kept_whole() {
        let points = downsample(&dataset(10), DEFAULT_MAX_POINTS);
        assert_eq!(points.len(), 10);
        assert_eq!(points[9].position_n, 9.0);
    }

    #[test]
    fn test_no_positions() {
        let ds = Dataset::new(vec!["sec".into()], vec![Record(vec![FieldValue::Number(1.0)])]);
        assert!(downsample(&ds, 10).is_empty());
    }
}
