//! Kinematics over a [`Dataset`]: timestamps, positions, speeds and summary statistics.
//!
//! Positions are north/east/down in metres; altitude is `-position_d`.
//! The timestamp of a record is `sec + nanosec * 1e-9`, or its index when
//! `sec` is not numeric.

use serde::{Deserialize, Serialize};

use super::dataset::{Dataset, Record};

pub const POSITION_FIELDS: [&str; 3] = ["position_n", "position_e", "position_d"];

/// Field holding the logged ground speed.
pub const DEFAULT_SPEED_FIELD: &str = "vg";

/// Segments shorter than this count as static.
pub const STATIC_SEGMENT_M: f64 = 0.01;

pub type Position = [f64; 3];

/// Column indices of the three position components.
#[derive(Debug, Clone, Copy)]
pub struct PositionColumns {
    n: usize,
    e: usize,
    d: usize,
}

impl PositionColumns {
    pub fn resolve(dataset: &Dataset) -> Option<Self> {
        Some(Self {
            n: dataset.column_index(POSITION_FIELDS[0])?,
            e: dataset.column_index(POSITION_FIELDS[1])?,
            d: dataset.column_index(POSITION_FIELDS[2])?,
        })
    }

    pub fn position(&self, record: &Record) -> Option<Position> {
        Some([
            record.number(self.n)?,
            record.number(self.e)?,
            record.number(self.d)?,
        ])
    }
}

pub fn distance(a: Position, b: Position) -> f64 {
    ((b[0] - a[0]).powi(2) + (b[1] - a[1]).powi(2) + (b[2] - a[2]).powi(2)).sqrt()
}

fn horizontal_distance(a: Position, b: Position) -> f64 {
    ((b[0] - a[0]).powi(2) + (b[1] - a[1]).powi(2)).sqrt()
}

/// Positions per record; `None` where a component is missing or the columns are absent.
pub fn positions(dataset: &Dataset) -> Vec<Option<Position>> {
    match PositionColumns::resolve(dataset) {
        Some(cols) => dataset.records().iter().map(|r| cols.position(r)).collect(),
        None => vec![None; dataset.len()],
    }
}

/// Timestamps in seconds per record.
pub fn timestamps(dataset: &Dataset) -> Vec<f64> {
    let sec = dataset.column_index("sec");
    let nanosec = dataset.column_index("nanosec");

    dataset
        .records()
        .iter()
        .enumerate()
        .map(|(i, r)| match sec.and_then(|c| r.number(c)) {
            Some(s) => s + nanosec.and_then(|c| r.number(c)).unwrap_or(0.0) * 1e-9,
            None => i as f64,
        })
        .collect()
}

fn segment_speed(a: Position, b: Position, ta: f64, tb: f64) -> f64 {
    let d = distance(a, b);
    let dt = tb - ta;
    if dt > 0.0 {
        d / dt
    } else {
        d
    }
}

/// Instantaneous speed per record.
///
/// A numeric `speed_field` value wins; otherwise the speed is derived from the
/// distance to the previous valid position. The first valid sample borrows
/// the speed of the segment that follows it.
pub fn speeds(dataset: &Dataset, speed_field: Option<&str>) -> Vec<f64> {
    let n = dataset.len();
    let positions = positions(dataset);
    let times = timestamps(dataset);

    let mut derived = vec![0.0; n];
    let mut prev: Option<usize> = None;
    let mut valid = Vec::new();
    for i in 0..n {
        if let Some(p) = positions[i] {
            if let Some(j) = prev {
                if let Some(q) = positions[j] {
                    derived[i] = segment_speed(q, p, times[j], times[i]);
                }
            }
            prev = Some(i);
            valid.push(i);
        }
    }
    if let &[first, second, ..] = valid.as_slice() {
        derived[first] = derived[second];
    }

    let speed_col = speed_field.and_then(|f| dataset.column_index(f));
    dataset
        .records()
        .iter()
        .zip(derived)
        .map(|(r, d)| speed_col.and_then(|c| r.number(c)).unwrap_or(d))
        .collect()
}

/// Running axis-aligned bounds of a set of positions.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    min: Position,
    max: Position,
    any: bool,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
            any: false,
        }
    }
}

impl BoundingBox {
    pub fn extend(&mut self, p: Position) {
        self.any = true;
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(p[axis]);
            self.max[axis] = self.max[axis].max(p[axis]);
        }
    }

    /// Diagonal length; 0 when empty.
    pub fn diagonal(&self) -> f64 {
        if self.any {
            distance(self.min, self.max)
        } else {
            0.0
        }
    }
}

/// Bounding-box diagonal of all valid positions.
///
/// Upper bound of the largest pairwise displacement, computed in one pass.
/// `None` when the position columns are absent.
pub fn extent(dataset: &Dataset) -> Option<f64> {
    let cols = PositionColumns::resolve(dataset)?;
    let mut bounds = BoundingBox::default();
    for p in dataset.records().iter().filter_map(|r| cols.position(r)) {
        bounds.extend(p);
    }
    Some(bounds.diagonal())
}

/// Displacement between the first and last valid positions.
pub fn endpoint_displacement(dataset: &Dataset) -> Option<f64> {
    let cols = PositionColumns::resolve(dataset)?;
    let mut valid = dataset.records().iter().filter_map(|r| cols.position(r));
    let first = match valid.next() {
        Some(p) => p,
        None => return Some(0.0),
    };
    let last = valid.last().unwrap_or(first);
    Some(distance(first, last))
}

/// Summary statistics of one trajectory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryStats {
    pub record_count: usize,
    /// Seconds between the earliest and latest timestamp.
    pub duration: f64,
    /// Summed 3D segment length in metres.
    pub total_distance: f64,
    /// Summed north/east segment length in metres.
    pub horizontal_distance: f64,
    /// Last altitude minus first altitude.
    pub altitude_change: f64,
    pub min_altitude: f64,
    pub max_altitude: f64,
    pub mean_speed: f64,
    pub segments: usize,
    pub static_samples: usize,
}

impl TrajectoryStats {
    pub fn compute(dataset: &Dataset, speed_field: Option<&str>) -> Self {
        let record_count = dataset.len();
        let times = timestamps(dataset);
        let duration = match (
            times.iter().copied().reduce(f64::min),
            times.iter().copied().reduce(f64::max),
        ) {
            (Some(lo), Some(hi)) => hi - lo,
            _ => 0.0,
        };

        let valid: Vec<Position> = positions(dataset).into_iter().flatten().collect();
        let mut total_distance = 0.0;
        let mut horizontal = 0.0;
        let mut static_samples = 0;
        for pair in valid.windows(2) {
            let d = distance(pair[0], pair[1]);
            total_distance += d;
            horizontal += horizontal_distance(pair[0], pair[1]);
            if d < STATIC_SEGMENT_M {
                static_samples += 1;
            }
        }

        let altitudes: Vec<f64> = valid.iter().map(|p| -p[2]).collect();
        let altitude_change = match (altitudes.first(), altitudes.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        };
        let min_altitude = altitudes.iter().copied().reduce(f64::min).unwrap_or(0.0);
        let max_altitude = altitudes.iter().copied().reduce(f64::max).unwrap_or(0.0);

        let speeds = speeds(dataset, speed_field);
        let mean_speed = if speeds.is_empty() {
            0.0
        } else {
            speeds.iter().sum::<f64>() / speeds.len() as f64
        };

        Self {
            record_count,
            duration,
            total_distance,
            horizontal_distance: horizontal,
            altitude_change,
            min_altitude,
            max_altitude,
            mean_speed,
            segments: valid.len().saturating_sub(1),
            static_samples,
        }
    }

    /// Share of segments shorter than [`STATIC_SEGMENT_M`], in percent.
    pub fn static_percentage(&self) -> f64 {
        if self.segments == 0 {
            0.0
        } else {
            self.static_samples as f64 / self.segments as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dataset::FieldValue;

    fn track(points: &[(f64, f64, f64, f64)]) -> Dataset {
        let fields = ["sec", "position_n", "position_e", "position_d"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let records = points
            .iter()
            .map(|&(t, n, e, d)| {
                Record(vec![
                    FieldValue::Number(t),
                    FieldValue::Number(n),
                    FieldValue::Number(e),
                    FieldValue::Number(d),
                ])
            })
            .collect();
        Dataset::new(fields, records)
    }

    #[test]
    fn test_stats_straight_climb() {
        let ds = track(&[(0.0, 0.0, 0.0, 0.0), (1.0, 3.0, 4.0, 0.0), (2.0, 3.0, 4.0, -10.0)]);
        let stats = TrajectoryStats::compute(&ds, None);

        assert_eq!(stats.record_count, 3);
        assert!((stats.duration - 2.0).abs() < 1e-9);
        assert!((stats.total_distance - 15.0).abs() < 1e-9);
        assert!((stats.horizontal_distance - 5.0).abs() < 1e-9);
        assert!((stats.altitude_change - 10.0).abs() < 1e-9);
        assert!((stats.max_altitude - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_derived_speed_uses_time_delta() {
        let ds = track(&[(0.0, 0.0, 0.0, 0.0), (2.0, 4.0, 0.0, 0.0), (4.0, 4.0, 0.0, 0.0)]);
        let s = speeds(&ds, None);
        assert_eq!(s, vec![2.0, 2.0, 0.0]);
    }

    #[test]
    fn test_speed_field_wins() {
        let fields = vec!["position_n".into(), "position_e".into(), "position_d".into(), "vg".into()];
        let records = vec![
            Record(vec![FieldValue::Number(0.0), FieldValue::Number(0.0), FieldValue::Number(0.0), FieldValue::Number(7.0)]),
            Record(vec![FieldValue::Number(1.0), FieldValue::Number(0.0), FieldValue::Number(0.0), FieldValue::Blank]),
        ];
        let ds = Dataset::new(fields, records);
        assert_eq!(speeds(&ds, Some("vg")), vec![7.0, 1.0]);
    }

    #[test]
    fn test_extent_and_endpoints() {
        let ds = track(&[(0.0, 0.0, 0.0, 0.0), (1.0, 10.0, 0.0, 0.0), (2.0, 0.0, 0.0, 0.0)]);
        assert_eq!(extent(&ds), Some(10.0));
        assert_eq!(endpoint_displacement(&ds), Some(0.0));
    }

    #[test]
    fn test_missing_position_columns() {
        let ds = Dataset::new(vec!["sec".into()], vec![Record(vec![FieldValue::Number(1.0)])]);
        assert!(extent(&ds).is_none());
        assert!(PositionColumns::resolve(&ds).is_none());
        assert_eq!(TrajectoryStats::compute(&ds, None).total_distance, 0.0);
    }
}
