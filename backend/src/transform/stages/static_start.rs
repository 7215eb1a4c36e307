//! Static-start trimming: drop the calibration/idle samples before motion begins.
//!
//! A window of `window` samples slides one sample at a time from the start. The
//! first window whose mean speed exceeds `speed_threshold` and whose first and
//! last valid positions are more than `position_threshold` apart marks the
//! start of motion; everything before the first fast sample in that window is
//! dropped.

use std::sync::Arc;

use super::{FileStage, StageContext, AFTER_HEADER, POSITION_REQUIREMENT};
use crate::error::StageOutcome;
use crate::models::trajectory::{distance, positions, speeds};
use crate::models::{Dataset, StageId, StageResult};
use crate::transform::profile::TrimmerParams;

pub const NO_MOTION_NOTE: &str = "no motion detected";

impl TrimmerParams {
    /// Index of the first sample to keep, or `None` when no window shows motion.
    pub fn trim_index(&self, input: &Dataset, ctx: &StageContext<'_>) -> StageOutcome<Option<usize>> {
        let n = input.len();
        if n == 0 {
            return Ok(None);
        }
        let window = self.window.min(n);
        let speeds = speeds(input, self.speed_field.as_deref());
        let positions = positions(input);

        let mut prefix = Vec::with_capacity(n + 1);
        prefix.push(0.0);
        for s in &speeds {
            prefix.push(prefix[prefix.len() - 1] + s);
        }

        // Nearest valid position at or after / at or before each index.
        let mut next_valid = vec![None; n + 1];
        for i in (0..n).rev() {
            next_valid[i] = if positions[i].is_some() { Some(i) } else { next_valid[i + 1] };
        }
        let mut prev_valid = vec![None; n];
        let mut last = None;
        for i in 0..n {
            if positions[i].is_some() {
                last = Some(i);
            }
            prev_valid[i] = last;
        }

        for start in 0..=(n - window) {
            if start % ctx.chunk_rows == 0 {
                ctx.checkpoint(StageId::StaticStartTrimmer, start, n)?;
            }
            let end = start + window - 1;

            let mean_speed = (prefix[end + 1] - prefix[start]) / window as f64;
            if mean_speed <= self.speed_threshold {
                continue;
            }

            let moved = match (next_valid[start], prev_valid[end]) {
                (Some(a), Some(b)) if a <= b => match (positions[a], positions[b]) {
                    (Some(pa), Some(pb)) => distance(pa, pb),
                    _ => 0.0,
                },
                _ => 0.0,
            };
            if moved <= self.position_threshold {
                continue;
            }

            let first_fast = (start..=end)
                .find(|&i| speeds[i] > self.speed_threshold)
                .unwrap_or(start);
            return Ok(Some(first_fast));
        }

        Ok(None)
    }
}

impl FileStage for TrimmerParams {
    fn id(&self) -> StageId {
        StageId::StaticStartTrimmer
    }

    fn required_fields(&self) -> &'static [&'static str] {
        POSITION_REQUIREMENT
    }

    fn depends_on(&self) -> &'static [StageId] {
        AFTER_HEADER
    }

    fn apply(&self, input: &Arc<Dataset>, ctx: &StageContext<'_>) -> StageOutcome<StageResult> {
        match self.trim_index(input, ctx)? {
            None => Ok(StageResult::unchanged(Arc::clone(input)).with_diagnostics(|d| d.with_note(NO_MOTION_NOTE))),
            Some(0) => Ok(StageResult::unchanged(Arc::clone(input))),
            Some(start) => {
                let trimmed = input.slice_from(start);
                Ok(StageResult::transformed(trimmed, input.len())
                    .with_diagnostics(|d| d.with_note(format!("trimmed {} static samples", start))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{run, track};
    use super::*;

    /// 50 idle samples then 10 samples moving 2 m per step at speed 5.
    fn idle_then_moving() -> Arc<Dataset> {
        let mut samples = vec![(0.0, 0.0, 0.0, 0.0); 50];
        for i in 1..=10 {
            samples.push((2.0 * i as f64, 0.0, 0.0, 5.0));
        }
        track(&samples)
    }

    #[test]
    fn test_trims_exactly_the_idle_start() {
        let input = idle_then_moving();
        let result = run(&TrimmerParams::default(), &input);

        assert_eq!(result.dataset.len(), 10);
        assert_eq!(result.diagnostics.records_removed, 50);
        assert_eq!(result.dataset.value(0, "vg").and_then(|v| v.as_f64()), Some(5.0));
    }

    #[test]
    fn test_trimming_is_idempotent() {
        let once = run(&TrimmerParams::default(), &idle_then_moving());
        let twice = run(&TrimmerParams::default(), &once.dataset);
        assert_eq!(*twice.dataset, *once.dataset);
        assert_eq!(twice.diagnostics.records_removed, 0);
    }

    #[test]
    fn test_no_motion_leaves_dataset_unchanged() {
        let input = track(&[(0.0, 0.0, 0.0, 0.0); 80]);
        let result = run(&TrimmerParams::default(), &input);
        assert!(Arc::ptr_eq(&result.dataset, &input));
        assert_eq!(result.diagnostics.notes, vec![NO_MOTION_NOTE.to_string()]);
    }

    #[test]
    fn test_fast_but_stationary_is_not_motion() {
        // Speed readings above threshold with no position change.
        let input = track(&[(1.0, 1.0, 1.0, 3.0); 60]);
        let result = run(&TrimmerParams::default(), &input);
        assert_eq!(result.dataset.len(), 60);
        assert_eq!(result.diagnostics.notes, vec![NO_MOTION_NOTE.to_string()]);
    }

    #[test]
    fn test_short_dataset_uses_single_window() {
        let input = track(&[(0.0, 0.0, 0.0, 0.0), (0.0, 0.0, 0.0, 0.0), (3.0, 0.0, 0.0, 3.0), (6.0, 0.0, 0.0, 3.0)]);
        let result = run(&TrimmerParams::default(), &input);
        assert_eq!(result.dataset.len(), 2);
    }
}
