//! Removal of individual samples at or below a speed threshold.

use std::sync::Arc;

use super::{FileStage, StageContext, AFTER_HEADER, POSITION_REQUIREMENT};
use crate::error::StageOutcome;
use crate::models::trajectory::speeds;
use crate::models::{Dataset, StageId, StageResult};
use crate::transform::profile::SampleRemoverParams;

impl FileStage for SampleRemoverParams {
    fn id(&self) -> StageId {
        StageId::StaticSampleRemover
    }

    fn required_fields(&self) -> &'static [&'static str] {
        POSITION_REQUIREMENT
    }

    fn depends_on(&self) -> &'static [StageId] {
        AFTER_HEADER
    }

    fn apply(&self, input: &Arc<Dataset>, ctx: &StageContext<'_>) -> StageOutcome<StageResult> {
        let speeds = speeds(input, self.speed_field.as_deref());
        let kept = ctx.filter_records(self.id(), input, |i, _| speeds[i] > self.speed_threshold)?;

        if kept.len() == input.len() {
            return Ok(StageResult::unchanged(Arc::clone(input)));
        }
        Ok(StageResult::transformed(input.with_records(kept), input.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{run, track};
    use super::*;

    #[test]
    fn test_default_drops_only_zero_speed() {
        let input = track(&[
            (0.0, 0.0, 0.0, 0.0),
            (1.0, 0.0, 0.0, 0.1),
            (1.0, 0.0, 0.0, 0.0),
            (2.0, 0.0, 0.0, 2.0),
        ]);
        let result = run(&SampleRemoverParams::default(), &input);

        assert_eq!(result.dataset.len(), 2);
        assert_eq!(result.diagnostics.records_removed, 2);
        assert_eq!(result.dataset.value(0, "vg").and_then(|v| v.as_f64()), Some(0.1));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let params = SampleRemoverParams {
            speed_threshold: 1.0,
            ..SampleRemoverParams::default()
        };
        let input = track(&[(0.0, 0.0, 0.0, 1.0), (1.0, 0.0, 0.0, 1.5)]);
        assert_eq!(run(&params, &input).dataset.len(), 1);
    }

    #[test]
    fn test_nothing_to_remove_is_unchanged() {
        let input = track(&[(0.0, 0.0, 0.0, 1.0), (1.0, 0.0, 0.0, 1.0)]);
        let result = run(&SampleRemoverParams::default(), &input);
        assert!(Arc::ptr_eq(&result.dataset, &input));
    }
}
