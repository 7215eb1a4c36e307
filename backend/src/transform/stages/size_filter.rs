//! Whole-file exclusion by raw byte size.

use std::sync::Arc;

use super::{FileStage, StageContext};
use crate::error::StageOutcome;
use crate::models::{Dataset, Exclusion, ExclusionCause, StageId, StageResult};
use crate::transform::profile::SizeFilterParams;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

impl FileStage for SizeFilterParams {
    fn id(&self) -> StageId {
        StageId::SizeFilter
    }

    fn apply(&self, input: &Arc<Dataset>, ctx: &StageContext<'_>) -> StageOutcome<StageResult> {
        ctx.checkpoint(self.id(), 0, input.len())?;

        let size_mb = ctx.source.raw_size as f64 / BYTES_PER_MB;
        if size_mb < self.min_size_mb {
            let reason = format!(
                "File size {:.2} MB is below the {:.2} MB minimum",
                size_mb, self.min_size_mb
            );
            return Ok(StageResult::excluded(
                Arc::clone(input),
                Exclusion::new(self.id(), ExclusionCause::SizeFilter, reason),
            ));
        }

        Ok(StageResult::unchanged(Arc::clone(input)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{source, track};
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn apply(min_size_mb: f64, raw_size: u64) -> StageResult {
        let ds = track(&[(0.0, 0.0, 0.0, 0.0)]);
        let source = source(raw_size);
        let cancel = CancellationToken::new();
        let ctx = StageContext::new(&source, &cancel);
        SizeFilterParams { min_size_mb }.apply(&ds, &ctx).unwrap()
    }

    #[test]
    fn test_small_file_excluded() {
        let result = apply(10.0, 5 * 1024 * 1024);
        let exclusion = result.exclusion.unwrap();
        assert_eq!(exclusion.cause, ExclusionCause::SizeFilter);
        assert!(exclusion.reason.contains("5.00 MB"));
    }

    #[test]
    fn test_file_at_threshold_kept() {
        assert!(apply(10.0, 10 * 1024 * 1024).exclusion.is_none());
        assert!(apply(0.0, 0).exclusion.is_none());
    }
}
