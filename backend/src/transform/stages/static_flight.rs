//! Static-flight detection: files whose positions never move far enough.

use std::sync::Arc;

use super::{FileStage, StageContext, AFTER_HEADER, POSITION_REQUIREMENT};
use crate::error::{SchemaError, StageOutcome};
use crate::models::trajectory::{endpoint_displacement, BoundingBox, PositionColumns};
use crate::models::{Dataset, Exclusion, ExclusionCause, StageId, StageResult};
use crate::transform::profile::{DisplacementMethod, StaticFlightParams};

pub const STATIC_FLAG: &str = "static_flight";

impl StaticFlightParams {
    fn displacement(&self, input: &Dataset, ctx: &StageContext<'_>) -> StageOutcome<f64> {
        let cols = PositionColumns::resolve(input).ok_or_else(|| SchemaError::MissingFields {
            stage: StageId::StaticFlightDetector.to_string(),
            fields: POSITION_REQUIREMENT.iter().map(|f| f.to_string()).collect(),
        })?;

        match self.method {
            DisplacementMethod::Endpoints => {
                ctx.checkpoint(StageId::StaticFlightDetector, 0, input.len())?;
                Ok(endpoint_displacement(input).unwrap_or(0.0))
            }
            DisplacementMethod::Extent => {
                let mut bounds = BoundingBox::default();
                for (chunk_no, chunk) in input.records().chunks(ctx.chunk_rows).enumerate() {
                    ctx.checkpoint(StageId::StaticFlightDetector, chunk_no * ctx.chunk_rows, input.len())?;
                    for p in chunk.iter().filter_map(|r| cols.position(r)) {
                        bounds.extend(p);
                    }
                }
                Ok(bounds.diagonal())
            }
        }
    }
}

impl FileStage for StaticFlightParams {
    fn id(&self) -> StageId {
        StageId::StaticFlightDetector
    }

    fn required_fields(&self) -> &'static [&'static str] {
        POSITION_REQUIREMENT
    }

    fn depends_on(&self) -> &'static [StageId] {
        AFTER_HEADER
    }

    fn apply(&self, input: &Arc<Dataset>, ctx: &StageContext<'_>) -> StageOutcome<StageResult> {
        let displacement = self.displacement(input, ctx)?;

        if displacement > 0.0 && displacement >= self.distance_threshold {
            return Ok(StageResult::unchanged(Arc::clone(input)));
        }

        let reason = format!(
            "Static flight: displacement {:.3} m below {:.3} m threshold",
            displacement, self.distance_threshold
        );
        if self.exclude {
            Ok(StageResult::excluded(
                Arc::clone(input),
                Exclusion::new(self.id(), ExclusionCause::Static, reason),
            ))
        } else {
            Ok(StageResult::unchanged(Arc::clone(input))
                .with_diagnostics(|d| d.with_flag(STATIC_FLAG).with_note(reason)))
        }
    }
}
