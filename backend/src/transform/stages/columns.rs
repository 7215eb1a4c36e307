//! Removal of a configured set of columns (quaternion components by default).

use std::sync::Arc;

use super::{FileStage, StageContext, AFTER_HEADER};
use crate::error::StageOutcome;
use crate::models::{Dataset, Record, StageId, StageResult};
use crate::transform::profile::ColumnRemoverParams;

impl FileStage for ColumnRemoverParams {
    fn id(&self) -> StageId {
        StageId::QuaternionColumnRemover
    }

    fn depends_on(&self) -> &'static [StageId] {
        AFTER_HEADER
    }

    fn apply(&self, input: &Arc<Dataset>, ctx: &StageContext<'_>) -> StageOutcome<StageResult> {
        let keep: Vec<usize> = (0..input.fields().len())
            .filter(|&i| !self.columns.contains(&input.fields()[i]))
            .collect();

        if keep.len() == input.fields().len() {
            ctx.checkpoint(self.id(), input.len(), input.len())?;
            return Ok(StageResult::unchanged(Arc::clone(input)));
        }

        let removed: Vec<&str> = input
            .fields()
            .iter()
            .filter(|f| self.columns.contains(f))
            .map(String::as_str)
            .collect();

        let records = ctx.map_records(self.id(), input, |record| {
            Record(keep.iter().filter_map(|&i| record.get(i).cloned()).collect())
        })?;
        let fields = keep.iter().map(|&i| input.fields()[i].clone()).collect();

        Ok(StageResult::transformed(Dataset::new(fields, records), input.len())
            .with_diagnostics(|d| d.with_note(format!("removed columns: {}", removed.join(", ")))))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::run;
    use super::*;
    use crate::models::FieldValue;

    fn input(fields: &[&str]) -> Arc<Dataset> {
        let row = Record(fields.iter().enumerate().map(|(i, _)| FieldValue::Number(i as f64)).collect());
        Arc::new(Dataset::new(fields.iter().map(|s| s.to_string()).collect(), vec![row]))
    }

    #[test]
    fn test_removes_present_columns() {
        let ds = input(&["sec", "Quat_1", "position_n", "quat_valid"]);
        let result = run(&ColumnRemoverParams::default(), &ds);

        assert_eq!(result.dataset.fields(), &["sec".to_string(), "position_n".to_string()]);
        assert_eq!(result.dataset.value(0, "position_n"), Some(&FieldValue::Number(2.0)));
        assert_eq!(result.diagnostics.records_removed, 0);
        assert!(result.diagnostics.notes[0].contains("Quat_1, quat_valid"));
    }

    #[test]
    fn test_absent_columns_are_a_no_op() {
        let ds = input(&["sec", "position_n"]);
        let result = run(&ColumnRemoverParams::default(), &ds);
        assert!(Arc::ptr_eq(&result.dataset, &ds));
        assert!(result.diagnostics.notes.is_empty());
    }
}
