//! Header standardization to the canonical ordered field list.
//!
//! Source columns are matched to canonical fields by exact name, then by
//! trimmed case-insensitive name, then through the alias table. Unmatched
//! canonical fields are inserted blank. Unmatched source columns are dropped
//! or, with `retain_extras`, appended after the canonical block.

use std::collections::HashSet;
use std::sync::Arc;

use super::{FileStage, StageContext};
use crate::error::StageOutcome;
use crate::models::{Dataset, FieldValue, Record, StageId, StageResult};
use crate::transform::profile::HeaderParams;

/// Resolved column layout: output field name and its source column, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMapping {
    pub columns: Vec<(String, Option<usize>)>,
    /// (source name, canonical name) pairs matched other than by exact name.
    pub renamed: Vec<(String, String)>,
    pub inserted: Vec<String>,
    pub dropped: Vec<String>,
}

impl HeaderMapping {
    fn is_identity(&self, source_len: usize) -> bool {
        self.columns.len() == source_len
            && self
                .columns
                .iter()
                .enumerate()
                .all(|(i, (_, src))| *src == Some(i))
            && self.renamed.is_empty()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl HeaderParams {
    /// Work out where each output field comes from.
    pub fn mapping(&self, fields: &[String]) -> HeaderMapping {
        let mut used = HashSet::new();
        let mut columns = Vec::with_capacity(self.canonical_fields.len());
        let mut renamed = Vec::new();
        let mut inserted = Vec::new();

        let canonical: HashSet<String> = self.canonical_fields.iter().map(|f| normalize(f)).collect();

        for target in &self.canonical_fields {
            let exact = fields
                .iter()
                .position(|f| f == target)
                .filter(|i| !used.contains(i));

            let loose = || {
                fields
                    .iter()
                    .enumerate()
                    .find(|(i, f)| !used.contains(i) && normalize(f) == normalize(target))
                    .map(|(i, _)| i)
            };

            let alias = || {
                let names = self.aliases.get(target)?;
                fields
                    .iter()
                    .enumerate()
                    .find(|(i, f)| {
                        let f = normalize(f);
                        !used.contains(i)
                            && !canonical.contains(&f)
                            && names.iter().any(|a| normalize(a) == f)
                    })
                    .map(|(i, _)| i)
            };

            match exact.or_else(loose).or_else(alias) {
                Some(i) => {
                    if fields[i] != *target {
                        renamed.push((fields[i].clone(), target.clone()));
                    }
                    used.insert(i);
                    columns.push((target.clone(), Some(i)));
                }
                None => {
                    inserted.push(target.clone());
                    columns.push((target.clone(), None));
                }
            }
        }

        let mut dropped = Vec::new();
        for (i, field) in fields.iter().enumerate() {
            if used.contains(&i) {
                continue;
            }
            if self.retain_extras {
                columns.push((field.clone(), Some(i)));
            } else {
                dropped.push(field.clone());
            }
        }

        HeaderMapping {
            columns,
            renamed,
            inserted,
            dropped,
        }
    }
}

impl FileStage for HeaderParams {
    fn id(&self) -> StageId {
        StageId::HeaderStandardizer
    }

    fn apply(&self, input: &Arc<Dataset>, ctx: &StageContext<'_>) -> StageOutcome<StageResult> {
        let mapping = self.mapping(input.fields());
        if mapping.is_identity(input.fields().len()) {
            ctx.checkpoint(self.id(), input.len(), input.len())?;
            return Ok(StageResult::unchanged(Arc::clone(input)));
        }

        let records = ctx.map_records(self.id(), input, |record| {
            Record(
                mapping
                    .columns
                    .iter()
                    .map(|(_, src)| {
                        src.and_then(|i| record.get(i).cloned())
                            .unwrap_or(FieldValue::Blank)
                    })
                    .collect(),
            )
        })?;

        let fields = mapping.columns.iter().map(|(name, _)| name.clone()).collect();
        let changed = input.len();
        let mut result = StageResult::transformed(Dataset::new(fields, records), input.len());
        result.diagnostics.records_changed = changed;

        for (from, to) in &mapping.renamed {
            result.diagnostics.notes.push(format!("mapped '{}' to '{}'", from, to));
        }
        if !mapping.inserted.is_empty() {
            result
                .diagnostics
                .notes
                .push(format!("inserted blank fields: {}", mapping.inserted.join(", ")));
        }
        if !mapping.dropped.is_empty() {
            result
                .diagnostics
                .notes
                .push(format!("dropped fields: {}", mapping.dropped.join(", ")));
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::run;
    use super::*;
    use crate::models::CANONICAL_FIELDS;

    fn dataset(fields: &[&str], rows: &[&[f64]]) -> Arc<Dataset> {
        Arc::new(Dataset::new(
            fields.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| Record(r.iter().map(|&v| FieldValue::Number(v)).collect()))
                .collect(),
        ))
    }

    #[test]
    fn test_missing_fields_inserted_in_canonical_order() {
        let input = dataset(&["position_e", "sec", "position_n"], &[&[2.0, 1.0, 3.0]]);
        let result = run(&HeaderParams::default(), &input);

        let fields: Vec<&str> = result.dataset.fields().iter().map(String::as_str).collect();
        assert_eq!(fields, CANONICAL_FIELDS.to_vec());
        assert_eq!(result.dataset.value(0, "sec"), Some(&FieldValue::Number(1.0)));
        assert_eq!(result.dataset.value(0, "position_e"), Some(&FieldValue::Number(2.0)));
        assert_eq!(result.dataset.value(0, "va"), Some(&FieldValue::Blank));
        assert_eq!(result.diagnostics.records_removed, 0);
    }

    #[test]
    fn test_extras_dropped_or_retained() {
        let input = dataset(&["sec", "Quat_1"], &[&[1.0, 0.5]]);

        let dropped = run(&HeaderParams::default(), &input);
        assert!(!dropped.dataset.has_field("Quat_1"));
        assert!(dropped.diagnostics.notes.iter().any(|n| n.contains("Quat_1")));

        let params = HeaderParams {
            retain_extras: true,
            ..HeaderParams::default()
        };
        let retained = run(&params, &input);
        assert_eq!(retained.dataset.fields().last().map(String::as_str), Some("Quat_1"));
        assert_eq!(retained.dataset.fields().len(), CANONICAL_FIELDS.len() + 1);
    }

    #[test]
    fn test_case_and_alias_matching() {
        let input = dataset(&[" SEC ", "North", "east", "pos_d"], &[&[1.0, 2.0, 3.0, 4.0]]);
        let result = run(&HeaderParams::default(), &input);

        assert_eq!(result.dataset.value(0, "sec"), Some(&FieldValue::Number(1.0)));
        assert_eq!(result.dataset.value(0, "position_n"), Some(&FieldValue::Number(2.0)));
        assert_eq!(result.dataset.value(0, "position_e"), Some(&FieldValue::Number(3.0)));
        assert_eq!(result.dataset.value(0, "position_d"), Some(&FieldValue::Number(4.0)));
    }

    #[test]
    fn test_canonical_input_unchanged() {
        let fields: Vec<&str> = CANONICAL_FIELDS.to_vec();
        let row = vec![0.0; fields.len()];
        let input = dataset(&fields, &[&row]);

        let result = run(&HeaderParams::default(), &input);
        assert!(Arc::ptr_eq(&result.dataset, &input));
        assert_eq!(result.diagnostics.records_changed, 0);
    }
}
