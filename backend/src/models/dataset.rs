//! Tabular trajectory data: field values, records and datasets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One cell of a trajectory log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    Blank,
}

impl FieldValue {
    /// Parse a raw cell. Empty cells and non-finite numbers become [`FieldValue::Blank`].
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return FieldValue::Blank;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if !n.is_finite() => FieldValue::Blank,
            Ok(n) => FieldValue::Number(n),
            Err(_) => FieldValue::Text(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, FieldValue::Blank)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Blank => Ok(()),
        }
    }
}

/// One timestamped sample, positional against its dataset's field list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record(pub Vec<FieldValue>);

impl Record {
    pub fn get(&self, index: usize) -> Option<&FieldValue> {
        self.0.get(index)
    }

    pub fn number(&self, index: usize) -> Option<f64> {
        self.0.get(index).and_then(FieldValue::as_f64)
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.0
    }
}

/// Ordered records sharing one ordered field list.
///
/// A dataset is never modified after construction. Stages build a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    fields: Vec<String>,
    records: Vec<Record>,
}

impl Dataset {
    /// Build a dataset. Every record is padded or truncated to the field count.
    pub fn new(fields: Vec<String>, records: Vec<Record>) -> Self {
        let width = fields.len();
        let records = records
            .into_iter()
            .map(|Record(mut values)| {
                values.resize(width, FieldValue::Blank);
                Record(values)
            })
            .collect();
        Self { fields, records }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Value of a named field in one row.
    pub fn value(&self, row: usize, name: &str) -> Option<&FieldValue> {
        let col = self.column_index(name)?;
        self.records.get(row).and_then(|r| r.get(col))
    }

    /// Same schema, different rows.
    pub fn with_records(&self, records: Vec<Record>) -> Self {
        Self {
            fields: self.fields.clone(),
            records,
        }
    }

    /// Rows from `start` to the end.
    pub fn slice_from(&self, start: usize) -> Self {
        let start = start.min(self.records.len());
        self.with_records(self.records[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values() {
        assert_eq!(FieldValue::parse("1.5"), FieldValue::Number(1.5));
        assert_eq!(FieldValue::parse(" -3 "), FieldValue::Number(-3.0));
        assert_eq!(FieldValue::parse("8.586749e-05"), FieldValue::Number(8.586749e-05));
        assert_eq!(FieldValue::parse(""), FieldValue::Blank);
        assert_eq!(FieldValue::parse("NaN"), FieldValue::Blank);
        assert_eq!(FieldValue::parse("inf"), FieldValue::Blank);
        assert_eq!(FieldValue::parse("-Infinity"), FieldValue::Blank);
        assert_eq!(FieldValue::parse("base_link"), FieldValue::Text("base_link".into()));
        assert_eq!(FieldValue::parse("\"map\""), FieldValue::Text("map".into()));
    }

    #[test]
    fn test_display_blank_is_empty() {
        assert_eq!(FieldValue::Blank.to_string(), "");
        assert_eq!(FieldValue::Number(2.0).to_string(), "2");
        assert_eq!(FieldValue::Number(0.25).to_string(), "0.25");
    }

    #[test]
    fn test_new_pads_short_records() {
        let ds = Dataset::new(
            vec!["a".into(), "b".into()],
            vec![Record(vec![FieldValue::Number(1.0)])],
        );
        assert_eq!(ds.records()[0].values().len(), 2);
        assert!(ds.value(0, "b").is_some_and(FieldValue::is_blank));
    }

    #[test]
    fn test_slice_from() {
        let ds = Dataset::new(
            vec!["a".into()],
            (0..5).map(|i| Record(vec![FieldValue::Number(i as f64)])).collect(),
        );
        let tail = ds.slice_from(3);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail.records()[0].number(0), Some(3.0));
        assert!(ds.slice_from(10).is_empty());
    }
}
