//! File ingestion: raw bytes to a typed [`Dataset`] with baseline statistics.
//!
//! Encoding and delimiter are auto-detected. Rows whose field count does not
//! match the header are skipped and reported as [`ProcessingError`]s; the file
//! only fails when it is empty or no row survives.

pub mod profile;

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::error::{IngestError, IngestResult, ProcessingError};
use crate::models::trajectory::{DEFAULT_SPEED_FIELD, POSITION_FIELDS};
use crate::models::{canonical_fields, Dataset, FieldValue, Record, SourceInfo, TrajectoryStats};

pub use profile::{profile_columns, ColumnKind, ColumnProfile, FileAnalysis, NumericSummary};

/// Rows per chunk between cancellation checks.
pub const DEFAULT_CHUNK_ROWS: usize = 50_000;

/// Row errors kept verbatim; the rest are only counted.
const MAX_REPORTED_ROW_ERRORS: usize = 20;

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    // Normalize charset names
    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => encoding_rs::ISO_8859_15.decode(bytes).0.into_owned(),
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        // utf-8, ascii and anything unknown: lossy UTF-8
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// SHA-256 of raw file content, hex encoded.
pub fn content_fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Source identity for a file at position `index` in the input order.
pub fn source_info(index: usize, name: impl Into<String>, bytes: &[u8]) -> SourceInfo {
    SourceInfo {
        index,
        name: name.into(),
        raw_size: bytes.len() as u64,
        fingerprint: content_fingerprint(bytes),
    }
}

/// Text where a position component is expected makes the row malformed; blanks are allowed.
fn numeric_violation(record: &Record, columns: &[usize], fields: &[String], line: usize) -> Option<ProcessingError> {
    columns.iter().find_map(|&i| match record.get(i) {
        Some(FieldValue::Text(text)) => Some(
            ProcessingError::new(line, "expected a number")
                .with_column(fields[i].as_str())
                .with_value(text.as_str()),
        ),
        _ => None,
    })
}

/// A successfully ingested file.
#[derive(Debug, Clone)]
pub struct Ingested {
    pub dataset: Dataset,
    pub baseline: TrajectoryStats,
    pub encoding: String,
    pub delimiter: char,
    /// True when the first line held data and the expected fields were assumed.
    pub headerless: bool,
    pub rows_skipped: usize,
    /// First few row errors, for display.
    pub row_errors: Vec<ProcessingError>,
}

/// Parses raw tabular text into datasets.
#[derive(Debug, Clone)]
pub struct FileIngestor {
    /// Header assumed for files without a header row.
    pub expected_fields: Vec<String>,
    pub chunk_rows: usize,
    /// Field read as instantaneous speed for the baseline statistics.
    pub speed_field: Option<String>,
}

impl Default for FileIngestor {
    fn default() -> Self {
        Self {
            expected_fields: canonical_fields(),
            chunk_rows: DEFAULT_CHUNK_ROWS,
            speed_field: Some(DEFAULT_SPEED_FIELD.to_string()),
        }
    }
}

impl FileIngestor {
    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows.max(1);
        self
    }

    /// Read and ingest a file from disk.
    pub fn ingest_path(&self, path: impl AsRef<Path>) -> IngestResult<Ingested> {
        let bytes = std::fs::read(path.as_ref())?;
        self.ingest_bytes(&bytes, &CancellationToken::new())
    }

    /// Ingest raw bytes, checking `cancel` at every chunk boundary.
    pub fn ingest_bytes(&self, bytes: &[u8], cancel: &CancellationToken) -> IngestResult<Ingested> {
        if bytes.is_empty() {
            return Err(IngestError::EmptyFile);
        }

        let encoding = detect_encoding(bytes);
        let content = decode_content(bytes, &encoding);
        let content = content.trim_start_matches('\u{feff}');
        if content.trim().is_empty() {
            return Err(IngestError::EmptyFile);
        }

        let delimiter = detect_delimiter(content);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter as u8)
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let mut rows = reader.records();

        let first = rows
            .next()
            .ok_or(IngestError::NoHeaders)?
            .map_err(|e| IngestError::Format(e.to_string()))?;
        let first_cells: Vec<String> = first
            .iter()
            .map(|s| s.trim_matches('"').trim().to_string())
            .collect();
        if first_cells.iter().all(|c| c.is_empty()) {
            return Err(IngestError::NoHeaders);
        }

        let headerless = first_cells.iter().all(|c| c.parse::<f64>().is_ok());
        let fields: Vec<String> = if !headerless {
            first_cells.clone()
        } else if first_cells.len() == self.expected_fields.len() {
            self.expected_fields.clone()
        } else {
            (0..first_cells.len()).map(|i| format!("col{}", i)).collect()
        };

        let numeric_columns: Vec<usize> = POSITION_FIELDS
            .iter()
            .filter_map(|name| fields.iter().position(|f| f == name))
            .collect();

        let mut records = Vec::new();
        let mut rows_skipped = 0;
        let mut row_errors = Vec::new();

        if headerless {
            records.push(Record(first_cells.iter().map(|c| FieldValue::parse(c)).collect()));
        }

        for (idx, row) in rows.enumerate() {
            if idx > 0 && idx % self.chunk_rows == 0 && cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            let line = match &row {
                Ok(r) => r.position().map(|p| p.line() as usize).unwrap_or(idx + 2),
                Err(_) => idx + 2,
            };
            let row = match row {
                Ok(r) => r,
                Err(e) => {
                    rows_skipped += 1;
                    if row_errors.len() < MAX_REPORTED_ROW_ERRORS {
                        row_errors.push(ProcessingError::new(line, e.to_string()));
                    }
                    continue;
                }
            };

            if row.len() == 1 && row[0].trim().is_empty() {
                continue;
            }

            if row.len() != fields.len() {
                rows_skipped += 1;
                if row_errors.len() < MAX_REPORTED_ROW_ERRORS {
                    row_errors.push(ProcessingError::new(
                        line,
                        format!("expected {} fields, found {}", fields.len(), row.len()),
                    ));
                }
                continue;
            }

            let record = Record(row.iter().map(FieldValue::parse).collect());
            if let Some(err) = numeric_violation(&record, &numeric_columns, &fields, line) {
                rows_skipped += 1;
                if row_errors.len() < MAX_REPORTED_ROW_ERRORS {
                    row_errors.push(err);
                }
                continue;
            }
            records.push(record);
        }

        if records.is_empty() {
            return Err(if rows_skipped == 0 {
                IngestError::EmptyFile
            } else {
                IngestError::Unparsable { skipped: rows_skipped }
            });
        }

        let dataset = Dataset::new(fields, records);
        let baseline = TrajectoryStats::compute(&dataset, self.speed_field.as_deref());

        Ok(Ingested {
            dataset,
            baseline,
            encoding,
            delimiter,
            headerless,
            rows_skipped,
            row_errors,
        })
    }
}
