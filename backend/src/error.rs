//! Error types for the flight-log cleaning pipeline.
//!
//! The hierarchy follows the propagation rules of the pipeline:
//!
//! - [`ConfigError`] - invalid profile or stage parameters; halts a run before it starts
//! - [`IngestError`] - unreadable or empty input; excludes one file
//! - [`SchemaError`] - required fields missing; excludes one file
//! - [`ProcessingError`] - one malformed row; the row is skipped and counted
//! - [`StageError`] - what a stage can report back to the executor
//! - [`PipelineError`] - top-level orchestration errors
//! - [`ExportError`] - writing cleaned files and reports
//! - [`ServerError`] - HTTP surface
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors in a cleaning profile or one of its stage parameters.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A stage parameter is out of range.
    #[error("Invalid parameter '{parameter}' for stage '{stage}': {message}")]
    InvalidParameter {
        stage: String,
        parameter: String,
        message: String,
    },

    /// The resequencer name template is unusable.
    #[error("Malformed name template '{template}': {message}")]
    MalformedTemplate { template: String, message: String },

    /// The same stage appears twice in one profile.
    #[error("Stage '{0}' appears more than once in the profile")]
    DuplicateStage(String),

    /// A stage is ordered before something it depends on.
    #[error("Stage '{stage}' must run after '{dependency}'")]
    StageOrder { stage: String, dependency: String },

    /// Profile document does not match the profile schema.
    #[error("Profile does not match schema: {errors:?}")]
    Schema { errors: Vec<String> },

    /// A stage position outside the profile.
    #[error("No stage at position {0}")]
    NoSuchPosition(usize),

    /// JSON error while reading a profile.
    #[error("Profile JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error while reading a profile.
    #[error("Profile IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Ingest Errors
// =============================================================================

/// Errors that prevent a file from being ingested at all.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// File has no content.
    #[error("File is empty")]
    EmptyFile,

    /// No header row found.
    #[error("No header row found")]
    NoHeaders,

    /// Every data row was malformed.
    #[error("No parsable rows ({skipped} rows skipped)")]
    Unparsable { skipped: usize },

    /// Tabular reader failure.
    #[error("Invalid tabular format: {0}")]
    Format(String),

    /// Ingestion was cancelled at a chunk boundary.
    #[error("Ingestion cancelled")]
    Cancelled,
}

// =============================================================================
// Schema Errors
// =============================================================================

/// Fields a stage needs are absent and cannot be mapped.
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    /// Required fields missing.
    #[error("Stage '{stage}' requires missing fields: {}", fields.join(", "))]
    MissingFields { stage: String, fields: Vec<String> },
}

// =============================================================================
// Row-level Processing Errors
// =============================================================================

/// A single malformed row. Absorbed locally: the row is skipped and counted.
#[derive(Debug, Clone)]
pub struct ProcessingError {
    pub line: usize,
    pub column: Option<String>,
    pub value: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.column, &self.value) {
            (Some(col), Some(val)) => {
                write!(f, "Line {}, column '{}' (value '{}'): {}", self.line, col, val, self.message)
            }
            (Some(col), None) => {
                write!(f, "Line {}, column '{}': {}", self.line, col, self.message)
            }
            _ => write!(f, "Line {}: {}", self.line, self.message),
        }
    }
}

impl std::error::Error for ProcessingError {}

impl ProcessingError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column: None,
            value: None,
            message: message.into(),
        }
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

// =============================================================================
// Stage Errors
// =============================================================================

/// Conditions a stage reports instead of a result.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// Cancellation observed at a chunk boundary.
    #[error("Stage cancelled")]
    Cancelled,

    /// Input lacks the fields the stage reads.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

// =============================================================================
// Export Errors
// =============================================================================

/// Errors while writing cleaned files and the batch report.
#[derive(Debug, Error)]
pub enum ExportError {
    /// IO error.
    #[error("Export IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer error.
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON error.
    #[error("Report JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Two surviving files resolved to the same output name.
    #[error("Duplicate output name: {0}")]
    DuplicateName(String),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// Per-file problems never show up here: they exclude the file and are
/// recorded in its status. Only configuration problems and infrastructure
/// failures abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Ingest error surfaced by a direct ingest call.
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Export error.
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker task panicked or was aborted.
    #[error("Worker failure: {0}")]
    Worker(String),

    /// No files in the session.
    #[error("No files to process")]
    EmptyInput,
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Pipeline error.
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// IO error (bind, accept).
    #[error("Server IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for ingestion.
pub type IngestResult<T> = Result<T, IngestError>;

/// Result type for stage application.
pub type StageOutcome<T> = Result<T, StageError>;

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let ingest_err = IngestError::EmptyFile;
        let pipeline_err: PipelineError = ingest_err.into();
        assert!(pipeline_err.to_string().contains("empty"));

        let config_err = ConfigError::DuplicateStage("resequencer".into());
        let pipeline_err: PipelineError = config_err.into();
        assert!(pipeline_err.to_string().contains("resequencer"));
    }

    #[test]
    fn test_schema_error_lists_fields() {
        let err = SchemaError::MissingFields {
            stage: "static_flight_detector".into(),
            fields: vec!["position_n".into(), "position_e".into()],
        };
        let stage_err: StageError = err.into();
        let msg = stage_err.to_string();
        assert!(msg.contains("position_n, position_e"));
        assert!(msg.contains("static_flight_detector"));
    }

    #[test]
    fn test_processing_error_format() {
        let err = ProcessingError::new(5, "expected 27 fields, found 3")
            .with_column("position_n")
            .with_value("abc");

        let msg = err.to_string();
        assert!(msg.contains("Line 5"));
        assert!(msg.contains("column 'position_n'"));
        assert!(msg.contains("value 'abc'"));
    }

    #[test]
    fn test_invalid_parameter_format() {
        let err = ConfigError::InvalidParameter {
            stage: "size_filter".into(),
            parameter: "min_size_mb".into(),
            message: "must not be negative".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("min_size_mb"));
        assert!(msg.contains("size_filter"));
    }
}
