//! # Flightclean - batch cleaning of flight trajectory logs
//!
//! Flightclean runs a configurable chain of cleaning stages over a batch of
//! tabular flight logs, caches every intermediate result, records the lineage
//! of each file and reports corpus-level anomalies.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────────┐     ┌─────────────┐
//! │  CSV logs   │────▶│   Parser    │────▶│ Per-file stages  │────▶│   Corpus    │
//! │ (ISO/UTF8)  │     │ (auto-enc)  │     │ (worker pool,    │     │  anomaly +  │
//! └─────────────┘     └─────────────┘     │  cached, traced) │     │ resequence  │
//!                                         └──────────────────┘     └──────┬──────┘
//!                                                                        ▼
//!                                                 cleaned CSV + batch_summary.json
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use flightclean::{CleaningProfile, PipelineExecutor, Session};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut session = Session::new(CleaningProfile::default()).unwrap();
//!     session.add_path("flight_01.csv");
//!     let report = session.run(&PipelineExecutor::new(), &CancellationToken::new()).await.unwrap();
//!     println!("{} files survived", report.files_active);
//!     session.export("cleaned").unwrap();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Datasets, file entries, trajectory kinematics
//! - [`parser`] - Ingestion with encoding/delimiter detection, column profiling
//! - [`transform`] - Profiles, stages, executor and session
//! - [`cache`] - Fingerprint-keyed stage result cache
//! - [`lineage`] - Per-file audit trail
//! - [`analytics`] - Corpus summary and histograms
//! - [`export`] - Cleaned files, batch summary, visualization feed
//! - [`validation`] - Profile schema validation
//! - [`api`] - HTTP API server

// Core modules
pub mod error;
pub mod models;

// Parsing
pub mod parser;

// Cleaning
pub mod transform;

// Caching and audit
pub mod cache;
pub mod lineage;

// Outputs
pub mod analytics;
pub mod export;

// Validation
pub mod validation;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, ExportError, IngestError, PipelineError, ProcessingError, SchemaError, ServerError, StageError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    canonical_fields, Dataset, Diagnostics, Exclusion, ExclusionCause, FieldValue, FileEntry, FileStatus, Record,
    SourceInfo, StageId, StageResult, TrajectoryStats, CANONICAL_FIELDS,
};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use parser::{
    decode_content, detect_delimiter, detect_encoding, profile_columns, FileAnalysis, FileIngestor, Ingested,
};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::{
    AnomalyReport, CleaningProfile, Invalidation, PipelineExecutor, RunReport, Session, StageConfig, StageSpec,
};

// =============================================================================
// Re-exports - Cache and lineage
// =============================================================================

pub use cache::{chain_fingerprint, CacheManager, CacheStats};
pub use lineage::{LineageAction, LineageEntry, LineageTracker};

// =============================================================================
// Re-exports - Outputs
// =============================================================================

pub use analytics::{AnalyticsAggregator, CorpusSummary};
pub use export::{BatchSummary, Exporter, VisualizationFeed};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{is_valid_profile, validate_profile};

// Server
pub mod server {
    pub use crate::api::server::{router, start_server};
}
