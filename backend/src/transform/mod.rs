//! Cleaning pipeline.
//!
//! - Profile: ordered, typed stage configuration
//! - Stages: the eight cleaning transformations
//! - Executor: two-phase batch execution on a bounded worker pool
//! - Session: files, profile, cache and lineage across runs

pub mod executor;
pub mod profile;
pub mod progress;
pub mod session;
pub mod stages;

pub use executor::{PipelineExecutor, RunOutcome, RunReport, RunScope};
pub use profile::{
    AnomalyMetric, AnomalyParams, CleaningProfile, ColumnRemoverParams, DisplacementMethod, HeaderParams,
    Invalidation, ResequencerParams, SampleRemoverParams, SizeFilterParams, StageConfig, StageSpec,
    StaticFlightParams, TrimmerParams,
};
pub use progress::{ProgressReporter, ProgressUpdate, TracingReporter};
pub use session::Session;
pub use stages::{AnomalyReport, FileStage, StageContext};
