//! REST API payloads.

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::analytics::CorpusSummary;
use crate::export::{BatchSummary, VisualizationFeed};
use crate::transform::RunReport;

/// Response to a cleaning request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanResponse {
    pub job_id: String,

    /// "ready" when every file survived, "warning" when some were excluded.
    pub status: String,

    pub report: RunReport,

    pub batch: BatchSummary,

    pub summary: CorpusSummary,

    /// Downsampled trajectories of the surviving files.
    pub previews: Vec<VisualizationFeed>,
}

impl CleanResponse {
    pub fn new(report: RunReport, batch: BatchSummary, summary: CorpusSummary, previews: Vec<VisualizationFeed>) -> Self {
        let status = if batch.files_excluded == 0 { "ready" } else { "warning" };
        Self {
            job_id: report.run_id.to_string(),
            status: status.to_string(),
            report,
            batch,
            summary,
            previews,
        }
    }
}

/// Outcome of a profile validation request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCheck {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "jobId": Uuid::new_v4().to_string(),
        "status": "error",
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_shape() {
        let body = error_response("No file provided");
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "No file provided");
        assert!(body["jobId"].as_str().is_some());
    }
}
