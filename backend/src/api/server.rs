//! HTTP Server for the cleaning pipeline.
//!
//! # API Endpoints
//!
//! | Method | Path                    | Description                          |
//! |--------|-------------------------|--------------------------------------|
//! | GET    | `/health`               | Health check                         |
//! | GET    | `/api/profile/default`  | Default cleaning profile             |
//! | POST   | `/api/profile/validate` | Validate a profile document          |
//! | POST   | `/api/clean`            | Upload a batch and clean it          |
//! | GET    | `/api/logs`             | SSE stream for real-time logs        |

use axum::{
    extract::{Multipart, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, Json, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use super::logs::{log_error, log_info, LOG_BROADCASTER};
use super::types::{error_response, CleanResponse, ProfileCheck};
use crate::error::{ConfigError, ServerResult};
use crate::export::{BatchSummary, VisualizationFeed, DEFAULT_MAX_POINTS};
use crate::transform::{CleaningProfile, PipelineExecutor, Session};

type ApiError = (StatusCode, Json<Value>);

fn bad_request(message: impl AsRef<str>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(error_response(message.as_ref())))
}

fn internal(message: impl AsRef<str>) -> ApiError {
    log_error(message.as_ref());
    (StatusCode::INTERNAL_SERVER_ERROR, Json(error_response(message.as_ref())))
}

#[derive(Clone)]
struct AppState {
    executor: Arc<PipelineExecutor>,
}

/// Build the router.
pub fn router(executor: PipelineExecutor) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/profile/default", get(default_profile))
        .route("/api/profile/validate", post(validate_profile))
        .route("/api/clean", post(clean_batch))
        .route("/api/logs", get(sse_logs))
        .with_state(AppState {
            executor: Arc::new(executor),
        })
        .layer(cors)
}

/// Start the HTTP server
pub async fn start_server(port: u16, executor: PipelineExecutor) -> ServerResult<()> {
    let app = router(executor);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "flightclean server listening");
    tracing::info!("POST /api/clean  - upload trajectory logs (multipart 'file' parts, optional 'profile')");
    tracing::info!("GET  /api/logs   - SSE log stream");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "flightclean",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "clean": "POST /api/clean",
            "profile": "GET /api/profile/default",
            "logs": "GET /api/logs (SSE)"
        }
    }))
}

async fn default_profile() -> Json<CleaningProfile> {
    Json(CleaningProfile::default())
}

async fn validate_profile(body: String) -> Json<ProfileCheck> {
    let errors = match CleaningProfile::from_json(&body) {
        Ok(_) => Vec::new(),
        Err(ConfigError::Schema { errors }) => errors,
        Err(e) => vec![e.to_string()],
    };
    Json(ProfileCheck {
        valid: errors.is_empty(),
        errors,
    })
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Upload a batch of logs, clean it with the given or default profile.
async fn clean_batch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<CleanResponse>, ApiError> {
    let mut uploads: Vec<(String, Vec<u8>)> = Vec::new();
    let mut profile = CleaningProfile::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Multipart error: {}", e)))?
    {
        let part = field.name().unwrap_or("").to_string();
        match part.as_str() {
            "file" => {
                let name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| format!("upload {}.csv", uploads.len() + 1));
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Read error: {}", e)))?;
                uploads.push((name, bytes.to_vec()));
            }
            "profile" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Read error: {}", e)))?;
                profile = CleaningProfile::from_json(&text).map_err(|e| bad_request(e.to_string()))?;
            }
            _ => {}
        }
    }

    if uploads.is_empty() {
        return Err(bad_request("No file provided"));
    }

    log_info(format!("New batch: {} files, profile '{}'", uploads.len(), profile.name));

    let mut session = tokio::task::spawn_blocking(move || {
        let mut session = Session::new(profile)?;
        for (name, bytes) in &uploads {
            session.add_file(name, bytes);
        }
        Ok::<_, ConfigError>(session)
    })
    .await
    .map_err(|e| internal(format!("Ingest task failed: {}", e)))?
    .map_err(|e| bad_request(e.to_string()))?;

    // Dropping the request stops the workers at their next chunk.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let report = session
        .run(&state.executor, &cancel)
        .await
        .map_err(|e| internal(e.to_string()))?
        .clone();

    let batch = BatchSummary::build(session.files(), session.anomaly_report());
    let summary = session.summary().as_ref().clone();
    let previews = session
        .files()
        .iter()
        .filter_map(|f| VisualizationFeed::for_entry(f, DEFAULT_MAX_POINTS))
        .collect();

    Ok(Json(CleanResponse::new(report, batch, summary, previews)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validate_profile_reports_errors() {
        let Json(check) = validate_profile(r#"{"stages": [{"stage_id": "nope"}]}"#.to_string()).await;
        assert!(!check.valid);
        assert!(!check.errors.is_empty());

        let default = CleaningProfile::default().to_json().unwrap();
        let Json(check) = validate_profile(default).await;
        assert!(check.valid);
    }

    #[tokio::test]
    async fn test_default_profile_has_all_stages() {
        let Json(profile) = default_profile().await;
        assert_eq!(profile.stages.len(), 8);
    }
}
