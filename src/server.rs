//! HTTP server fronting the ingestion and query pipelines.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/process` | Ingest one filing: `{ticker, year, quarter?, filing_type}` |
//! | `POST` | `/query` | Answer a question: `{query}` |
//! | `DELETE` | `/documents/{document_id}` | Remove a filing and everything derived from it |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "Error downloading filing: No 10-K filing found for TEST in 2021" } }
//! ```
//!
//! | Code | Status | Raised for |
//! |------|--------|------------|
//! | `bad_request` | 400 | invalid filing type, quarter, or empty query |
//! | `not_found` | 404 | filing not in the registry, unknown document, nothing relevant to a query |
//! | `upstream_error` | 502 | registry or language model failure |
//! | `malformed_response` | 502 | model reply in an unexpected shape |
//! | `internal` | 500 | storage failure |
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::FilingType;
use crate::pipeline::{Components, ProcessOutcome, QueryOutcome, StepError};

#[derive(Clone)]
pub struct AppState {
    pub components: Arc<Components>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/process", post(handle_process))
        .route("/query", post(handle_query))
        .route("/documents/{document_id}", delete(handle_delete))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the real components and serves on `[server].bind` until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let components = Components::from_config(config).await?;
    let app = router(AppState {
        components: Arc::new(components),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<StepError> for AppError {
    fn from(err: StepError) -> Self {
        let (status, code) = match &err.error {
            PipelineError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            PipelineError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            PipelineError::MalformedResponse(_) => (StatusCode::BAD_GATEWAY, "malformed_response"),
            PipelineError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /process ============

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    ticker: String,
    year: i32,
    #[serde(default)]
    quarter: Option<u32>,
    filing_type: String,
}

async fn handle_process(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> Result<Json<ProcessOutcome>, AppError> {
    let filing_type: FilingType = req
        .filing_type
        .parse()
        .map_err(|_| bad_request("Filing type must be either '10-K' or '10-Q'"))?;

    let outcome = state
        .components
        .process_filing(&req.ticker, req.year, req.quarter, filing_type)
        .await?;
    Ok(Json(outcome))
}

// ============ POST /query ============

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryOutcome>, AppError> {
    let outcome = state.components.answer_query(&req.query).await?;
    Ok(Json(outcome))
}

// ============ DELETE /documents/{document_id} ============

#[derive(Serialize)]
struct DeleteResponse {
    document_id: String,
    status: String,
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    state.components.delete_document(&document_id).await?;
    Ok(Json(DeleteResponse {
        document_id,
        status: "deleted".to_string(),
    }))
}
