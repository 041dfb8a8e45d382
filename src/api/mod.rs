//! REST API for campaign lifecycle control
//!
//! Thin adapter over [`BroadcastEngine`]: every handler maps one request to
//! one engine call and the engine's error to an HTTP status.

pub mod server;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audience::Audience;
use crate::engine::BroadcastEngine;
use crate::error::Error;
use crate::metrics;
use crate::models::{BroadcastDraft, CampaignStatus};

pub use server::{ApiServer, AppState, ServerError};

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Campaign status plus derived progress
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: CampaignStatus,
    pub progress_percentage: f64,
}

impl From<CampaignStatus> for StatusResponse {
    fn from(status: CampaignStatus) -> Self {
        let progress_percentage = status.progress_percentage();
        Self {
            status,
            progress_percentage,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub at: DateTime<Utc>,
}

/// Inbound reply notification from the messaging gateway
#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub channel_id: String,
    pub from: String,
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ReplyResponse {
    pub address: String,
}

/// Either a pasted text block or an explicit token list
#[derive(Debug, Deserialize)]
pub struct NormalizeRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tokens: Option<Vec<String>>,
}

// ============================================================================
// Error mapping
// ============================================================================

/// HTTP status for an engine error
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::Validation(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidTransition { .. } | Error::ConcurrencyConflict(_) => StatusCode::CONFLICT,
        Error::LimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn respond<T: Serialize>(endpoint: &str, ok: StatusCode, result: crate::error::Result<T>) -> Response {
    let (status, response) = match result {
        Ok(data) => (ok, Json(ApiResponse::success(data)).into_response()),
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::error!(endpoint, error = %e, "Request failed");
            } else {
                tracing::debug!(endpoint, error = %e, "Request rejected");
            }
            (status, Json(ErrorResponse::new(e.to_string())).into_response())
        }
    };
    metrics::record_api_request(endpoint, status.as_u16());
    (status, response).into_response()
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/api/health", get(health_check))
        .route("/api/metrics", get(metrics_text))
        // Campaign endpoints
        .route("/api/campaigns", get(list_campaigns).post(create_campaign))
        .route("/api/campaigns/{id}", get(get_campaign))
        .route("/api/campaigns/{id}/schedule", post(schedule_campaign))
        .route("/api/campaigns/{id}/start", post(start_campaign))
        .route("/api/campaigns/{id}/pause", post(pause_campaign))
        .route("/api/campaigns/{id}/resume", post(resume_campaign))
        .route("/api/campaigns/{id}/cancel", post(cancel_campaign))
        // Inbound events and tools
        .route("/api/replies", post(record_reply))
        .route("/api/audience/normalize", post(normalize_audience))
        .with_state(state)
}

// ============================================================================
// Health Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();

    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
    }))
}

/// Prometheus text exposition
async fn metrics_text() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::new(e.to_string())),
        )
            .into_response(),
    }
}

// ============================================================================
// Campaign Handlers
// ============================================================================

async fn create_campaign(
    State(state): State<AppState>,
    Json(draft): Json<BroadcastDraft>,
) -> Response {
    let result = state.engine.create_campaign(draft).await;
    respond("create_campaign", StatusCode::CREATED, result)
}

async fn list_campaigns(State(state): State<AppState>) -> Response {
    let result = state
        .engine
        .list()
        .map(|all| all.into_iter().map(StatusResponse::from).collect::<Vec<_>>());
    respond("list_campaigns", StatusCode::OK, result)
}

async fn get_campaign(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let result = state.engine.status(id).map(StatusResponse::from);
    respond("get_campaign", StatusCode::OK, result)
}

async fn schedule_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ScheduleRequest>,
) -> Response {
    let result = state.engine.schedule(id, request.at).await;
    respond("schedule_campaign", StatusCode::OK, result.map(StatusResponse::from))
}

async fn start_campaign(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let result = state.engine.start(id).await;
    respond("start_campaign", StatusCode::OK, result.map(StatusResponse::from))
}

async fn pause_campaign(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let result = state.engine.pause(id).await;
    respond("pause_campaign", StatusCode::OK, result.map(StatusResponse::from))
}

async fn resume_campaign(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let result = state.engine.resume(id).await;
    respond("resume_campaign", StatusCode::OK, result.map(StatusResponse::from))
}

async fn cancel_campaign(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    let result = state.engine.cancel(id).await;
    respond("cancel_campaign", StatusCode::OK, result.map(StatusResponse::from))
}

// ============================================================================
// Replies and audience tools
// ============================================================================

async fn record_reply(State(state): State<AppState>, Json(request): Json<ReplyRequest>) -> Response {
    let at = request.at.unwrap_or_else(Utc::now);
    let result = state
        .engine
        .on_reply(&request.channel_id, &request.from, at)
        .map(|address| ReplyResponse {
            address: address.to_string(),
        });
    respond("record_reply", StatusCode::OK, result)
}

async fn normalize_audience(
    State(state): State<AppState>,
    Json(request): Json<NormalizeRequest>,
) -> Response {
    let result = normalize_with(&state.engine, request);
    respond("normalize_audience", StatusCode::OK, result)
}

fn normalize_with(engine: &BroadcastEngine, request: NormalizeRequest) -> crate::error::Result<Audience> {
    let normalizer = engine.normalizer();
    match (request.text, request.tokens) {
        (Some(text), None) => Ok(normalizer.normalize_text(&text)),
        (None, Some(tokens)) => Ok(normalizer.normalize_list(&tokens)),
        _ => Err(Error::validation("Provide exactly one of `text` or `tokens`")),
    }
}

// ============================================================================
// Tests
// ============================================================================
