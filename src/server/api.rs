use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::EngineError;
use crate::runtime::Dispatcher;
use crate::store::DbHandle;
use crate::store::models::{LengthRange, ModelTier, RunStatus, RunTotals, TriggerEvent, WorkflowKind};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub dispatcher: Dispatcher,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payloads ───────────────────────────────────────

/// Body of `POST /api/drafting/trigger`. Every field is optional at the
/// serde level so a missing one gets its own 400 message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    pub article_id: Option<String>,
    pub user_id: Option<String>,
    pub org_id: Option<String>,
    #[serde(alias = "workflowKind")]
    pub ingestion_type: Option<String>,
    pub length_range: Option<String>,
    #[serde(alias = "sourceCount")]
    pub number_of_blobs: Option<i64>,
    #[serde(alias = "modelTier")]
    pub model_selection: Option<String>,
    #[serde(default)]
    pub verbose: bool,
    /// Client-chosen event id; resending the same id returns the same run.
    pub event_id: Option<String>,
}

fn required_text(value: Option<String>, message: &str) -> Result<String, String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(message.to_string()),
    }
}

fn required_enum<T: FromStr<Err = String>>(value: Option<String>, message: &str) -> Result<T, String> {
    match value {
        Some(v) if !v.is_empty() => T::from_str(&v),
        _ => Err(message.to_string()),
    }
}

impl TriggerRequest {
    /// Check required fields in a fixed order and build the event.
    pub fn into_event(self) -> Result<TriggerEvent, String> {
        let article_id = required_text(self.article_id, "Article ID is required")?;
        let user_id = required_text(self.user_id, "User ID is required")?;
        let kind: WorkflowKind = required_enum(self.ingestion_type, "Ingestion type is required")?;
        let org_id = required_text(self.org_id, "Organization ID is required")?;
        let length_range: LengthRange = required_enum(self.length_range, "Length range is required")?;
        let number_of_blobs = match self.number_of_blobs {
            None | Some(0) => return Err("Number of blobs is required".to_string()),
            Some(n) => u8::try_from(n).map_err(|_| format!("Invalid number of blobs: {}", n))?,
        };
        let model_tier: ModelTier = required_enum(self.model_selection, "Model selection is required")?;

        Ok(TriggerEvent {
            id: self
                .event_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind,
            article_id,
            user_id,
            org_id,
            length_range,
            number_of_blobs,
            model_tier,
            verbose: self.verbose,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub success: bool,
    pub event_id: String,
    pub run_id: String,
    pub pipeline: WorkflowKind,
    pub article_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunStatusResponse {
    pub run_id: String,
    pub status: RunStatus,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: String,
}

impl From<RunTotals> for RunStatusResponse {
    fn from(totals: RunTotals) -> Self {
        Self {
            cost_usd: totals.cost_usd(),
            run_id: totals.run_id,
            status: totals.status,
            input_tokens: totals.input_tokens,
            output_tokens: totals.output_tokens,
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ArticleNotFound { .. } => ApiError::NotFound(err.to_string()),
            EngineError::Validation(msg) => ApiError::BadRequest(msg),
            other => {
                error!(error = %other, "failed to trigger pipeline");
                ApiError::Internal(format!("Failed to trigger pipeline: {}", other))
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/drafting/trigger", post(trigger))
        .route("/api/runs/{article_id}", get(run_status))
        .route("/health", get(health))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

async fn trigger(
    State(state): State<SharedState>,
    Json(req): Json<TriggerRequest>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let event = req.into_event().map_err(ApiError::BadRequest)?;
    let run = state.dispatcher.trigger(&event).await?;
    info!(event_id = %event.id, run_id = %run.id, pipeline = %event.kind, "pipeline triggered");

    Ok(Json(TriggerResponse {
        success: true,
        message: format!("{} pipeline triggered successfully", event.kind),
        event_id: event.id,
        run_id: run.id,
        pipeline: event.kind,
        article_id: event.article_id,
    }))
}

async fn run_status(
    State(state): State<SharedState>,
    Path(article_id): Path<String>,
) -> Result<Json<RunStatusResponse>, ApiError> {
    let lookup = article_id.clone();
    let totals = state
        .db
        .call(move |db| db.read_run_status(&lookup))
        .await
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?
        .ok_or_else(|| ApiError::NotFound(format!("No run found for article {}", article_id)))?;
    Ok(Json(totals.into()))
}
