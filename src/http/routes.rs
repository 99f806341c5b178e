//! Route handlers and request schemas.

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{check_length, ApiError, FieldError, Validate, ValidatedJson};
use crate::services::{
    FeedbackRecorder, FlipGenerator, FlipResult, NoopFeedbackRecorder, Submission,
    UnconfiguredGenerator, Vote,
};

/// Longest accepted user or edited text, in characters.
pub const MAX_TEXT_CHARS: usize = 4_000;

/// Longest accepted model id, in characters.
pub const MAX_MODEL_ID_CHARS: usize = 128;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<dyn FlipGenerator>,
    pub feedback: Arc<dyn FeedbackRecorder>,
}

impl AppState {
    pub fn new(generator: Arc<dyn FlipGenerator>, feedback: Arc<dyn FeedbackRecorder>) -> Self {
        Self {
            generator,
            feedback,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Arc::new(UnconfiguredGenerator), Arc::new(NoopFeedbackRecorder))
    }
}

/// Body of `POST /generate_response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub text: String,
    pub submission: Submission,
}

/// Body of `POST /feedback/thumb`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbFeedback {
    pub submission: Submission,
    pub vote: Vote,
    pub voted_at: DateTime<Utc>,
}

/// Body of `POST /feedback/edit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditFeedback {
    pub submission: Submission,
    pub edited_text: String,
    pub edited_at: DateTime<Utc>,
}

fn validate_submission(errors: &mut Vec<FieldError>, submission: &Submission) {
    check_length(errors, "submission.input_text", &submission.input_text, MAX_TEXT_CHARS);
    check_length(errors, "submission.model_id", &submission.model_id, MAX_MODEL_ID_CHARS);
}

impl Validate for GenerateRequest {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_length(&mut errors, "text", &self.text, MAX_TEXT_CHARS);
        validate_submission(&mut errors, &self.submission);
        errors
    }
}

impl Validate for ThumbFeedback {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        validate_submission(&mut errors, &self.submission);
        errors
    }
}

impl Validate for EditFeedback {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        check_length(&mut errors, "edited_text", &self.edited_text, MAX_TEXT_CHARS);
        validate_submission(&mut errors, &self.submission);
        errors
    }
}

/// Build the application routes, without admission control.
///
/// Body size is enforced by [`super::RequestBodyGuard`], so the extractor
/// limit is disabled here.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/generate_response", post(generate_response))
        .route("/feedback/thumb", post(feedback_thumb))
        .route("/feedback/edit", post(feedback_edit))
        .fallback(not_found)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn generate_response(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<GenerateRequest>,
) -> Result<Json<FlipResult>, ApiError> {
    debug!(
        submission_id = %request.submission.id,
        model = %request.submission.model_id,
        "Generating flipped response"
    );

    let result = state
        .generator
        .generate(&request.submission, &request.text)
        .await?;

    info!(submission_id = %request.submission.id, "Generated flipped response");
    Ok(Json(result))
}

async fn feedback_thumb(
    State(state): State<AppState>,
    ValidatedJson(feedback): ValidatedJson<ThumbFeedback>,
) -> Result<Json<Value>, ApiError> {
    state
        .feedback
        .record_thumb(&feedback.submission, feedback.vote, feedback.voted_at)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn feedback_edit(
    State(state): State<AppState>,
    ValidatedJson(feedback): ValidatedJson<EditFeedback>,
) -> Result<Json<Value>, ApiError> {
    state
        .feedback
        .record_edit(&feedback.submission, &feedback.edited_text, feedback.edited_at)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

async fn method_not_allowed() -> ApiError {
    ApiError::Request {
        status: StatusCode::METHOD_NOT_ALLOWED,
        message: "Method not allowed".to_string(),
    }
}
