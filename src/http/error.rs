//! JSON error envelope and request validation.
//!
//! Every error response has the shape
//! `{"error": {"code", "message", "request_id", "details"?}}`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

use super::middleware::current_request_id;
use crate::services::{FeedbackError, GenerationError};

const GENERIC_INTERNAL_MESSAGE: &str = "An internal error occurred";

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Request-scoped error rendered as the JSON envelope.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Body larger than the configured limit
    #[error("request body exceeds {limit_bytes} bytes")]
    PayloadTooLarge { limit_bytes: u64 },

    /// Rate limit exceeded for the request's scope
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The rate limiter could not reach a decision
    #[error("rate limiter unavailable")]
    LimiterUnavailable,

    /// Malformed JSON or field violations
    #[error("request validation failed")]
    Validation(Vec<FieldError>),

    /// A 4xx raised by a handler
    #[error("{message}")]
    Request { status: StatusCode, message: String },

    /// No route matched
    #[error("resource not found")]
    NotFound,

    /// A downstream dependency is temporarily unavailable
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Anything else; the text is logged, never returned
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Request {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::LimiterUnavailable | ApiError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Request { status, .. } => *status,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::PayloadTooLarge { .. } => "payload_too_large",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::LimiterUnavailable => "rate_limiter_unavailable",
            ApiError::Validation(_) => "validation_error",
            ApiError::Request { status, .. } if status.is_server_error() => "internal_error",
            ApiError::Request { .. } => "request_error",
            ApiError::NotFound => "not_found",
            ApiError::Unavailable(_) => "service_unavailable",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::PayloadTooLarge { limit_bytes } => {
                format!("Request body exceeds the limit of {} bytes", limit_bytes)
            }
            ApiError::RateLimited { .. } => "Rate limit exceeded, please retry later".to_string(),
            ApiError::LimiterUnavailable => "Rate limiter temporarily unavailable".to_string(),
            ApiError::Validation(_) => "Request validation failed".to_string(),
            ApiError::Request { status, message } if !status.is_server_error() => message.clone(),
            ApiError::NotFound => "Resource not found".to_string(),
            ApiError::Unavailable(_) => "Service temporarily unavailable".to_string(),
            ApiError::Request { .. } | ApiError::Internal(_) => GENERIC_INTERNAL_MESSAGE.to_string(),
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::PayloadTooLarge { limit_bytes } => Some(json!({ "limit_bytes": limit_bytes })),
            ApiError::RateLimited { retry_after_secs } => {
                Some(json!({ "retry_after_seconds": retry_after_secs }))
            }
            ApiError::Validation(fields) => Some(json!(fields)),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let request_id = current_request_id();

        if status.is_server_error() {
            error!(request_id = ?request_id, status = status.as_u16(), error = %self, "Request failed");
        }

        let mut error = json!({
            "code": self.code(),
            "message": self.public_message(),
            "request_id": request_id,
        });
        if let Some(details) = self.details() {
            error["details"] = details;
        }

        let mut response = (status, Json(json!({ "error": error }))).into_response();

        if let ApiError::RateLimited { retry_after_secs } = self {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs.max(1)),
            );
        }

        response
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!(error = %rejection.body_text(), "Rejected request body");
        match rejection {
            JsonRejection::MissingJsonContentType(_) => ApiError::Request {
                status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
                message: rejection.body_text(),
            },
            _ => ApiError::Validation(vec![FieldError::new("body", rejection.body_text())]),
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Auth(_) => ApiError::Request {
                status: StatusCode::UNAUTHORIZED,
                message: "The model provider rejected the configured credentials".to_string(),
            },
            GenerationError::InvalidRequest(message) => ApiError::bad_request(message),
            GenerationError::Transient(message) => ApiError::Unavailable(message),
            GenerationError::Other(message) => ApiError::Internal(message),
        }
    }
}

impl From<FeedbackError> for ApiError {
    fn from(err: FeedbackError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Field-level validation for request bodies.
pub trait Validate {
    /// Every violation found; empty when the value is valid.
    fn validate(&self) -> Vec<FieldError>;
}

/// Check that `value` holds between 1 and `max_chars` characters.
pub fn check_length(errors: &mut Vec<FieldError>, field: &str, value: &str, max_chars: usize) {
    let chars = value.chars().count();
    if chars == 0 {
        errors.push(FieldError::new(field, "must not be empty"));
    } else if chars > max_chars {
        errors.push(FieldError::new(
            field,
            format!("must be at most {} characters", max_chars),
        ));
    }
}

/// JSON body extractor that also runs [`Validate`].
#[derive(Debug, Clone)]
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;

        let errors = value.validate();
        if !errors.is_empty() {
            warn!(fields = errors.len(), "Request failed validation");
            return Err(ApiError::Validation(errors));
        }

        Ok(Self(value))
    }
}
