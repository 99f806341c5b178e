//! Collaborator interfaces behind the HTTP handlers.
//!
//! Text generation and feedback persistence live outside this crate. Handlers
//! talk to them only through [`FlipGenerator`] and [`FeedbackRecorder`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Model used when a submission does not name one.
pub const DEFAULT_MODEL_ID: &str = "gpt-5-nano";

/// A user submission as sent by the frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Client-generated submission id
    pub id: Uuid,
    /// When the user submitted the text
    pub created_at: DateTime<Utc>,
    /// Original input text
    pub input_text: String,
    /// Model to generate with
    #[serde(default = "default_model_id")]
    pub model_id: String,
}

fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}

/// Generated reframing of the user's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlipResult {
    pub flipped_text: String,
    pub explanation: String,
}

/// Thumb vote on a generated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Up,
    Down,
}

/// Errors from a [`FlipGenerator`].
#[derive(Error, Debug)]
pub enum GenerationError {
    /// The provider rejected our credentials
    #[error("provider authentication failed: {0}")]
    Auth(String),

    /// The provider rejected the request itself
    #[error("invalid generation request: {0}")]
    InvalidRequest(String),

    /// Timeouts, rate limits and connection failures at the provider
    #[error("provider temporarily unavailable: {0}")]
    Transient(String),

    /// Anything else, including malformed provider output
    #[error("generation failed: {0}")]
    Other(String),
}

/// Errors from a [`FeedbackRecorder`].
#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("failed to store feedback: {0}")]
    Storage(String),
}

/// Produces a reframed version of a submission's text.
#[async_trait]
pub trait FlipGenerator: Send + Sync {
    async fn generate(&self, submission: &Submission, text: &str)
        -> Result<FlipResult, GenerationError>;
}

/// Persists feedback events.
#[async_trait]
pub trait FeedbackRecorder: Send + Sync {
    async fn record_thumb(
        &self,
        submission: &Submission,
        vote: Vote,
        voted_at: DateTime<Utc>,
    ) -> Result<(), FeedbackError>;

    async fn record_edit(
        &self,
        submission: &Submission,
        edited_text: &str,
        edited_at: DateTime<Utc>,
    ) -> Result<(), FeedbackError>;
}

/// Generator used when no model provider is configured.
///
/// Every call fails as temporarily unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredGenerator;

#[async_trait]
impl FlipGenerator for UnconfiguredGenerator {
    async fn generate(
        &self,
        submission: &Submission,
        _text: &str,
    ) -> Result<FlipResult, GenerationError> {
        Err(GenerationError::Transient(format!(
            "no provider configured for model '{}'",
            submission.model_id
        )))
    }
}

/// Recorder that accepts and discards feedback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFeedbackRecorder;

#[async_trait]
impl FeedbackRecorder for NoopFeedbackRecorder {
    async fn record_thumb(
        &self,
        submission: &Submission,
        vote: Vote,
        _voted_at: DateTime<Utc>,
    ) -> Result<(), FeedbackError> {
        debug!(submission_id = %submission.id, vote = ?vote, "Discarding thumb feedback");
        Ok(())
    }

    async fn record_edit(
        &self,
        submission: &Submission,
        edited_text: &str,
        _edited_at: DateTime<Utc>,
    ) -> Result<(), FeedbackError> {
        debug!(
            submission_id = %submission.id,
            chars = edited_text.chars().count(),
            "Discarding edit feedback"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submission() -> Submission {
        serde_json::from_value(json!({
            "id": "6f1c2f7e-8d5a-4a58-9d43-0b8e8c2f1a10",
            "created_at": "2026-01-02T03:04:05Z",
            "input_text": "I always mess things up",
        }))
        .unwrap()
    }

    #[test]
    fn test_submission_defaults_model() {
        assert_eq!(submission().model_id, DEFAULT_MODEL_ID);
    }

    #[test]
    fn test_vote_serialization() {
        assert_eq!(serde_json::to_value(Vote::Up).unwrap(), json!("up"));
        assert_eq!(serde_json::from_value::<Vote>(json!("down")).unwrap(), Vote::Down);
        assert!(serde_json::from_value::<Vote>(json!("sideways")).is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_generator_is_transient() {
        let err = UnconfiguredGenerator
            .generate(&submission(), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Transient(_)));
    }

    #[tokio::test]
    async fn test_noop_recorder_accepts() {
        let recorder = NoopFeedbackRecorder;
        tokio_test::assert_ok!(recorder.record_thumb(&submission(), Vote::Up, Utc::now()).await);
        tokio_test::assert_ok!(recorder.record_edit(&submission(), "better", Utc::now()).await);
    }
}
