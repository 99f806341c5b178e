//! Error types for the MirrorView service.

use thiserror::Error;

/// Main error type for MirrorView startup and configuration.
///
/// Request-scoped failures never surface as this type; they are rendered into
/// the JSON error envelope by [`crate::http::ApiError`].
#[derive(Error, Debug)]
pub enum MirrorviewError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A malformed rate limit token such as `10/fortnight`
    #[error("Invalid rate limit token '{token}': {reason}")]
    InvalidRateLimit { token: String, reason: String },

    /// Errors raised while merging configuration sources
    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for MirrorView operations.
pub type Result<T> = std::result::Result<T, MirrorviewError>;
