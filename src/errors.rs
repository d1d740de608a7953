use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

/// Errors surfaced by the scoring service.
#[derive(Debug, Clone, PartialEq)]
pub enum ScoringError {
    /// Unknown or invalid lead identifier. Never retried.
    LeadNotFound(i64),
    /// The model runtime could not answer. Transient, eligible for retry.
    ModelUnavailable(String),
    /// The gateway rejected the feature vector.
    InvalidFeatures(String),
    /// No model registered under the requested ID.
    UnknownModel(String),
    /// Admission denied by the rate limiter.
    RateLimited(String),
    /// Malformed batch request. Rejected before any item is scored.
    InvalidBatchInput(String),
    /// Batch request ID unknown or past retention.
    BatchNotFound(String),
    /// Rejected management setting (e.g. a zero TTL).
    InvalidSettings(String),
    /// Error talking to the lead data provider.
    ExternalApi(String),
    /// Internal error.
    Internal(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<ScoringError>,
        /// Additional context message.
        context: String,
    },
}

impl ScoringError {
    /// Whether the facade may retry the failed gateway call.
    pub fn is_transient(&self) -> bool {
        match self {
            ScoringError::ModelUnavailable(_) => true,
            ScoringError::WithContext { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Whether this is a limiter rejection, reported as a throttled outcome.
    pub fn is_throttled(&self) -> bool {
        match self {
            ScoringError::RateLimited(_) => true,
            ScoringError::WithContext { source, .. } => source.is_throttled(),
            _ => false,
        }
    }

    /// HTTP status the error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ScoringError::LeadNotFound(_)
            | ScoringError::UnknownModel(_)
            | ScoringError::BatchNotFound(_) => StatusCode::NOT_FOUND,
            ScoringError::InvalidBatchInput(_) | ScoringError::InvalidSettings(_) => {
                StatusCode::BAD_REQUEST
            }
            ScoringError::InvalidFeatures(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ScoringError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ScoringError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ScoringError::ExternalApi(_) => StatusCode::BAD_GATEWAY,
            ScoringError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ScoringError::WithContext { source, .. } => source.status_code(),
        }
    }
}

impl fmt::Display for ScoringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoringError::LeadNotFound(id) => write!(f, "Lead {} not found", id),
            ScoringError::ModelUnavailable(msg) => write!(f, "Model unavailable: {}", msg),
            ScoringError::InvalidFeatures(msg) => write!(f, "Invalid features: {}", msg),
            ScoringError::UnknownModel(id) => write!(f, "Model {} not found", id),
            ScoringError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            ScoringError::InvalidBatchInput(msg) => write!(f, "Invalid batch input: {}", msg),
            ScoringError::BatchNotFound(id) => write!(f, "Batch {} not found", id),
            ScoringError::InvalidSettings(msg) => write!(f, "Invalid settings: {}", msg),
            ScoringError::ExternalApi(msg) => write!(f, "External API error: {}", msg),
            ScoringError::Internal(msg) => write!(f, "Internal error: {}", msg),
            ScoringError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for ScoringError {}

impl IntoResponse for ScoringError {
    /// Maps each variant to a status code and a `{"error": ...}` body.
    ///
    /// Server-side failures are logged here; caller mistakes are not.
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            ScoringError::ModelUnavailable(msg) => {
                tracing::error!("Model unavailable: {}", msg);
            }
            ScoringError::ExternalApi(msg) => {
                tracing::error!("External API error: {}", msg);
            }
            ScoringError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
            }
            ScoringError::RateLimited(msg) => {
                tracing::warn!("Request throttled: {}", msg);
            }
            ScoringError::WithContext { .. } => {
                tracing::error!("Error with context: {}", self);
            }
            _ => {}
        }

        let error_message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => "Internal server error".to_string(),
            StatusCode::BAD_GATEWAY => "External service error".to_string(),
            _ => self.to_string(),
        };

        (status, Json(json!({ "error": error_message }))).into_response()
    }
}

impl From<reqwest::Error> for ScoringError {
    fn from(err: reqwest::Error) -> Self {
        ScoringError::ExternalApi(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for `ScoringError`.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, ScoringError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, ScoringError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, ScoringError> {
    fn context(self, context: impl Into<String>) -> Result<T, ScoringError> {
        self.map_err(|e| ScoringError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, ScoringError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ScoringError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

impl<T> ResultExt<T> for Result<T, reqwest::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, ScoringError> {
        self.map_err(|e| ScoringError::WithContext {
            source: Box::new(ScoringError::ExternalApi(e.to_string())),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, ScoringError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ScoringError::WithContext {
            source: Box::new(ScoringError::ExternalApi(e.to_string())),
            context: f(),
        })
    }
}
