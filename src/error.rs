use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Every failure the pipeline can surface.
///
/// Variants carry owned strings rather than source errors so a single
/// failure can be cloned and handed to every caller waiting on the same
/// in-flight load or fetch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodeSwitchError {
    #[error("failed to fetch content: {0}")]
    Fetch(String),

    #[error("failed to parse markup: {0}")]
    Parse(String),

    #[error("failed to load frequency table for '{language}': {message}")]
    FrequencyLoad {
        language: String,
        message: String,
    },

    #[error("completion service error: {0}")]
    Completion(String),

    #[error("completion service error ({status}): {body}")]
    CompletionStatus {
        status: u16,
        body: String,
    },

    #[error("completion timed out after {0:?}")]
    CompletionTimeout(Duration),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("missing or invalid API key")]
    Unauthorized,
}

pub type Result<T> = std::result::Result<T, CodeSwitchError>;

/// Body returned for every failed HTTP request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl CodeSwitchError {
    /// Stable machine-readable code used in the `error` field of responses.
    pub fn code(&self) -> &'static str {
        match self {
            CodeSwitchError::Fetch(_) => "fetch_error",
            CodeSwitchError::Parse(_) => "parse_error",
            CodeSwitchError::FrequencyLoad { .. } => "frequency_load_error",
            CodeSwitchError::Completion(_)
            | CodeSwitchError::CompletionStatus { .. }
            | CodeSwitchError::CompletionTimeout(_) => "completion_error",
            CodeSwitchError::Queue(_) => "queue_error",
            CodeSwitchError::Cache(_) => "cache_error",
            CodeSwitchError::Validation(_) => "validation_error",
            CodeSwitchError::Unauthorized => "unauthorized",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            CodeSwitchError::Validation(_) => StatusCode::BAD_REQUEST,
            CodeSwitchError::Unauthorized => StatusCode::UNAUTHORIZED,
            CodeSwitchError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CodeSwitchError::Fetch(_)
            | CodeSwitchError::Completion(_)
            | CodeSwitchError::CompletionStatus { .. } => StatusCode::BAD_GATEWAY,
            CodeSwitchError::CompletionTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CodeSwitchError::FrequencyLoad { .. }
            | CodeSwitchError::Queue(_)
            | CodeSwitchError::Cache(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether another attempt at the same completion call could succeed.
    ///
    /// Rate limiting (429), server errors (5xx), timeouts and transport
    /// failures are transient; other 4xx responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            CodeSwitchError::CompletionStatus { status, .. } => *status == 429 || *status >= 500,
            CodeSwitchError::CompletionTimeout(_) | CodeSwitchError::Completion(_) => true,
            _ => false,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

impl IntoResponse for CodeSwitchError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_response())).into_response()
    }
}

impl From<redis::RedisError> for CodeSwitchError {
    fn from(err: redis::RedisError) -> Self {
        CodeSwitchError::Cache(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(CodeSwitchError::Fetch("x".into()).code(), "fetch_error");
        assert_eq!(CodeSwitchError::Parse("x".into()).code(), "parse_error");
        assert_eq!(
            CodeSwitchError::FrequencyLoad {
                language: "en".into(),
                message: "x".into()
            }
            .code(),
            "frequency_load_error"
        );
        assert_eq!(
            CodeSwitchError::CompletionTimeout(Duration::from_secs(30)).code(),
            "completion_error"
        );
        assert_eq!(CodeSwitchError::Queue("x".into()).code(), "queue_error");
        assert_eq!(CodeSwitchError::Validation("x".into()).code(), "validation_error");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            CodeSwitchError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(CodeSwitchError::Fetch("down".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            CodeSwitchError::Parse("empty".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            CodeSwitchError::Queue("down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(CodeSwitchError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_retryable_statuses() {
        let status = |s| CodeSwitchError::CompletionStatus {
            status: s,
            body: String::new(),
        };
        assert!(status(429).is_retryable());
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(401).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(CodeSwitchError::CompletionTimeout(Duration::from_secs(1)).is_retryable());
        assert!(CodeSwitchError::Completion("connection refused".into()).is_retryable());
        assert!(!CodeSwitchError::Validation("nope".into()).is_retryable());
    }

    #[test]
    fn test_error_response_body() {
        let body = CodeSwitchError::Fetch("Wikipedia API returned status 500".into()).to_response();
        assert_eq!(body.error, "fetch_error");
        assert!(body.message.contains("500"));

        let json = serde_json::to_value(&body).expect("Should serialize");
        assert!(json.get("error").is_some());
        assert!(json.get("message").is_some());
    }
}
