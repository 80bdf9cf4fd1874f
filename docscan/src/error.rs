use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::ocr::Diagnostics;

/// Message shown to end callers whenever recognition gives up.
pub const NO_TEXT_DETECTED: &str = "No text detected";

#[derive(Error, Debug)]
pub enum ScanError {
    /// Non-fatal: a preprocessing step failed and the unmodified image was used instead.
    #[error("Preprocessing degraded: {0}")]
    PreprocessingDegraded(String),

    #[error("Engine timed out after {0:?}")]
    EngineTimeout(Duration),

    #[error("Engine rate limit exceeded, retry after {retry_after:?} seconds")]
    EngineRateLimited { retry_after: Option<u64> },

    #[error("Engine reported error: {0}")]
    EngineReported(String),

    #[error("Engine returned no text")]
    EmptyResult,

    /// Carries the call's diagnostics when the caller asked for them.
    #[error("No text detected")]
    AllEnginesExhausted {
        diagnostics: Option<Box<Diagnostics>>,
    },

    /// An engine failure plus what the engine tried before giving up.
    #[error("{source}")]
    Traced {
        source: Box<ScanError>,
        trace: serde_json::Value,
    },

    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Short stable name used in diagnostics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::PreprocessingDegraded(_) => "preprocessing_degraded",
            ScanError::EngineTimeout(_) => "engine_timeout",
            ScanError::EngineRateLimited { .. } => "engine_rate_limited",
            ScanError::EngineReported(_) => "engine_reported_error",
            ScanError::EmptyResult => "empty_result",
            ScanError::AllEnginesExhausted { .. } => "all_engines_exhausted",
            ScanError::Traced { source, .. } => source.kind(),
            ScanError::EngineUnavailable(_) => "engine_unavailable",
            ScanError::Validation(_) => "validation",
            ScanError::Http(_) => "http",
            ScanError::Json(_) => "json",
            ScanError::Io(_) => "io",
            ScanError::Internal(_) => "internal",
        }
    }

    /// Whether the remote adapter may spend another attempt on this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScanError::EngineRateLimited { .. }
            | ScanError::EngineReported(_)
            | ScanError::EmptyResult => true,
            ScanError::Traced { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub fn exhausted() -> Self {
        ScanError::AllEnginesExhausted { diagnostics: None }
    }

    pub fn with_trace(self, trace: serde_json::Value) -> Self {
        ScanError::Traced {
            source: Box::new(self),
            trace,
        }
    }

    /// Splits off an engine trace, if any.
    pub fn into_parts(self) -> (ScanError, Option<serde_json::Value>) {
        match self {
            ScanError::Traced { source, trace } => (source.into_parts().0, Some(trace)),
            other => (other, None),
        }
    }
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        let error = match self {
            ScanError::Traced { source, .. } => return (*source).into_response(),
            other => other,
        };
        let diagnostics = match &error {
            ScanError::AllEnginesExhausted {
                diagnostics: Some(d),
            } => serde_json::to_value(d).ok(),
            _ => None,
        };

        let (status, message) = match &error {
            ScanError::AllEnginesExhausted { .. } | ScanError::EmptyResult => (
                StatusCode::UNPROCESSABLE_ENTITY,
                NO_TEXT_DETECTED.to_string(),
            ),
            ScanError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ScanError::EngineTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, error.to_string()),
            ScanError::EngineRateLimited { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, error.to_string())
            }
            ScanError::EngineReported(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            ScanError::Http(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            ScanError::EngineUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            ScanError::Json(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ScanError::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            ScanError::PreprocessingDegraded(msg) | ScanError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
            ScanError::Traced { .. } => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
        };

        let mut body = json!({
            "error": message,
            "code": status.as_u16()
        });
        if let Some(diagnostics) = diagnostics {
            body["diagnostics"] = diagnostics;
        }

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(ScanError::EmptyResult.is_retryable());
        assert!(ScanError::EngineRateLimited { retry_after: None }.is_retryable());
        assert!(ScanError::EngineReported("busy".to_string()).is_retryable());
        assert!(!ScanError::EngineTimeout(Duration::from_secs(15)).is_retryable());
        assert!(!ScanError::exhausted().is_retryable());
        assert!(ScanError::EmptyResult
            .with_trace(json!({ "attempts": 3 }))
            .is_retryable());
    }

    #[test]
    fn test_exhausted_message_is_user_facing() {
        assert_eq!(ScanError::exhausted().to_string(), "No text detected");
    }

    #[test]
    fn test_exhausted_maps_to_unprocessable() {
        let response = ScanError::exhausted().into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_trace_is_split_off_and_keeps_kind() {
        let error = ScanError::EngineUnavailable("bad key".to_string())
            .with_trace(json!({ "attempts": 1 }));
        assert_eq!(error.kind(), "engine_unavailable");
        assert_eq!(error.to_string(), "Engine unavailable: bad key");
        assert_eq!(error.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let error = ScanError::EmptyResult.with_trace(json!({ "attempts": 3 }));
        let (root, trace) = error.into_parts();
        assert!(matches!(root, ScanError::EmptyResult));
        assert_eq!(trace.unwrap()["attempts"], 3);
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let response = ScanError::EngineTimeout(Duration::from_secs(15)).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
