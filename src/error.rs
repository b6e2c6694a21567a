//! Errors surfaced to callers of the monitor.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::store::TargetId;

/// Errors returned by client-facing operations.
///
/// Probe and storage failures never appear here: the former are absorbed into
/// target state, the latter are logged and the in-memory registry stays
/// authoritative.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("target not found: {0}")]
    NotFound(TargetId),
}

impl MonitorError {
    pub fn validation(msg: impl Into<String>) -> Self {
        MonitorError::Validation(msg.into())
    }
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let status = match &self {
            MonitorError::Validation(_) => StatusCode::BAD_REQUEST,
            MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
