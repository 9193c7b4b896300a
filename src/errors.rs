use crate::services::resize_service::PipelineError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Error surfaced to the HTTP layer. Carries the status and a message that
/// is rendered as a small JSON body.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

/// Storage and transform failures both map to a 500; only the log line
/// tells them apart.
impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match &err {
            PipelineError::Transform(inner) => {
                tracing::error!(error = %inner, "image transform failed");
            }
            PipelineError::Upstream(inner) => {
                tracing::error!(error = %inner, "storage request failed");
            }
            PipelineError::OriginalNotFound { key } => {
                tracing::error!(key = %key, "unhandled missing original");
            }
        }
        AppError::internal(err.to_string())
    }
}
