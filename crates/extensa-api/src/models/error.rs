//! Error envelope for API responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use extensa_core::ExtensionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Error response with an HTTP status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    pub message: String,
    #[serde(skip)]
    pub status: StatusCode,
    /// Unique request ID for tracing, logged with the failure.
    pub request_id: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: StatusCode) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
            request_id: Uuid::new_v4().to_string(),
        }
    }

    /// Not found (404).
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            "NOT_FOUND",
            format!("{} not found", resource.into()),
            StatusCode::NOT_FOUND,
        )
    }

    /// Internal server error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message, StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Service unavailable (503).
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new("SERVICE_UNAVAILABLE", message, StatusCode::SERVICE_UNAVAILABLE)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = self.status;
        if status.is_server_error() {
            tracing::warn!(code = %self.code, request_id = %self.request_id, "{}", self.message);
        }
        let body = serde_json::json!({
            "success": false,
            "error": {
                "code": self.code,
                "message": self.message,
                "request_id": self.request_id,
            }
        });
        (status, axum::Json(body)).into_response()
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorResponse {}

impl From<ExtensionError> for ErrorResponse {
    fn from(err: ExtensionError) -> Self {
        match err {
            ExtensionError::UnknownType(t) => Self::not_found(format!("extension type '{}'", t)),
            ExtensionError::NotFound(what) => Self::not_found(what),
            e @ (ExtensionError::CoordinatorStopped | ExtensionError::Timeout(_)) => {
                Self::service_unavailable(e.to_string())
            }
            other => Self::internal(other.to_string()),
        }
    }
}

/// Result alias for fallible helpers.
pub type ApiResult<T> = Result<T, ErrorResponse>;
