//! Shared handler helpers.

use axum::Json;

use crate::models::{ApiResponse, ErrorResponse};

/// Result type for JSON handlers.
pub type HandlerResult<T> = Result<Json<ApiResponse<T>>, ErrorResponse>;

/// Wrap `data` in a success envelope.
pub fn ok<T>(data: T) -> HandlerResult<T> {
    Ok(Json(ApiResponse::success(data)))
}
