//! Extension delivery handlers.
//!
//! - `GET /extensions/:type` lists enabled extensions of an app type.
//! - `GET /extensions/:type/index.js` serves the compiled payload.
//! - `POST /extensions/reload` runs a reload cycle and reports its outcome.
//!   `GET` on it is a 404 like any other non-app type.
//! - `GET /extensions/status` reports the reload coordinator.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use extensa_core::extension::classifier;
use extensa_core::extension::{CoordinatorStatus, CycleOutcome, ExtensionMetadata, TypeTag};

use super::common::{ok, HandlerResult};
use crate::delivery;
use crate::models::{ApiResponse, ApiResult, ErrorResponse};
use crate::server::ServerState;

/// Resolve a plural path segment to an app type.
fn app_type(plural: &str) -> ApiResult<TypeTag> {
    classifier::depluralize_app(plural)
        .ok_or_else(|| ErrorResponse::not_found(format!("/extensions/{}", plural)))
}

/// List enabled extensions of an app type.
///
/// GET /extensions/:type
pub async fn list_extensions_handler(
    State(state): State<ServerState>,
    Path(plural): Path<String>,
) -> HandlerResult<Vec<ExtensionMetadata>> {
    let tag = app_type(&plural)?;
    ok(state.manager.extensions_list(tag))
}

/// Serve the compiled payload for an app type.
///
/// GET /extensions/:type/index.js
pub async fn extension_source_handler(
    State(state): State<ServerState>,
    Path(plural): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let tag = app_type(&plural)?;
    let payload = state
        .manager
        .app_extension_source(tag)
        .ok_or_else(|| ErrorResponse::not_found(format!("/extensions/{}/index.js", plural)))?;

    let etag = delivery::etag(&payload.fingerprint);
    let mut response = if delivery::not_modified(&headers, &etag) {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        (StatusCode::OK, payload.source.clone()).into_response()
    };

    let out = response.headers_mut();
    out.insert(header::CONTENT_TYPE, HeaderValue::from_static(delivery::JAVASCRIPT));
    out.insert(header::CACHE_CONTROL, delivery::cache_control(&state.delivery, &headers));
    out.insert(header::VARY, HeaderValue::from_static(delivery::VARY_ON));
    if let Ok(value) = HeaderValue::from_str(&etag) {
        out.insert(header::ETAG, value);
    }
    Ok(response)
}

/// Run a reload cycle. `503` when the cycle failed.
///
/// POST /extensions/reload
pub async fn reload_handler(State(state): State<ServerState>) -> ApiResult<Response> {
    let outcome: CycleOutcome = state.manager.reload().await?;
    let status = if outcome.is_success() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(ApiResponse::success(outcome))).into_response())
}

/// `reload` shadows the `:type` segment but is not an extension type.
///
/// GET /extensions/reload
pub async fn reserved_type_handler() -> ErrorResponse {
    ErrorResponse::not_found("/extensions/reload")
}

/// Coordinator state and counters.
///
/// GET /extensions/status
pub async fn status_handler(State(state): State<ServerState>) -> HandlerResult<CoordinatorStatus> {
    ok(state.manager.status())
}
