//! Application router.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::types::{ServerState, MAX_REQUEST_BODY_SIZE};
use crate::handlers::{basic, extensions};

/// Create the application router with a specific state.
pub fn create_router_with_state(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(basic::health_handler))
        .route(
            "/extensions/reload",
            post(extensions::reload_handler).get(extensions::reserved_type_handler),
        )
        .route("/extensions/status", get(extensions::status_handler))
        .route("/extensions/:type", get(extensions::list_extensions_handler))
        .route("/extensions/:type/index.js", get(extensions::extension_source_handler))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
