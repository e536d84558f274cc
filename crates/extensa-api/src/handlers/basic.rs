//! Health check.

use axum::{extract::State, Json};
use serde::Serialize;

use super::ServerState;

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub uptime: u64,
    /// Published generation, 0 until the first reload succeeds.
    pub generation: u64,
}

/// Liveness probe.
pub async fn health_handler(State(state): State<ServerState>) -> Json<HealthStatus> {
    let uptime = chrono::Utc::now().timestamp() - state.started_at;
    Json(HealthStatus {
        status: "ok",
        service: "extensa",
        version: env!("CARGO_PKG_VERSION"),
        uptime: uptime.max(0) as u64,
        generation: state.manager.generation().id,
    })
}
