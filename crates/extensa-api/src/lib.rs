//! HTTP delivery layer for the Extensa extension manager.
//!
//! Serves extension listings and compiled client payloads, and exposes
//! reload and status endpoints.

pub mod delivery;
pub mod handlers;
pub mod models;
pub mod server;
pub mod shutdown;

pub use models::{ApiResponse, ErrorResponse};
pub use server::{create_router_with_state, run, start_server, ServerState};
