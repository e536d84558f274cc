//! API handlers.

pub mod basic;
pub mod common;
pub mod extensions;

pub use crate::server::ServerState;

pub use basic::health_handler;
pub use extensions::{
    extension_source_handler, list_extensions_handler, reload_handler, status_handler,
};
