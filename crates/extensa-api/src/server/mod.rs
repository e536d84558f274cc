//! HTTP server for extension delivery.

pub mod router;
pub mod types;

pub use router::create_router_with_state;
pub use types::{ServerState, MAX_REQUEST_BODY_SIZE};

use std::sync::Arc;

use extensa_core::config::Config;
use extensa_core::extension::ExtensionManager;

/// Build the manager, run the first reload and serve until a shutdown signal
/// arrives. Server extensions are unloaded before returning.
pub async fn run(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    let manager = Arc::new(ExtensionManager::builder(config.extensions.clone()).build()?);
    let outcome = manager.start().await?;
    match &outcome.error {
        None => tracing::info!(
            generation = outcome.generation,
            warnings = outcome.warnings.len(),
            "Extensions loaded"
        ),
        Some(e) => tracing::warn!(error = %e, "Initial extension load failed, serving 404 until a reload succeeds"),
    }
    for warning in &outcome.warnings {
        tracing::warn!(extension = %warning.extension, stage = %warning.stage, "{}", warning.message);
    }

    let state = ServerState::new(manager.clone(), config.delivery.clone());
    start_server(state, config.server.bind).await?;

    manager.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Serve `state` on `bind` with graceful shutdown.
pub async fn start_server(state: ServerState, bind: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = create_router_with_state(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(crate::shutdown::shutdown_signal())
        .await?;
    Ok(())
}
