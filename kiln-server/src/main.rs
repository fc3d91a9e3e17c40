//! Kiln Server
//!
//! Thin HTTP glue around the kiln-core build executor:
//! - Configuration: listening address, build root, retention
//! - Registry: in-memory map of running builds keyed by id
//! - API: submission, status/log queries, cancellation, health/version
//!
//! Shutdown cancels the root token first, so every in-flight build
//! observes cancellation before the listener closes.

mod api;
mod config;
mod registry;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::registry::Registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kiln_server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kiln Server");

    let config = Config::from_env();
    config.validate()?;
    info!(
        "Loaded configuration: listen_addr={}, build_root={}, retention={:?}",
        config.listen_addr,
        config.build_root.display(),
        config.retention
    );

    tokio::fs::create_dir_all(&config.build_root)
        .await
        .context("Failed to create build root directory")?;

    // Root cancellation token: the governing context of every build.
    let context = CancellationToken::new();
    let registry = Arc::new(Registry::new(&config, context.clone()));

    let app = api::create_router(registry);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(context))
        .await
        .context("Server error")?;

    info!("Terminated.");
    Ok(())
}

/// Waits for SIGINT or SIGTERM, then cancels every in-flight build
/// before the server stops accepting connections.
async fn shutdown_signal(context: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal captured. Exiting...");
    context.cancel();
}
