//! API Module
//!
//! HTTP API layer over the build registry.

pub mod build;
pub mod error;
pub mod health;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::registry::Registry;

/// Create the main API router with all endpoints
pub fn create_router(registry: Arc<Registry>) -> Router {
    Router::new()
        // Service endpoints
        .route("/health", get(health::health_check))
        .route("/version", get(health::version))
        // Build endpoints
        .route("/build/submit", post(build::submit_build))
        .route("/build/{id}", get(build::get_build))
        .route("/build/{id}/logs", get(build::get_build_logs))
        .route("/build/{id}/cancel", post(build::cancel_build))
        // Add state and middleware
        .with_state(registry)
        .layer(TraceLayer::new_for_http())
}
