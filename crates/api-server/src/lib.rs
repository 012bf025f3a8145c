//! REST API server for the camera detection pipeline
//!
//! Thin HTTP front-end over the session registry: session lifecycle
//! (start/stop), per-camera statistics, and annotated JPEG snapshots. All
//! pipeline behavior lives in the registry; handlers only translate between
//! HTTP and the registry's typed API.

mod handlers;
mod types;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use storewatch_registry::CameraManager;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use handlers::*;
pub use types::*;

/// API server state shared across handlers
#[derive(Clone)]
pub struct ApiState {
    /// Session registry owning all active cameras
    pub manager: Arc<CameraManager>,
}

impl ApiState {
    #[must_use]
    pub fn new(manager: Arc<CameraManager>) -> Self {
        Self { manager }
    }
}

/// Build the API router with all endpoints
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Aggregate stats
        .route("/api/v1/cameras/stats", get(all_stats))
        // Session lifecycle
        .route("/api/v1/cameras/{channel}/start", post(start_camera))
        .route("/api/v1/cameras/{channel}/stop", post(stop_camera))
        // Per-camera queries
        .route("/api/v1/cameras/{channel}/stats", get(camera_stats))
        .route("/api/v1/cameras/{channel}/snapshot", get(camera_snapshot))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the API server
pub async fn start_server(addr: &str, state: ApiState) -> Result<(), std::io::Error> {
    tracing::info!("Starting API server on {}", addr);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await
}
