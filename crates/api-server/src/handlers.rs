//! HTTP request handlers for API endpoints

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::{error, info};

use crate::{
    types::{CameraActionResponse, HealthResponse, StartRequest},
    ApiState,
};
use storewatch_common::CameraError;

/// Map a registry error onto an HTTP status
pub(crate) fn error_status(error: &CameraError) -> StatusCode {
    match error {
        CameraError::InvalidChannel(_) => StatusCode::BAD_REQUEST,
        CameraError::AlreadyRunning(_) => StatusCode::CONFLICT,
        CameraError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &CameraError) -> (StatusCode, String) {
    (error_status(error), error.to_string())
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Start a camera session
///
/// Blocks briefly (bounded) waiting for the first frame, so it runs on the
/// blocking pool rather than a runtime worker.
pub async fn start_camera(
    State(state): State<ApiState>,
    Path(channel): Path<u32>,
    Json(request): Json<StartRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    info!("Start request: channel={channel}, uri={}", request.uri);

    let manager = state.manager.clone();
    let uri = request.uri;
    tokio::task::spawn_blocking(move || manager.start(channel, &uri))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Start task failed: {e}"),
            )
        })?
        .map_err(|e| {
            error!("Failed to start channel {channel}: {e}");
            error_response(&e)
        })?;

    Ok(Json(CameraActionResponse {
        channel,
        status: "started".to_string(),
    }))
}

/// Stop a camera session
///
/// Joins the decode thread (bounded), so it runs on the blocking pool.
pub async fn stop_camera(
    State(state): State<ApiState>,
    Path(channel): Path<u32>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    info!("Stop request: channel={channel}");

    let manager = state.manager.clone();
    tokio::task::spawn_blocking(move || manager.stop(channel))
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Stop task failed: {e}"),
            )
        })?
        .map_err(|e| {
            error!("Failed to stop channel {channel}: {e}");
            error_response(&e)
        })?;

    Ok(Json(CameraActionResponse {
        channel,
        status: "stopped".to_string(),
    }))
}

/// Stats for one camera
pub async fn camera_stats(
    State(state): State<ApiState>,
    Path(channel): Path<u32>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match state.manager.stats(channel) {
        Some(stats) => Ok(Json(stats)),
        None => Err(error_response(&CameraError::NotFound(channel))),
    }
}

/// Stats for all registered cameras
pub async fn all_stats(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.manager.all_stats())
}

/// Most recent annotated snapshot as JPEG
pub async fn camera_snapshot(
    State(state): State<ApiState>,
    Path(channel): Path<u32>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match state.manager.snapshot(channel) {
        Some(encoded) => Ok(([(header::CONTENT_TYPE, "image/jpeg")], encoded)),
        None => Err((
            StatusCode::NOT_FOUND,
            format!("No snapshot available for channel {channel}"),
        )),
    }
}
