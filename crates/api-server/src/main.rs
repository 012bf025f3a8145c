//! API Server Binary Entry Point

use std::sync::Arc;
use storewatch_api_server::{start_server, ApiState};
use storewatch_detection::{Annotator, DetectorConfig, OnnxDetector};
use storewatch_registry::{CameraManager, DispatchMode, ManagerConfig};
use storewatch_stream::RtspSourceFactory;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storewatch=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration from environment with deployment defaults
    let addr = std::env::var("STOREWATCH_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let model_path = std::env::var("STOREWATCH_MODEL")
        .unwrap_or_else(|_| "models/staff_customer_detector.onnx".to_string());

    let detector = Arc::new(OnnxDetector::new(DetectorConfig {
        model_path: model_path.into(),
        ..DetectorConfig::default()
    })?);

    // Label/overlay text needs a TTF supplied at runtime; without one the
    // annotator still draws boxes and bars.
    let annotator = match std::env::var("STOREWATCH_FONT") {
        Ok(font_path) => Annotator::with_font_file(font_path),
        Err(_) => Annotator::new(),
    };

    // Detection runs inline on decode threads unless a worker count is
    // configured, in which case admitted frames go through the pool.
    let dispatch = match std::env::var("STOREWATCH_DETECT_WORKERS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
    {
        Some(workers) if workers > 0 => DispatchMode::Pool { workers },
        _ => DispatchMode::Inline,
    };

    let manager = Arc::new(CameraManager::new(
        Arc::new(RtspSourceFactory),
        detector,
        Arc::new(annotator),
        ManagerConfig {
            dispatch,
            ..ManagerConfig::default()
        },
    )?);

    tracing::info!("Starting camera detection API server");
    start_server(&addr, ApiState::new(manager)).await?;

    Ok(())
}
