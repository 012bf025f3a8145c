//! Integration tests for the camera API server
//!
//! Starts the server with synthetic sources and a stub detector, sends real
//! HTTP requests, and verifies the full path from request through registry
//! to snapshot retrieval.

use std::sync::Arc;
use std::time::Duration;
use storewatch_api_server::{start_server, ApiState};
use storewatch_common::{Frame, Inference, Result};
use storewatch_detection::{Annotator, Detector};
use storewatch_registry::{CameraManager, ManagerConfig};
use storewatch_stream::{SourceFactory, StreamSource, SyntheticSource};
use tokio::time::sleep;

struct StubDetector;

impl Detector for StubDetector {
    fn infer(&self, _frame: &Frame) -> Result<Inference> {
        Ok(Inference {
            detections: vec![],
            staff_count: 1,
            customer_count: 0,
            elapsed_ms: 5.0,
        })
    }
}

fn test_state() -> ApiState {
    let factory: Arc<dyn SourceFactory> = Arc::new(|_uri: &str| -> Box<dyn StreamSource> {
        Box::new(SyntheticSource::new(32, 32).with_fps(50.0).paced())
    });
    let manager = CameraManager::new(
        factory,
        Arc::new(StubDetector),
        Arc::new(Annotator::new()),
        ManagerConfig::default(),
    )
    .unwrap();
    ApiState::new(Arc::new(manager))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_camera_lifecycle_over_http() {
    let state = test_state();
    let server = tokio::spawn(async move {
        start_server("127.0.0.1:18090", state)
            .await
            .expect("Failed to start server");
    });
    sleep(Duration::from_millis(300)).await;

    let base = "http://127.0.0.1:18090";
    let client = reqwest::Client::new();

    // Health check
    let response = client.get(format!("{base}/health")).send().await.unwrap();
    assert!(response.status().is_success());

    // Snapshot before any session exists
    let response = client
        .get(format!("{base}/api/v1/cameras/5/snapshot"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Start channel 5
    let response = client
        .post(format!("{base}/api/v1/cameras/5/start"))
        .json(&serde_json::json!({"uri": "rtsp://cam/5"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // Duplicate start conflicts
    let response = client
        .post(format!("{base}/api/v1/cameras/5/start"))
        .json(&serde_json::json!({"uri": "rtsp://cam/other"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    // Invalid channel is rejected
    let response = client
        .post(format!("{base}/api/v1/cameras/0/start"))
        .json(&serde_json::json!({"uri": "rtsp://cam/0"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Per-camera stats carry the wire shape
    let stats: serde_json::Value = client
        .get(format!("{base}/api/v1/cameras/5/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["channel"], 5);
    assert_eq!(stats["uri"], "rtsp://cam/5");
    assert_eq!(stats["isRunning"], true);

    // Aggregate stats list exactly the one session
    let all: serde_json::Value = client
        .get(format!("{base}/api/v1/cameras/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.as_array().unwrap().len(), 1);

    // A detection pass publishes a JPEG snapshot
    let mut snapshot = None;
    for _ in 0..50 {
        let response = client
            .get(format!("{base}/api/v1/cameras/5/snapshot"))
            .send()
            .await
            .unwrap();
        if response.status().is_success() {
            assert_eq!(
                response.headers()["content-type"].to_str().unwrap(),
                "image/jpeg"
            );
            snapshot = Some(response.bytes().await.unwrap());
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    let snapshot = snapshot.expect("no snapshot published within the deadline");
    assert_eq!(&snapshot[..2], &[0xFF, 0xD8]);

    // Stop, then a second stop is NotFound
    let response = client
        .post(format!("{base}/api/v1/cameras/5/stop"))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let response = client
        .post(format!("{base}/api/v1/cameras/5/stop"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    server.abort();
}
