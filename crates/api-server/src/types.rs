//! API request and response types

use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Body for `POST /api/v1/cameras/{channel}/start`
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    /// Stream source URI (typically an RTSP URL)
    pub uri: String,
}

/// Response for session lifecycle actions
#[derive(Debug, Clone, Serialize)]
pub struct CameraActionResponse {
    pub channel: u32,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_parses() {
        let request: StartRequest =
            serde_json::from_str(r#"{"uri": "rtsp://cam/1"}"#).unwrap();
        assert_eq!(request.uri, "rtsp://cam/1");
    }

    #[test]
    fn test_action_response_shape() {
        let response = CameraActionResponse {
            channel: 5,
            status: "started".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["channel"], 5);
        assert_eq!(json["status"], "started");
    }
}
