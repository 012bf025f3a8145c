/// Common types and utilities shared by the camera pipeline crates
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Camera pipeline errors
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("Channel {0} is already running")]
    AlreadyRunning(u32),

    #[error("Channel {0} not found")]
    NotFound(u32),

    #[error("Failed to open stream source: {0}")]
    SourceOpen(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Worker pool is shut down")]
    PoolClosed,

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for camera pipeline operations
pub type Result<T> = std::result::Result<T, CameraError>;

/// Detection class produced by the staff/customer model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionClass {
    Staff,
    Customer,
}

impl DetectionClass {
    /// Human-readable label used in annotations
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Staff => "Staff",
            Self::Customer => "Customer",
        }
    }
}

/// Axis-aligned bounding box, normalized to [0, 1] in both dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Single detected person
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub class: DetectionClass,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Result of one detector pass over a frame
#[derive(Debug, Clone)]
pub struct Inference {
    pub detections: Vec<Detection>,
    pub staff_count: u32,
    pub customer_count: u32,
    /// Wall-clock inference latency in milliseconds
    pub elapsed_ms: f64,
}

/// Properties of an opened stream, readable once the source is connected
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Decoded video frame in RGB24 layout (row-major, 3 bytes per pixel)
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Raw RGB24 data, `width * height * 3` bytes
    pub data: Vec<u8>,
    /// Frame number within the stream (0-indexed)
    pub frame_number: u64,
    /// Timestamp in seconds since stream start
    pub timestamp: f64,
}

impl Frame {
    /// Check that `data` length matches the stated dimensions
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * 3
    }
}

/// Point-in-time statistics for one camera session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub channel: u32,
    pub uri: String,
    pub is_running: bool,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub total_frames: u64,
    pub staff_count: u32,
    pub customer_count: u32,
    pub avg_inference_ms: f64,
}
