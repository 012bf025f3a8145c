//! Staff/customer detection and frame annotation
//!
//! The [`Detector`] trait is the inference boundary of the pipeline: the
//! registry calls it synchronously with a decoded frame and consumes counts,
//! boxes, and the observed latency. [`OnnxDetector`] implements it with a
//! two-class YOLO model over ONNX Runtime; [`Annotator`] renders detections
//! onto a frame and encodes JPEG snapshots for the HTTP layer.

mod annotate;
mod detector;
mod onnx;

pub use annotate::Annotator;
pub use detector::{count_classes, Detector};
pub use onnx::{DetectorConfig, OnnxDetector};
