//! Two-class YOLO detector over ONNX Runtime

use crate::detector::{count_classes, Detector};
use ndarray::Array4;
use ort::{session::Session, value::Value};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use storewatch_common::{
    BoundingBox, CameraError, Detection, DetectionClass, Frame, Inference, Result,
};
use tracing::debug;

/// Detector configuration
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Path to the staff/customer ONNX model
    pub model_path: PathBuf,
    /// Minimum confidence for a detection to be kept
    pub confidence_threshold: f32,
    /// IoU threshold for non-maximum suppression
    pub iou_threshold: f32,
    /// Square model input size in pixels
    pub input_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/staff_customer_detector.onnx"),
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// YOLO staff/customer detector.
///
/// The ONNX session is shared behind a mutex: the ort API needs `&mut self`
/// for `run`, while ONNX Runtime itself parallelizes internally, so lock
/// hold time is dominated by the inference call.
pub struct OnnxDetector {
    session: Mutex<Session>,
    config: DetectorConfig,
}

impl OnnxDetector {
    /// Load the model from `config.model_path`.
    ///
    /// # Errors
    ///
    /// Fails if the model file cannot be loaded by ONNX Runtime.
    pub fn new(config: DetectorConfig) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| CameraError::Detector(format!("ONNX builder failed: {e}")))?
            .commit_from_file(&config.model_path)
            .map_err(|e| {
                CameraError::Detector(format!(
                    "Failed to load model {}: {e}",
                    config.model_path.display()
                ))
            })?;
        debug!("Loaded detector model {}", config.model_path.display());

        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }

    /// Load with default thresholds from an explicit model path.
    pub fn from_model_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(DetectorConfig {
            model_path: path.as_ref().to_path_buf(),
            ..DetectorConfig::default()
        })
    }

    /// Resize to the model input square and normalize to [0, 1].
    fn preprocess(&self, frame: &Frame) -> Result<Array4<f32>> {
        let size = self.config.input_size;
        let image = image::RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| {
                CameraError::Detector("Frame buffer does not match dimensions".to_string())
            })?;

        let resized =
            image::imageops::resize(&image, size, size, image::imageops::FilterType::Triangle);

        let mut input = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            input[[0, 0, y as usize, x as usize]] = f32::from(pixel[0]) / 255.0;
            input[[0, 1, y as usize, x as usize]] = f32::from(pixel[1]) / 255.0;
            input[[0, 2, y as usize, x as usize]] = f32::from(pixel[2]) / 255.0;
        }
        Ok(input)
    }

    /// Decode YOLO output `[1, 4 + classes, boxes]`: confidence filter,
    /// center-to-corner conversion, then per-class NMS.
    fn postprocess(&self, shape: &ort::value::Shape, data: &[f32]) -> Result<Vec<Detection>> {
        if shape.len() != 3 {
            return Err(CameraError::Detector(format!(
                "Unexpected output rank {} (expected 3)",
                shape.len()
            )));
        }

        let channels = shape[1] as usize;
        let boxes = shape[2] as usize;
        if channels < 5 {
            return Err(CameraError::Detector(format!(
                "Unexpected channel count {channels}"
            )));
        }
        let classes = channels - 4;
        let size = self.config.input_size as f32;

        let mut detections = Vec::new();
        for box_idx in 0..boxes {
            let x = data[box_idx];
            let y = data[boxes + box_idx];
            let w = data[2 * boxes + box_idx];
            let h = data[3 * boxes + box_idx];

            let mut best_score = 0.0f32;
            let mut best_class = 0usize;
            for class_id in 0..classes {
                let score = data[(4 + class_id) * boxes + box_idx];
                if score > best_score {
                    best_score = score;
                    best_class = class_id;
                }
            }

            if best_score < self.config.confidence_threshold {
                continue;
            }

            // The staff/customer model has exactly two classes; anything
            // else in the tensor is ignored.
            let class = match best_class {
                0 => DetectionClass::Staff,
                1 => DetectionClass::Customer,
                _ => continue,
            };

            detections.push(Detection {
                class,
                confidence: best_score,
                bbox: BoundingBox {
                    x: (x - w / 2.0) / size,
                    y: (y - h / 2.0) / size,
                    width: w / size,
                    height: h / size,
                },
            });
        }

        Ok(apply_nms(detections, self.config.iou_threshold))
    }
}

impl Detector for OnnxDetector {
    fn infer(&self, frame: &Frame) -> Result<Inference> {
        let started = Instant::now();

        let input = self.preprocess(frame)?;
        let input_value = Value::from_array(input)
            .map_err(|e| CameraError::Detector(format!("Failed to create ONNX value: {e}")))?;

        let detections = {
            let mut session = self
                .session
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let outputs = session
                .run(ort::inputs![input_value])
                .map_err(|e| CameraError::Detector(format!("ONNX inference failed: {e}")))?;

            let (shape, data) = outputs["output0"]
                .try_extract_tensor::<f32>()
                .map_err(|e| CameraError::Detector(format!("Failed to extract output: {e}")))?;
            self.postprocess(shape, data)?
        };

        let (staff_count, customer_count) = count_classes(&detections);
        Ok(Inference {
            detections,
            staff_count,
            customer_count,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

/// Intersection over union of two normalized boxes.
fn calculate_iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Non-maximum suppression within each class.
fn apply_nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::with_capacity(detections.len());
    while !detections.is_empty() {
        let current = detections.swap_remove(0);
        detections.retain(|d| {
            d.class != current.class || calculate_iou(&d.bbox, &current.bbox) < iou_threshold
        });
        keep.push(current);
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(class: DetectionClass, confidence: f32, x: f32, y: f32) -> Detection {
        Detection {
            class,
            confidence,
            bbox: BoundingBox {
                x,
                y,
                width: 0.2,
                height: 0.2,
            },
        }
    }

    #[test]
    fn test_iou_disjoint_and_identical() {
        let a = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 0.2,
            height: 0.2,
        };
        let b = BoundingBox {
            x: 0.5,
            y: 0.5,
            width: 0.2,
            height: 0.2,
        };
        assert_eq!(calculate_iou(&a, &b), 0.0);
        assert!((calculate_iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping_same_class() {
        let detections = vec![
            boxed(DetectionClass::Staff, 0.9, 0.10, 0.10),
            boxed(DetectionClass::Staff, 0.6, 0.11, 0.11),
            boxed(DetectionClass::Staff, 0.8, 0.70, 0.70),
        ];
        let kept = apply_nms(detections, 0.45);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|d| d.confidence >= 0.8));
    }

    #[test]
    fn test_nms_keeps_overlapping_different_classes() {
        let detections = vec![
            boxed(DetectionClass::Staff, 0.9, 0.10, 0.10),
            boxed(DetectionClass::Customer, 0.6, 0.11, 0.11),
        ];
        let kept = apply_nms(detections, 0.45);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_default_config_matches_deployment() {
        let config = DetectorConfig::default();
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.iou_threshold, 0.45);
        assert_eq!(config.input_size, 640);
    }
}
