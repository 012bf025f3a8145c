//! Inference boundary consumed by the session registry

use storewatch_common::{Detection, DetectionClass, Frame, Inference, Result};

/// Synchronous, blocking person detector.
///
/// `infer` may take tens of milliseconds (GPU-accelerated models included);
/// callers own the decision to run it inline on a decode thread or to
/// offload it to a worker pool.
pub trait Detector: Send + Sync {
    /// Run one detection pass over a frame.
    ///
    /// # Errors
    ///
    /// Model or runtime failures surface as `CameraError::Detector`.
    fn infer(&self, frame: &Frame) -> Result<Inference>;
}

/// Tally staff and customer detections.
#[must_use]
pub fn count_classes(detections: &[Detection]) -> (u32, u32) {
    let mut staff = 0;
    let mut customer = 0;
    for detection in detections {
        match detection.class {
            DetectionClass::Staff => staff += 1,
            DetectionClass::Customer => customer += 1,
        }
    }
    (staff, customer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storewatch_common::BoundingBox;

    fn detection(class: DetectionClass) -> Detection {
        Detection {
            class,
            confidence: 0.9,
            bbox: BoundingBox {
                x: 0.1,
                y: 0.1,
                width: 0.2,
                height: 0.4,
            },
        }
    }

    #[test]
    fn test_count_classes() {
        let detections = vec![
            detection(DetectionClass::Staff),
            detection(DetectionClass::Customer),
            detection(DetectionClass::Customer),
        ];
        assert_eq!(count_classes(&detections), (1, 2));
        assert_eq!(count_classes(&[]), (0, 0));
    }
}
