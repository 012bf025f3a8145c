//! Detection overlay rendering and snapshot encoding
//!
//! Draws the deployment's annotation style: green boxes for staff, red for
//! customers, a filled label bar with class name and confidence percent,
//! and a black summary block (staff count, customer count, inference
//! latency) in the top-left corner. Label and summary text need a TTF font
//! supplied at runtime; without one, boxes and bars are still drawn.

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;
use storewatch_common::{CameraError, DetectionClass, Frame, Inference, Result};
use tracing::warn;

const STAFF_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const CUSTOMER_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

const LABEL_BAR_HEIGHT: u32 = 18;
const FONT_SCALE: f32 = 16.0;
const JPEG_QUALITY: u8 = 85;

fn class_color(class: DetectionClass) -> Rgb<u8> {
    match class {
        DetectionClass::Staff => STAFF_COLOR,
        DetectionClass::Customer => CUSTOMER_COLOR,
    }
}

/// Renders annotated frames and encodes JPEG snapshots.
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Annotator without text rendering (boxes and bars only).
    #[must_use]
    pub fn new() -> Self {
        Self { font: None }
    }

    /// Annotator with label/summary text from a TTF file.
    ///
    /// A missing or invalid font is logged and degrades to the no-text
    /// annotator rather than failing the pipeline.
    #[must_use]
    pub fn with_font_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let font = match std::fs::read(path) {
            Ok(data) => match FontVec::try_from_vec(data) {
                Ok(font) => Some(font),
                Err(e) => {
                    warn!("Invalid font file {}: {e}", path.display());
                    None
                }
            },
            Err(e) => {
                warn!("Cannot read font file {}: {e}", path.display());
                None
            }
        };
        Self { font }
    }

    /// Draw detections and the summary overlay onto a copy of the frame.
    ///
    /// # Errors
    ///
    /// Fails if the frame buffer does not match its stated dimensions.
    pub fn annotate(&self, frame: &Frame, inference: &Inference) -> Result<RgbImage> {
        let mut image = RgbImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| {
                CameraError::Detector("Frame buffer does not match dimensions".to_string())
            })?;

        let frame_w = frame.width as f32;
        let frame_h = frame.height as f32;

        for detection in &inference.detections {
            let color = class_color(detection.class);
            let bbox = detection.bbox;

            let x = (bbox.x * frame_w).max(0.0) as i32;
            let y = (bbox.y * frame_h).max(0.0) as i32;
            let w = ((bbox.width * frame_w) as u32).clamp(1, frame.width);
            let h = ((bbox.height * frame_h) as u32).clamp(1, frame.height);

            draw_hollow_rect_mut(&mut image, Rect::at(x, y).of_size(w, h), color);

            // Filled label bar sitting on top of the box.
            let bar_y = (y - LABEL_BAR_HEIGHT as i32).max(0);
            let bar_w = w.min(120);
            draw_filled_rect_mut(
                &mut image,
                Rect::at(x, bar_y).of_size(bar_w, LABEL_BAR_HEIGHT),
                color,
            );

            if let Some(font) = &self.font {
                let label = format!(
                    "{}: {:.0}%",
                    detection.class.label(),
                    detection.confidence * 100.0
                );
                let text_color = match detection.class {
                    DetectionClass::Staff => BLACK,
                    DetectionClass::Customer => WHITE,
                };
                draw_text_mut(
                    &mut image,
                    text_color,
                    x + 2,
                    bar_y + 1,
                    PxScale::from(FONT_SCALE),
                    font,
                    &label,
                );
            }
        }

        self.draw_summary(&mut image, inference);
        Ok(image)
    }

    /// Top-left summary block with counts and latency.
    fn draw_summary(&self, image: &mut RgbImage, inference: &Inference) {
        let width = image.width();
        let height = image.height();
        if width < 240 || height < 100 {
            // Tiny frames (tests, thumbnails) get boxes only.
            return;
        }

        draw_filled_rect_mut(image, Rect::at(10, 10).of_size(220, 80), OVERLAY_COLOR);

        if let Some(font) = &self.font {
            let scale = PxScale::from(FONT_SCALE);
            draw_text_mut(
                image,
                STAFF_COLOR,
                20,
                16,
                scale,
                font,
                &format!("Staff: {}", inference.staff_count),
            );
            draw_text_mut(
                image,
                CUSTOMER_COLOR,
                20,
                40,
                scale,
                font,
                &format!("Customers: {}", inference.customer_count),
            );
            draw_text_mut(
                image,
                WHITE,
                20,
                64,
                scale,
                font,
                &format!("Inference: {:.1} ms", inference.elapsed_ms),
            );
        }
    }

    /// Encode an annotated image as JPEG.
    ///
    /// # Errors
    ///
    /// Fails on encoder errors (never in practice for well-formed RGB input).
    pub fn encode_jpeg(&self, image: &RgbImage) -> Result<Vec<u8>> {
        let mut encoded = Vec::new();
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY);
        encoder
            .encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| CameraError::Detector(format!("Failed to encode snapshot: {e}")))?;
        Ok(encoded)
    }

    /// Annotate and encode in one step (the snapshot publication path).
    ///
    /// # Errors
    ///
    /// Propagates annotation and encoding failures.
    pub fn render(&self, frame: &Frame, inference: &Inference) -> Result<Vec<u8>> {
        let image = self.annotate(frame, inference)?;
        self.encode_jpeg(&image)
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}
