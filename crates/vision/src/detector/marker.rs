//! Colour-marker face model.
//!
//! Locates the solid landmark discs drawn by the synthetic source in the
//! letterboxed tensor. It goes through the same letterbox and inverse
//! mapping as the neural backend, which makes the whole pipeline runnable
//! without a camera or model files.

use mochi_common::error::MochiResult;

use super::{expect_len, Candidate, InferenceModel, InputTensor, LANDMARK_COUNT};
use crate::frame::{BBox, Point};
use crate::source::synthetic::{LANDMARK_COLORS, SKIN};

/// Largest per-channel difference still counted as a colour match.
const COLOR_TOLERANCE: u8 = 40;

/// Marker size (in model pixels) at which confidence saturates.
const FULL_MARKER_PIXELS: u32 = 4;

const MAX_CONFIDENCE: f32 = 0.95;

pub struct MarkerModel {
    input_size: u32,
}

impl MarkerModel {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    sum_x: f64,
    sum_y: f64,
    count: u32,
}

impl Accumulator {
    fn add(&mut self, x: f32, y: f32) {
        self.sum_x += x as f64;
        self.sum_y += y as f64;
        self.count += 1;
    }

    fn centroid(&self) -> Option<Point> {
        (self.count > 0).then(|| {
            Point::new(
                (self.sum_x / self.count as f64) as f32,
                (self.sum_y / self.count as f64) as f32,
            )
        })
    }
}

fn matches(pixel: [u8; 3], color: [u8; 3]) -> bool {
    pixel
        .iter()
        .zip(color)
        .all(|(p, c)| p.abs_diff(c) <= COLOR_TOLERANCE)
}

impl InferenceModel for MarkerModel {
    fn name(&self) -> &str {
        "marker"
    }

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn infer(&mut self, input: &InputTensor) -> MochiResult<Vec<Candidate>> {
        let size = input.size;
        expect_len("input tensor", input.data.len(), 3 * (size * size) as usize)?;

        let mut markers = [Accumulator::default(); LANDMARK_COUNT];
        let mut min = Point::new(f32::MAX, f32::MAX);
        let mut max = Point::new(f32::MIN, f32::MIN);

        for y in 0..size {
            for x in 0..size {
                let pixel = input.pixel(x, y);
                // Pixel centres, so centroids land on continuous coordinates.
                let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);

                let marker = LANDMARK_COLORS.iter().position(|c| matches(pixel, c.0));
                if let Some(i) = marker {
                    markers[i].add(px, py);
                }
                if marker.is_some() || matches(pixel, SKIN.0) {
                    min = Point::new(min.x.min(px - 0.5), min.y.min(py - 0.5));
                    max = Point::new(max.x.max(px + 0.5), max.y.max(py + 0.5));
                }
            }
        }

        let mut landmarks = [Point::default(); LANDMARK_COUNT];
        for (slot, acc) in landmarks.iter_mut().zip(&markers) {
            match acc.centroid() {
                Some(p) => *slot = p,
                None => return Ok(Vec::new()),
            }
        }

        let smallest = markers.iter().map(|m| m.count).min().unwrap_or(0);
        let score = MAX_CONFIDENCE * (smallest as f32 / FULL_MARKER_PIXELS as f32).min(1.0);

        Ok(vec![Candidate {
            bbox: BBox::from_corners(min, max),
            score,
            landmarks,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{FaceDetector, Landmark};
    use crate::frame::Frame;
    use crate::source::synthetic::render_scene;
    use mochi_common::config::SceneScript;

    /// Pixel-centre coordinates of a layout landmark.
    fn center_of(p: Point) -> Point {
        Point::new(p.x + 0.5, p.y + 0.5)
    }

    #[test]
    fn synthetic_landmarks_are_recovered_in_frame_pixels() {
        for (width, height) in [(320, 240), (640, 480), (240, 320), (1280, 720)] {
            let (image, layout) = render_scene(&SceneScript::Attentive, width, height, 0);
            let layout = layout.unwrap();
            let frame = Frame::from_rgb(image, 0, 0);

            let mut detector = FaceDetector::new(Box::new(MarkerModel::new(128)), 0.5);
            let detection = detector.detect(&frame).unwrap().expect("face expected");

            // One model pixel spans up to 1 / scale frame pixels.
            let scale = (128.0 / width as f32).min(128.0 / height as f32);
            let tolerance = 1.5 / scale;
            for (found, expected) in detection.landmarks.iter().zip(layout.landmarks) {
                let err = found.distance(&center_of(expected));
                assert!(err <= tolerance, "{width}x{height}: {found:?} vs {expected:?}");
            }

            let face_center = detection.bbox.center();
            assert!(face_center.distance(&layout.face.center()) <= 2.0 * tolerance);
            assert!(detection.confidence >= 0.5);
            if (width, height) == (320, 240) {
                assert!(detection.confidence >= 0.9);
            }
        }
    }

    #[test]
    fn turned_head_moves_the_nose() {
        let (image, layout) = render_scene(&SceneScript::LookAway { offset: 0.75 }, 320, 240, 0);
        let layout = layout.unwrap();
        let mut detector = FaceDetector::new(Box::new(MarkerModel::new(128)), 0.5);
        let detection = detector
            .detect(&Frame::from_rgb(image, 0, 0))
            .unwrap()
            .unwrap();

        let nose = detection.landmark(Landmark::Nose).unwrap();
        assert!(nose.distance(&center_of(layout.landmarks[2])) <= 4.0);
    }

    #[test]
    fn empty_scene_has_no_candidates() {
        let (image, layout) = render_scene(&SceneScript::Empty, 320, 240, 0);
        assert!(layout.is_none());
        let mut detector = FaceDetector::new(Box::new(MarkerModel::new(128)), 0.5);
        assert!(detector
            .detect(&Frame::from_rgb(image, 0, 0))
            .unwrap()
            .is_none());
    }
}
