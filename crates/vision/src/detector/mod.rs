//! Face detection.
//!
//! [`FaceDetector`] letterboxes a frame, runs an [`InferenceModel`] on the
//! fixed-shape tensor, keeps the most confident candidate, and maps it back
//! to frame pixels. It holds no state between frames.

pub mod blazeface;
pub mod letterbox;
pub mod marker;

use mochi_common::config::{DetectorBackend, DetectorSettings};
use mochi_common::error::{MochiError, MochiResult};
use serde::{Deserialize, Serialize};

use crate::frame::{BBox, Frame, Point};

pub use letterbox::{letterbox, InputTensor, LetterboxMeta, Letterboxed};
pub use marker::MarkerModel;

/// Number of facial landmarks every model reports.
pub const LANDMARK_COUNT: usize = 6;

/// Landmark order shared by all models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Landmark {
    RightEye = 0,
    LeftEye = 1,
    Nose = 2,
    Mouth = 3,
    RightEar = 4,
    LeftEar = 5,
}

impl Landmark {
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// One raw model output, in model-input pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub bbox: BBox,
    pub score: f32,
    pub landmarks: [Point; LANDMARK_COUNT],
}

/// A face found in a frame, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    /// In [0, 1].
    pub confidence: f32,
    pub landmarks: Vec<Point>,
}

impl Detection {
    pub fn landmark(&self, which: Landmark) -> Option<Point> {
        self.landmarks.get(which.index()).copied()
    }
}

/// A fixed-shape face model.
pub trait InferenceModel: Send {
    fn name(&self) -> &str;

    /// Side of the square input the model expects.
    fn input_size(&self) -> u32;

    /// Run one inference pass over a letterboxed tensor.
    fn infer(&mut self, input: &InputTensor) -> MochiResult<Vec<Candidate>>;
}

/// Stateless single-face detector.
pub struct FaceDetector {
    model: Box<dyn InferenceModel>,
    min_confidence: f32,
}

impl FaceDetector {
    pub fn new(model: Box<dyn InferenceModel>, min_confidence: f32) -> Self {
        Self {
            model,
            min_confidence,
        }
    }

    /// Build the configured backend.
    pub fn from_settings(settings: &DetectorSettings) -> MochiResult<Self> {
        let model: Box<dyn InferenceModel> = match settings.backend {
            DetectorBackend::Marker => Box::new(MarkerModel::new(settings.input_size)),
            DetectorBackend::Onnx => load_onnx(settings)?,
        };
        tracing::info!(
            model = model.name(),
            input_size = model.input_size(),
            min_confidence = settings.min_confidence,
            "Face detector ready"
        );
        Ok(Self::new(model, settings.min_confidence))
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    /// Detect the most confident face in `frame`.
    ///
    /// Returns `Ok(None)` when no candidate reaches the confidence floor and
    /// an `Inference` error when the frame or model output is unusable.
    pub fn detect(&mut self, frame: &Frame) -> MochiResult<Option<Detection>> {
        let boxed = letterbox(frame, self.model.input_size())?;
        let candidates = self.model.infer(&boxed.tensor)?;
        let total = candidates.len();

        let best = candidates
            .into_iter()
            .filter(|c| c.score.is_finite() && c.score >= self.min_confidence)
            .max_by(|a, b| a.score.total_cmp(&b.score));

        let Some(best) = best else {
            tracing::trace!(frame = frame.seq, candidates = total, "No face above threshold");
            return Ok(None);
        };

        Ok(Some(Detection {
            bbox: boxed.meta.box_to_frame(best.bbox),
            confidence: best.score.clamp(0.0, 1.0),
            landmarks: best
                .landmarks
                .iter()
                .map(|p| boxed.meta.to_frame(*p))
                .collect(),
        }))
    }
}

#[cfg(feature = "onnx")]
fn load_onnx(settings: &DetectorSettings) -> MochiResult<Box<dyn InferenceModel>> {
    Ok(Box::new(blazeface::BlazeFaceModel::load(settings)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(_settings: &DetectorSettings) -> MochiResult<Box<dyn InferenceModel>> {
    Err(MochiError::model_load(
        "ONNX backend requested but this build has no ONNX support (enable the `onnx` feature)",
    ))
}

/// Whether this build can run the BlazeFace model.
pub fn onnx_support_compiled() -> bool {
    cfg!(feature = "onnx")
}

/// Greedy non-maximum suppression: keep the best candidate of every group
/// overlapping by more than `iou_threshold`. Output is sorted by score.
pub fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

/// Check a model output length, reporting a mismatch as an inference error.
pub(crate) fn expect_len(what: &str, actual: usize, expected: usize) -> MochiResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(MochiError::inference(format!(
            "{what} has {actual} values, expected {expected}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    /// Model that returns fixed candidates.
    struct FixedModel(Vec<Candidate>);

    impl InferenceModel for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }

        fn input_size(&self) -> u32 {
            128
        }

        fn infer(&mut self, _input: &InputTensor) -> MochiResult<Vec<Candidate>> {
            Ok(self.0.clone())
        }
    }

    fn candidate(score: f32, x: f32) -> Candidate {
        Candidate {
            bbox: BBox::new(x, 40.0, 20.0, 20.0),
            score,
            landmarks: [Point::new(x + 10.0, 50.0); LANDMARK_COUNT],
        }
    }

    #[test]
    fn best_candidate_above_threshold_wins() {
        let model = FixedModel(vec![
            candidate(0.3, 10.0),
            candidate(0.9, 60.0),
            candidate(0.7, 100.0),
            candidate(f32::NAN, 0.0),
        ]);
        let mut detector = FaceDetector::new(Box::new(model), 0.5);
        let frame = Frame::from_rgb(RgbImage::new(320, 240), 0, 0);

        let detection = detector.detect(&frame).unwrap().unwrap();
        assert!((detection.confidence - 0.9).abs() < 1e-6);
        // Model x 70 -> frame x 175 (scale 0.4, no horizontal padding).
        let nose = detection.landmark(Landmark::Nose).unwrap();
        assert!((nose.x - 175.0).abs() < 1e-3);
        // Model y 50 -> frame y (50 - 16) / 0.4 = 85.
        assert!((nose.y - 85.0).abs() < 1e-3);
        assert_eq!(detection.landmarks.len(), LANDMARK_COUNT);
    }

    #[test]
    fn nothing_above_threshold_is_no_face() {
        let model = FixedModel(vec![candidate(0.49, 10.0)]);
        let mut detector = FaceDetector::new(Box::new(model), 0.5);
        let frame = Frame::from_rgb(RgbImage::new(64, 64), 0, 0);
        assert!(detector.detect(&frame).unwrap().is_none());
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        let model = FixedModel(vec![candidate(3.5, 10.0)]);
        let mut detector = FaceDetector::new(Box::new(model), 0.5);
        let frame = Frame::from_rgb(RgbImage::new(64, 64), 0, 0);
        let detection = detector.detect(&frame).unwrap().unwrap();
        assert_eq!(detection.confidence, 1.0);
    }

    #[test]
    fn malformed_frame_is_an_inference_error() {
        let mut detector = FaceDetector::new(Box::new(FixedModel(vec![])), 0.5);
        let mut frame = Frame::from_rgb(RgbImage::new(64, 64), 0, 0);
        frame.data.truncate(100);
        let err = detector.detect(&frame).unwrap_err();
        assert!(matches!(err, MochiError::Inference { .. }));
    }

    #[test]
    fn nms_keeps_best_of_overlapping_group() {
        let kept = non_max_suppression(
            vec![
                candidate(0.6, 10.0),
                candidate(0.8, 12.0),
                candidate(0.7, 80.0),
            ],
            0.3,
        );
        let scores: Vec<f32> = kept.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.8, 0.7]);
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn onnx_backend_without_support_fails_to_load() {
        let settings = DetectorSettings::default();
        let err = FaceDetector::from_settings(&settings).err().unwrap();
        assert!(matches!(err, MochiError::ModelLoad { .. }));
    }
}
