//! Focus scoring and the published focus snapshot.

use mochi_common::config::FocusSettings;
use serde::{Deserialize, Serialize};

use crate::detector::Detection;
use crate::pose::HeadPose;

/// Snapshot published once per inference cycle.
///
/// When `face_present` is false the confidence and pose fields are zero.
/// Build values through [`FocusState::absent`] and [`FocusState::present`],
/// which keep that invariant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FocusState {
    pub face_present: bool,
    pub face_confidence: f32,
    pub focus_score: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub timestamp_ms: u64,
}

impl FocusState {
    /// No face in view; the smoothed score keeps decaying.
    pub fn absent(focus_score: f32, timestamp_ms: u64) -> Self {
        Self {
            focus_score: clamp_unit(focus_score),
            timestamp_ms,
            ..Self::default()
        }
    }

    pub fn present(
        face_confidence: f32,
        pose: HeadPose,
        focus_score: f32,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            face_present: true,
            face_confidence: clamp_unit(face_confidence),
            focus_score: clamp_unit(focus_score),
            yaw: pose.yaw,
            pitch: pose.pitch,
            roll: pose.roll,
            timestamp_ms,
        }
    }

    /// Same reading, re-stamped.
    pub fn restamped(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = self.timestamp_ms.max(timestamp_ms);
        self
    }
}

/// Clamp to [0, 1], mapping NaN to 0.
fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Turns per-cycle detections into a smoothed focus score.
#[derive(Debug, Clone)]
pub struct FocusScorer {
    deviation_tolerance_deg: f32,
    penalty_per_degree: f32,
    alpha: f32,
    smoothed: f32,
}

impl FocusScorer {
    pub fn new(settings: &FocusSettings) -> Self {
        Self {
            deviation_tolerance_deg: settings.deviation_tolerance_deg.max(0.0),
            penalty_per_degree: settings.penalty_per_degree.max(0.0),
            alpha: clamp_unit(settings.smoothing_alpha),
            smoothed: 0.0,
        }
    }

    /// Raw score for one cycle: confidence minus the head-turn penalty.
    ///
    /// A detection without a pose counts as facing the screen.
    pub fn raw_score(&self, detection: Option<&Detection>, pose: Option<&HeadPose>) -> f32 {
        let Some(detection) = detection else {
            return 0.0;
        };
        let excess = |angle: f32| {
            if angle.is_finite() {
                (angle.abs() - self.deviation_tolerance_deg).max(0.0)
            } else {
                180.0
            }
        };
        let penalty = pose
            .map(|p| (excess(p.yaw) + excess(p.pitch)) * self.penalty_per_degree)
            .unwrap_or(0.0);

        clamp_unit(clamp_unit(detection.confidence) - penalty)
    }

    /// Feed one cycle and return the new smoothed score.
    pub fn update(&mut self, detection: Option<&Detection>, pose: Option<&HeadPose>) -> f32 {
        let raw = self.raw_score(detection, pose);
        self.smoothed = clamp_unit(self.alpha * raw + (1.0 - self.alpha) * self.smoothed);
        self.smoothed
    }

    /// Current smoothed score.
    pub fn score(&self) -> f32 {
        self.smoothed
    }

    pub fn reset(&mut self) {
        self.smoothed = 0.0;
    }
}
