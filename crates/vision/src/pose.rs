//! Geometric head-pose estimation.
//!
//! Derives yaw, pitch, and roll from the six detector landmarks without any
//! further inference. The model is a rough approximation: it treats the face
//! as flat and maps landmark ratios to degrees with fixed gains. It is good
//! enough to tell "facing the screen" from "looking away", and nothing more.
//!
//! Conventions (image coordinates, y down):
//! - yaw is positive when the nose sits right of the eye midpoint in the image;
//! - pitch is positive when the nose drops towards the mouth (looking down);
//! - roll is the eye-line angle, positive when the left eye (image right) is lower.

use mochi_common::error::{MochiError, MochiResult};
use serde::{Deserialize, Serialize};

use crate::detector::{Landmark, LANDMARK_COUNT};
use crate::frame::Point;

/// Degrees of yaw per unit of nose offset (in inter-ocular distances).
pub const DEFAULT_YAW_GAIN: f32 = 90.0;

/// Degrees of pitch per unit of eye-nose / eye-mouth ratio deviation.
pub const DEFAULT_PITCH_GAIN: f32 = 120.0;

/// Eye-to-nose over eye-to-mouth distance for a frontal face.
pub const NEUTRAL_PITCH_RATIO: f32 = 0.45;

/// Distances below this many pixels make the geometry degenerate.
const MIN_SPAN_PX: f32 = 1e-3;

/// Head orientation in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
}

/// Landmark-based pose estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseEstimator {
    yaw_gain: f32,
    pitch_gain: f32,
    neutral_pitch_ratio: f32,
}

impl Default for PoseEstimator {
    fn default() -> Self {
        Self {
            yaw_gain: DEFAULT_YAW_GAIN,
            pitch_gain: DEFAULT_PITCH_GAIN,
            neutral_pitch_ratio: NEUTRAL_PITCH_RATIO,
        }
    }
}

impl PoseEstimator {
    pub fn with_gains(yaw_gain: f32, pitch_gain: f32, neutral_pitch_ratio: f32) -> Self {
        Self {
            yaw_gain,
            pitch_gain,
            neutral_pitch_ratio,
        }
    }

    /// Estimate the head pose from landmarks in detector order.
    pub fn estimate(&self, landmarks: &[Point]) -> MochiResult<HeadPose> {
        if landmarks.len() != LANDMARK_COUNT {
            return Err(MochiError::invalid_landmarks(format!(
                "expected {LANDMARK_COUNT} landmarks, got {}",
                landmarks.len()
            )));
        }
        if let Some(i) = landmarks.iter().position(|p| !p.is_finite()) {
            return Err(MochiError::invalid_landmarks(format!(
                "landmark {i} is not finite"
            )));
        }

        let right_eye = landmarks[Landmark::RightEye.index()];
        let left_eye = landmarks[Landmark::LeftEye.index()];
        let nose = landmarks[Landmark::Nose.index()];
        let mouth = landmarks[Landmark::Mouth.index()];

        let interocular = right_eye.distance(&left_eye);
        if interocular < MIN_SPAN_PX {
            return Err(MochiError::invalid_landmarks("eyes coincide"));
        }
        let eye_mid = right_eye.midpoint(&left_eye);
        let eye_to_mouth = mouth.y - eye_mid.y;
        if eye_to_mouth.abs() < MIN_SPAN_PX {
            return Err(MochiError::invalid_landmarks("mouth is level with the eyes"));
        }

        let yaw = (nose.x - eye_mid.x) / interocular * self.yaw_gain;
        let pitch =
            ((nose.y - eye_mid.y) / eye_to_mouth - self.neutral_pitch_ratio) * self.pitch_gain;
        let roll = (left_eye.y - right_eye.y)
            .atan2(left_eye.x - right_eye.x)
            .to_degrees();

        Ok(HeadPose {
            yaw: yaw.clamp(-90.0, 90.0),
            pitch: pitch.clamp(-90.0, 90.0),
            roll,
        })
    }
}

/// Estimate with the default gains.
pub fn estimate(landmarks: &[Point]) -> MochiResult<HeadPose> {
    PoseEstimator::default().estimate(landmarks)
}
