//! Deterministic synthetic frames.
//!
//! Renders a stylised face on a dark background. Each of the six landmarks
//! is a solid disc in its own colour, so [`crate::detector::MarkerModel`] can
//! find them again after letterboxing. The [`SceneScript`] decides per frame
//! whether the face is present and how far the head is turned.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_ellipse_mut};
use mochi_common::config::{CaptureSettings, SceneScript};
use mochi_common::error::MochiResult;

use crate::frame::{BBox, Point};
use crate::LANDMARK_COUNT;

use super::FrameSource;

pub const BACKGROUND: Rgb<u8> = Rgb([28, 30, 38]);
pub const SKIN: Rgb<u8> = Rgb([224, 182, 150]);

/// Marker colours in landmark order: right eye, left eye, nose, mouth,
/// right ear, left ear.
pub const LANDMARK_COLORS: [Rgb<u8>; LANDMARK_COUNT] = [
    Rgb([0, 90, 255]),
    Rgb([0, 200, 255]),
    Rgb([255, 0, 0]),
    Rgb([255, 0, 200]),
    Rgb([0, 200, 0]),
    Rgb([255, 220, 0]),
];

/// Layout at the 320x240 reference resolution, relative to the face centre.
const REFERENCE_SIZE: (f32, f32) = (320.0, 240.0);
const FACE_RADII: (f32, f32) = (50.0, 65.0);
const MARKER_RADIUS: f32 = 8.0;
const LANDMARK_OFFSETS: [(f32, f32); LANDMARK_COUNT] = [
    (-20.0, -15.0),
    (20.0, -15.0),
    (0.0, 3.0),
    (0.0, 25.0),
    (-50.0, -5.0),
    (50.0, -5.0),
];
const INTEROCULAR: f32 = 40.0;

/// What the script asks for on one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenePose {
    pub present: bool,
    /// Horizontal nose offset as a fraction of the inter-ocular distance.
    pub turn: f32,
}

impl ScenePose {
    pub fn at(scene: &SceneScript, index: u64) -> Self {
        match *scene {
            SceneScript::Attentive => Self::facing(0.0),
            SceneScript::Sway {
                period_frames,
                amplitude,
            } => {
                let period = period_frames.max(1) as f64;
                let phase = (index as f64 % period) / period * std::f64::consts::TAU;
                Self::facing(amplitude * phase.sin() as f32)
            }
            SceneScript::LookAway { offset } => Self::facing(offset),
            SceneScript::Intermittent {
                present_frames,
                absent_frames,
            } => {
                let cycle = (present_frames as u64 + absent_frames as u64).max(1);
                Self {
                    present: index % cycle < present_frames as u64,
                    turn: 0.0,
                }
            }
            SceneScript::Empty => Self {
                present: false,
                turn: 0.0,
            },
        }
    }

    fn facing(turn: f32) -> Self {
        Self {
            present: true,
            turn,
        }
    }
}

/// Pixel geometry of the synthetic face for one frame size and pose.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLayout {
    pub face: BBox,
    pub landmarks: [Point; LANDMARK_COUNT],
    pub marker_radius: i32,
}

impl FaceLayout {
    pub fn new(width: u32, height: u32, turn: f32) -> Self {
        let scale = (width as f32 / REFERENCE_SIZE.0).min(height as f32 / REFERENCE_SIZE.1);
        let cx = (width / 2) as f32;
        let cy = (height / 2) as f32;
        let shift = turn * INTEROCULAR;

        let landmarks = std::array::from_fn(|i| {
            let (dx, dy) = LANDMARK_OFFSETS[i];
            // Nose and mouth follow the head turn.
            let dx = if i == 2 || i == 3 { dx + shift } else { dx };
            Point::new((cx + dx * scale).round(), (cy + dy * scale).round())
        });

        let (rx, ry) = (FACE_RADII.0 * scale, FACE_RADII.1 * scale);
        Self {
            face: BBox::new(cx - rx, cy - ry, rx * 2.0, ry * 2.0),
            landmarks,
            marker_radius: (MARKER_RADIUS * scale).round().max(2.0) as i32,
        }
    }
}

/// Render one frame of `scene`. Returns the image and, when a face is drawn,
/// its layout.
pub fn render_scene(
    scene: &SceneScript,
    width: u32,
    height: u32,
    index: u64,
) -> (RgbImage, Option<FaceLayout>) {
    let mut image = RgbImage::from_pixel(width, height, BACKGROUND);
    let pose = ScenePose::at(scene, index);
    if !pose.present {
        return (image, None);
    }

    let layout = FaceLayout::new(width, height, pose.turn);
    let center = layout.face.center();
    draw_filled_ellipse_mut(
        &mut image,
        (center.x as i32, center.y as i32),
        (layout.face.w / 2.0) as i32,
        (layout.face.h / 2.0) as i32,
        SKIN,
    );
    for (point, color) in layout.landmarks.iter().zip(LANDMARK_COLORS) {
        draw_filled_circle_mut(
            &mut image,
            (point.x as i32, point.y as i32),
            layout.marker_radius,
            color,
        );
    }

    (image, Some(layout))
}

/// Frame source that renders a scripted scene.
pub struct SyntheticSource {
    scene: SceneScript,
    width: u32,
    height: u32,
    index: u64,
    open: bool,
}

impl SyntheticSource {
    pub fn new(scene: SceneScript) -> Self {
        Self {
            scene,
            width: REFERENCE_SIZE.0 as u32,
            height: REFERENCE_SIZE.1 as u32,
            index: 0,
            open: false,
        }
    }

    pub fn scene(&self) -> &SceneScript {
        &self.scene
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&mut self, settings: &CaptureSettings) -> MochiResult<()> {
        self.width = settings.width;
        self.height = settings.height;
        self.index = 0;
        self.open = true;
        tracing::debug!(
            scene = ?self.scene,
            width = self.width,
            height = self.height,
            "Synthetic source opened"
        );
        Ok(())
    }

    fn grab(&mut self) -> MochiResult<Option<RgbImage>> {
        if !self.open {
            return Err(mochi_common::error::MochiError::capture(
                "synthetic source is not open",
            ));
        }
        let (image, _) = render_scene(&self.scene, self.width, self.height, self.index);
        self.index += 1;
        Ok(Some(image))
    }

    fn close(&mut self) {
        self.open = false;
    }
}
