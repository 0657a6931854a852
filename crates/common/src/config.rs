//! Application configuration.
//!
//! Everything the vision pipeline and the pet state machine need is fixed at
//! construction time through [`PipelineConfig`]; it is never mutated while a
//! pipeline is running.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MochiError, MochiResult};

/// Global application configuration as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Frame acquisition settings.
    pub capture: CaptureSettings,

    /// Face detector settings.
    pub detector: DetectorSettings,

    /// Focus scoring settings.
    pub focus: FocusSettings,

    /// Pet state machine thresholds.
    pub pet: PetSettings,

    /// Preview side channel.
    pub preview: PreviewSettings,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Which frame source implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A real camera device.
    Camera,
    /// Deterministic generated frames.
    Synthetic,
}

/// Scripted behaviour of the synthetic frame generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SceneScript {
    /// A still, attentive face in the middle of the frame.
    Attentive,
    /// The head turns left and right with the given amplitude (fraction of
    /// the inter-ocular distance) over `period_frames` frames.
    Sway { period_frames: u32, amplitude: f32 },
    /// The head stays turned to one side.
    LookAway { offset: f32 },
    /// The face is present for `present_frames`, then gone for `absent_frames`.
    Intermittent {
        present_frames: u32,
        absent_frames: u32,
    },
    /// Empty room.
    Empty,
}

/// Frame acquisition settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Source selected at runtime.
    pub source: SourceKind,

    /// Camera device index (`/dev/videoN` on Linux).
    pub device_index: u32,

    /// Capture rate in frames per second.
    pub fps: u32,

    /// Target frame width in pixels.
    pub width: u32,

    /// Target frame height in pixels.
    pub height: u32,

    /// Fall back to the synthetic source when the camera cannot be opened.
    /// The fallback always runs the marker detector, since the generated
    /// face is only recognisable by its markers.
    pub fallback_to_synthetic: bool,

    /// Frames older than this are treated as stale. `None` means twice the
    /// capture interval.
    pub stale_timeout_ms: Option<u64>,

    /// Script used by the synthetic source.
    pub scene: SceneScript,
}

/// Inference backend for the face detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorBackend {
    /// BlazeFace ONNX model (requires the `onnx` feature). The default, paired
    /// with the default camera source.
    Onnx,
    /// Colour-marker locator matching the synthetic source.
    Marker,
}

/// Face detector settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Backend selected at runtime.
    pub backend: DetectorBackend,

    /// Path to the BlazeFace ONNX model.
    pub model_path: PathBuf,

    /// Optional anchors file (`.npy`, float32 [896, 2]).
    pub anchors_path: Option<PathBuf>,

    /// Minimum confidence for a candidate to be accepted.
    pub min_confidence: f32,

    /// Square model input size in pixels.
    pub input_size: u32,
}

/// Focus scoring settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusSettings {
    /// Inference rate; must divide the capture rate.
    pub inference_fps: u32,

    /// Head rotation (degrees) tolerated before the score is penalized.
    pub deviation_tolerance_deg: f32,

    /// Score lost per degree of yaw or pitch beyond the tolerance.
    pub penalty_per_degree: f32,

    /// EMA weight of the newest raw score, in (0, 1].
    pub smoothing_alpha: f32,
}

/// Pet state machine thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PetSettings {
    /// Score at or above which the user counts as focused.
    pub focus_threshold: f32,

    /// Score above which focus counts towards the long-focus streak.
    pub high_focus_threshold: f32,

    /// Continuous high focus needed to become excited (minutes).
    pub long_focus_minutes: f32,

    /// Continuous absence needed to fall asleep (seconds).
    pub absence_timeout_secs: f32,

    /// How long a focused/distracted reading must persist before the mood
    /// follows it (seconds).
    pub confirm_secs: f32,

    /// How long a gesture keeps the pet interacting (seconds).
    pub interact_secs: f32,

    /// Largest gap between two updates credited to the focus total (ms).
    pub max_focus_credit_ms: u64,
}

/// Preview side channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    /// Whether preview frames are produced at all.
    pub enabled: bool,

    /// Preview rate (frames per second), lower than the capture rate.
    pub fps: u32,

    /// Width of the downsampled preview; height keeps the aspect ratio.
    pub width: u32,

    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "mochi_vision=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Include thread names (capture and inference run on their own threads).
    pub thread_names: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source: SourceKind::Camera,
            device_index: 0,
            fps: 10,
            width: 320,
            height: 240,
            fallback_to_synthetic: true,
            stale_timeout_ms: None,
            scene: SceneScript::Attentive,
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DetectorBackend::Onnx,
            model_path: PathBuf::from("resources/models/blazeface.onnx"),
            anchors_path: Some(PathBuf::from("resources/models/anchors.npy")),
            min_confidence: 0.5,
            input_size: 128,
        }
    }
}

impl Default for FocusSettings {
    fn default() -> Self {
        Self {
            inference_fps: 5,
            deviation_tolerance_deg: 20.0,
            penalty_per_degree: 0.02,
            smoothing_alpha: 0.4,
        }
    }
}

impl Default for PetSettings {
    fn default() -> Self {
        Self {
            focus_threshold: 0.5,
            high_focus_threshold: 0.7,
            long_focus_minutes: 25.0,
            absence_timeout_secs: 5.0,
            confirm_secs: 3.0,
            interact_secs: 2.0,
            max_focus_credit_ms: 1_000,
        }
    }
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            fps: 3,
            width: 160,
            jpeg_quality: 70,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            thread_names: false,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load and parse config from an explicit path.
    pub fn load_from(path: impl AsRef<Path>) -> MochiResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MochiError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> MochiResult<()> {
        self.save_to(config_file_path())
    }

    /// Save config to an explicit path, creating parent directories.
    pub fn save_to(&self, path: impl AsRef<Path>) -> MochiResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Validated, immutable pipeline configuration.
    pub fn pipeline(&self) -> MochiResult<PipelineConfig> {
        let pipeline = PipelineConfig {
            capture: self.capture.clone(),
            detector: self.detector.clone(),
            focus: self.focus.clone(),
            pet: self.pet.clone(),
            preview: self.preview.clone(),
        };
        pipeline.validate()?;
        Ok(pipeline)
    }
}

/// Fastest capture rate a pipeline accepts.
pub const MAX_CAPTURE_FPS: u32 = 1_000;

/// Immutable configuration handed to a pipeline at construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub capture: CaptureSettings,
    pub detector: DetectorSettings,
    pub focus: FocusSettings,
    pub pet: PetSettings,
    pub preview: PreviewSettings,
}

impl PipelineConfig {
    /// Check rates and thresholds for consistency.
    pub fn validate(&self) -> MochiResult<()> {
        let capture_fps = self.capture.fps;
        let inference_fps = self.focus.inference_fps;

        if capture_fps == 0 || inference_fps == 0 {
            return Err(MochiError::config("frame rates must be positive"));
        }
        if capture_fps > MAX_CAPTURE_FPS {
            return Err(MochiError::config(format!(
                "capture rate {capture_fps} fps exceeds {MAX_CAPTURE_FPS} fps"
            )));
        }
        if inference_fps > capture_fps || capture_fps % inference_fps != 0 {
            return Err(MochiError::config(format!(
                "inference rate {inference_fps} fps must divide capture rate {capture_fps} fps"
            )));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(MochiError::config("capture resolution must be non-zero"));
        }
        if self.detector.input_size == 0 {
            return Err(MochiError::config("detector input size must be non-zero"));
        }

        for (name, value) in [
            ("detector.min_confidence", self.detector.min_confidence),
            ("pet.focus_threshold", self.pet.focus_threshold),
            ("pet.high_focus_threshold", self.pet.high_focus_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MochiError::config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        let alpha = self.focus.smoothing_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(MochiError::config(format!(
                "focus.smoothing_alpha must be within (0, 1], got {alpha}"
            )));
        }
        if self.focus.deviation_tolerance_deg < 0.0 || self.focus.penalty_per_degree < 0.0 {
            return Err(MochiError::config("focus penalties must be non-negative"));
        }

        for (name, value) in [
            ("pet.long_focus_minutes", self.pet.long_focus_minutes),
            ("pet.absence_timeout_secs", self.pet.absence_timeout_secs),
            ("pet.confirm_secs", self.pet.confirm_secs),
            ("pet.interact_secs", self.pet.interact_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(MochiError::config(format!(
                    "{name} must be a non-negative duration, got {value}"
                )));
            }
        }

        if self.preview.enabled && (self.preview.fps == 0 || self.preview.width == 0) {
            return Err(MochiError::config("preview rate and width must be positive"));
        }

        Ok(())
    }

    /// Number of capture ticks per inference cycle.
    pub fn inference_stride(&self) -> u32 {
        (self.capture.fps / self.focus.inference_fps.max(1)).max(1)
    }

    /// Expected interval between two captured frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.capture.fps.max(1)
    }

    /// Age after which the latest frame no longer counts as current.
    pub fn stale_timeout(&self) -> Duration {
        self.capture
            .stale_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.frame_interval() * 2)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("focus-mochi").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_is_valid() {
        let pipeline = AppConfig::default().pipeline().unwrap();
        assert_eq!(pipeline.inference_stride(), 2);
        assert_eq!(pipeline.frame_interval(), Duration::from_millis(100));
        assert_eq!(pipeline.stale_timeout(), Duration::from_millis(200));
    }

    #[test]
    fn explicit_stale_timeout_wins() {
        let mut pipeline = PipelineConfig::default();
        pipeline.capture.stale_timeout_ms = Some(750);
        assert_eq!(pipeline.stale_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn inference_rate_must_divide_capture_rate() {
        let mut config = AppConfig::default();
        config.focus.inference_fps = 3;
        let err = config.pipeline().unwrap_err();
        assert!(err.to_string().contains("must divide"));

        config.focus.inference_fps = 20;
        assert!(config.pipeline().is_err());
    }

    #[test]
    fn capture_rate_is_bounded() {
        let mut config = AppConfig::default();
        config.capture.fps = 2_000;
        config.focus.inference_fps = 1_000;
        let err = config.pipeline().unwrap_err();
        assert!(matches!(err, MochiError::Config { .. }));

        config.capture.fps = MAX_CAPTURE_FPS;
        let pipeline = config.pipeline().unwrap();
        assert_eq!(pipeline.frame_interval(), Duration::from_millis(1));
        assert_eq!(pipeline.stale_timeout(), Duration::from_millis(2));
    }

    #[test]
    fn frame_interval_keeps_sub_millisecond_precision() {
        let mut pipeline = PipelineConfig::default();
        pipeline.capture.fps = 3;
        assert_eq!(pipeline.frame_interval(), Duration::from_nanos(333_333_333));
        pipeline.capture.fps = 999;
        assert!(!pipeline.frame_interval().is_zero());
    }

    #[test]
    fn thresholds_outside_unit_interval_are_rejected() {
        let mut config = AppConfig::default();
        config.pet.high_focus_threshold = 1.5;
        assert!(config.pipeline().is_err());

        let mut config = AppConfig::default();
        config.focus.smoothing_alpha = 0.0;
        assert!(config.pipeline().is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.capture.source = SourceKind::Synthetic;
        config.capture.scene = SceneScript::Sway {
            period_frames: 40,
            amplitude: 0.3,
        };
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let json = r#"{ "capture": { "source": "synthetic", "fps": 20 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.capture.source, SourceKind::Synthetic);
        assert_eq!(config.capture.fps, 20);
        assert_eq!(config.capture.width, 320);
        assert_eq!(config.focus, FocusSettings::default());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = AppConfig::load_from("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, MochiError::FileNotFound { .. }));
    }
}
