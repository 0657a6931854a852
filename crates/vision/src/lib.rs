//! FocusMochi Vision Pipeline
//!
//! Turns a stream of camera frames into a stream of [`FocusState`] snapshots.
//! Capture runs on its own thread and always keeps only the newest frame.
//! Inference runs at a lower rate on a single worker; a cycle that would
//! overlap the previous one is skipped rather than queued.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  Latest<Frame>  ┌──────────────┐   ┌────────────┐
//! │ FrameSource  │────────────────▶│ FaceDetector │──▶│ Pose       │
//! │ camera or    │                 │ letterbox +  │   │ Estimator  │
//! │ synthetic    │                 │ model + NMS  │   └─────┬──────┘
//! └──────────────┘                 └──────────────┘         │
//!                                                           ▼
//!                                  ┌──────────────┐   ┌────────────┐
//!              Latest<FocusState>◀─│VisionHandle  │◀──│ Focus      │
//!                                  │ (tick loop)  │   │ Scorer     │
//!                                  └──────────────┘   └────────────┘
//! ```
//!
//! The camera backend needs the `camera` feature (GStreamer) and the
//! BlazeFace backend needs the `onnx` feature (ONNX Runtime). The synthetic
//! source and the marker model are always available.

pub mod detector;
pub mod focus;
pub mod frame;
pub mod pose;
pub mod preview;
pub mod processor;
pub mod source;

pub use detector::{
    Candidate, Detection, FaceDetector, InferenceModel, Landmark, MarkerModel, LANDMARK_COUNT,
};
pub use focus::{FocusScorer, FocusState};
pub use frame::{BBox, Frame, Point};
pub use pose::{HeadPose, PoseEstimator};
pub use preview::{PreviewEncoder, PreviewFrame};
pub use processor::{PipelineStats, VisionHandle, VisionProcessor};
pub use source::{
    CameraSource, CaptureStats, FrameCapture, FrameSource, SourceStatus, SyntheticSource,
};
