//! Error types shared across FocusMochi crates.

use std::path::PathBuf;

/// Top-level error type for FocusMochi operations.
#[derive(Debug, thiserror::Error)]
pub enum MochiError {
    #[error("Device unavailable: {message}")]
    DeviceUnavailable { message: String },

    #[error("Inference error: {message}")]
    Inference { message: String },

    #[error("Invalid landmarks: {message}")]
    InvalidLandmarks { message: String },

    #[error("Stale frame: no new frame for {age_ms} ms")]
    StaleFrame { age_ms: u64 },

    #[error("Model load error: {message}")]
    ModelLoad { message: String },

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{what} is already running")]
    AlreadyRunning { what: String },

    #[error("{what} is not running")]
    NotRunning { what: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using MochiError.
pub type MochiResult<T> = Result<T, MochiError>;

impl MochiError {
    pub fn device_unavailable(msg: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            message: msg.into(),
        }
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference {
            message: msg.into(),
        }
    }

    pub fn invalid_landmarks(msg: impl Into<String>) -> Self {
        Self::InvalidLandmarks {
            message: msg.into(),
        }
    }

    pub fn model_load(msg: impl Into<String>) -> Self {
        Self::ModelLoad {
            message: msg.into(),
        }
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn already_running(what: impl Into<String>) -> Self {
        Self::AlreadyRunning { what: what.into() }
    }

    pub fn not_running(what: impl Into<String>) -> Self {
        Self::NotRunning { what: what.into() }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    /// Errors that only spoil a single processing cycle.
    ///
    /// The vision loop logs these and carries on; they never stop the pipeline.
    pub fn is_per_cycle(&self) -> bool {
        matches!(
            self,
            Self::Inference { .. } | Self::InvalidLandmarks { .. } | Self::StaleFrame { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_cycle_classification() {
        assert!(MochiError::inference("shape mismatch").is_per_cycle());
        assert!(MochiError::invalid_landmarks("expected 6").is_per_cycle());
        assert!(MochiError::StaleFrame { age_ms: 250 }.is_per_cycle());
        assert!(!MochiError::device_unavailable("/dev/video0").is_per_cycle());
        assert!(!MochiError::model_load("missing file").is_per_cycle());
    }

    #[test]
    fn messages_are_readable() {
        let err = MochiError::already_running("Vision pipeline");
        assert_eq!(err.to_string(), "Vision pipeline is already running");

        let err = MochiError::StaleFrame { age_ms: 300 };
        assert_eq!(err.to_string(), "Stale frame: no new frame for 300 ms");
    }
}
