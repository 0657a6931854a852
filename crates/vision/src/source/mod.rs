//! Frame acquisition.
//!
//! A [`FrameSource`] owns a device (or a generator) and hands out one image
//! per call. [`FrameCapture`] moves the source onto a dedicated thread, pulls
//! frames at the configured rate, and publishes only the newest one. The
//! capture thread is the sole owner of the device for as long as it runs.

pub mod camera;
pub mod synthetic;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use image::RgbImage;
use mochi_common::clock::PipelineClock;
use mochi_common::config::{CaptureSettings, PipelineConfig, SourceKind};
use mochi_common::error::{MochiError, MochiResult};
use mochi_common::latest::{Latest, LatestReceiver};

use crate::frame::Frame;

pub use camera::CameraSource;
pub use synthetic::SyntheticSource;

/// Capability interface shared by the camera and the synthetic generator.
pub trait FrameSource: Send + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Acquire the device. Fails with `DeviceUnavailable` if it cannot be opened.
    fn open(&mut self, settings: &CaptureSettings) -> MochiResult<()>;

    /// Produce the next image, blocking for at most about one frame interval.
    ///
    /// `Ok(None)` means nothing arrived in time; the caller simply tries again.
    fn grab(&mut self) -> MochiResult<Option<RgbImage>>;

    /// Release the device. Must be safe to call more than once.
    fn close(&mut self);
}

/// Which source ended up feeding the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    /// The configured source opened normally.
    Opened { source: String },
    /// The camera failed and the synthetic generator took over.
    Fallback { source: String, reason: String },
}

impl SourceStatus {
    pub fn source(&self) -> &str {
        match self {
            Self::Opened { source } | Self::Fallback { source, .. } => source,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Counters kept by the capture thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CaptureStats {
    /// Frames published.
    pub frames_captured: u64,
    /// Periods in which the source produced nothing.
    pub frames_missed: u64,
    /// Grab calls that returned an error.
    pub grab_errors: u64,
}

#[derive(Debug, Default)]
struct CaptureCounters {
    captured: AtomicU64,
    missed: AtomicU64,
    errors: AtomicU64,
}

/// The latest-frame slot shared between the capture thread and readers.
pub type FrameSlot = Latest<Option<Arc<Frame>>>;

/// A running capture thread.
pub struct FrameCapture {
    source_name: String,
    frames: Arc<FrameSlot>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    counters: Arc<CaptureCounters>,
}

impl FrameCapture {
    /// Open `source` and start capturing on a dedicated thread.
    ///
    /// Opening happens on the caller's thread so acquisition failures are
    /// reported here rather than lost in the background.
    pub fn start(
        mut source: Box<dyn FrameSource>,
        config: &PipelineConfig,
        clock: PipelineClock,
    ) -> MochiResult<Self> {
        let source_name = source.name().to_string();
        source.open(&config.capture)?;

        let frames = Arc::new(FrameSlot::new(None));
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(CaptureCounters::default());

        let worker = CaptureWorker {
            source,
            frames: frames.clone(),
            stop: stop.clone(),
            counters: counters.clone(),
            clock,
            interval: config.frame_interval(),
        };

        let thread = std::thread::Builder::new()
            .name("mochi-capture".to_string())
            .spawn(move || worker.run())
            .map_err(|e| MochiError::capture(format!("Failed to spawn capture thread: {e}")))?;

        tracing::info!(
            source = %source_name,
            fps = config.capture.fps,
            width = config.capture.width,
            height = config.capture.height,
            "Frame capture started"
        );

        Ok(Self {
            source_name,
            frames,
            stop,
            thread: Some(thread),
            counters,
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The newest captured frame, if any has arrived yet.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frames.get()
    }

    /// Push-style access to new frames.
    pub fn subscribe(&self) -> LatestReceiver<Option<Arc<Frame>>> {
        self.frames.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.counters.captured.load(Ordering::Relaxed),
            frames_missed: self.counters.missed.load(Ordering::Relaxed),
            grab_errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    /// Stop the thread and release the device. Idempotent.
    ///
    /// Blocks until the capture thread has closed the source, which takes at
    /// most about one frame interval.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        if thread.join().is_err() {
            tracing::error!(source = %self.source_name, "Capture thread panicked");
        }
        tracing::info!(source = %self.source_name, stats = ?self.stats(), "Frame capture stopped");
    }
}

impl Drop for FrameCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureWorker {
    source: Box<dyn FrameSource>,
    frames: Arc<FrameSlot>,
    stop: Arc<AtomicBool>,
    counters: Arc<CaptureCounters>,
    clock: PipelineClock,
    interval: std::time::Duration,
}

impl CaptureWorker {
    fn run(mut self) {
        let mut seq = 0u64;
        let mut next_deadline = Instant::now();
        let mut consecutive_errors = 0u32;

        while !self.stop.load(Ordering::SeqCst) {
            match self.source.grab() {
                Ok(Some(image)) => {
                    let frame = Frame::from_rgb(image, self.clock.now_ms(), seq);
                    seq += 1;
                    self.frames.publish(Some(Arc::new(frame)));
                    self.counters.captured.fetch_add(1, Ordering::Relaxed);
                    consecutive_errors = 0;
                }
                Ok(None) => {
                    self.counters.missed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    // Device loss shows up downstream as stale frames.
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    consecutive_errors += 1;
                    if consecutive_errors == 1 || consecutive_errors % 50 == 0 {
                        tracing::warn!(
                            source = self.source.name(),
                            consecutive_errors,
                            error = %e,
                            "Frame grab failed"
                        );
                    }
                }
            }

            next_deadline += self.interval;
            let now = Instant::now();
            if next_deadline > now {
                std::thread::sleep(next_deadline - now);
            } else {
                next_deadline = now;
            }
        }

        self.source.close();
        tracing::debug!(source = self.source.name(), frames = seq, "Capture thread exiting");
    }
}

/// Construct the source named by the configuration.
pub fn build_source(settings: &CaptureSettings) -> Box<dyn FrameSource> {
    match settings.source {
        SourceKind::Camera => Box::new(CameraSource::new(settings.device_index)),
        SourceKind::Synthetic => Box::new(SyntheticSource::new(settings.scene)),
    }
}

/// Start capture from the configured source, falling back to the synthetic
/// generator when the camera is unavailable and fallback is enabled.
pub fn start_capture(
    config: &PipelineConfig,
    clock: &PipelineClock,
) -> MochiResult<(FrameCapture, SourceStatus)> {
    let primary = build_source(&config.capture);
    let primary_name = primary.name().to_string();

    match FrameCapture::start(primary, config, clock.clone()) {
        Ok(capture) => Ok((
            capture,
            SourceStatus::Opened {
                source: primary_name,
            },
        )),
        Err(err @ MochiError::DeviceUnavailable { .. })
            if config.capture.source == SourceKind::Camera
                && config.capture.fallback_to_synthetic =>
        {
            tracing::warn!(error = %err, "Camera unavailable, falling back to synthetic frames");
            let fallback = Box::new(SyntheticSource::new(config.capture.scene));
            let capture = FrameCapture::start(fallback, config, clock.clone())?;
            let status = SourceStatus::Fallback {
                source: capture.source_name().to_string(),
                reason: err.to_string(),
            };
            Ok((capture, status))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mochi_common::config::SceneScript;
    use std::time::Duration;

    /// Source that records whether it is open.
    struct ProbeSource {
        open: Arc<AtomicBool>,
        closes: Arc<AtomicU64>,
        fail_open: bool,
    }

    impl FrameSource for ProbeSource {
        fn name(&self) -> &str {
            "probe"
        }

        fn open(&mut self, _settings: &CaptureSettings) -> MochiResult<()> {
            if self.fail_open {
                return Err(MochiError::device_unavailable("probe refused"));
            }
            self.open.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn grab(&mut self) -> MochiResult<Option<RgbImage>> {
            Ok(Some(RgbImage::new(4, 4)))
        }

        fn close(&mut self) {
            self.open.store(false, Ordering::SeqCst);
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.capture.fps = 100;
        config.focus.inference_fps = 50;
        config
    }

    #[test]
    fn capture_publishes_frames_and_releases_device() {
        let open = Arc::new(AtomicBool::new(false));
        let closes = Arc::new(AtomicU64::new(0));
        let source = ProbeSource {
            open: open.clone(),
            closes: closes.clone(),
            fail_open: false,
        };

        let mut capture =
            FrameCapture::start(Box::new(source), &fast_config(), PipelineClock::start()).unwrap();
        assert!(open.load(Ordering::SeqCst));

        let deadline = Instant::now() + Duration::from_secs(2);
        while capture.latest_frame().is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let frame = capture.latest_frame().expect("a frame within two seconds");
        assert_eq!((frame.width, frame.height), (4, 4));

        capture.stop();
        capture.stop();
        assert!(!capture.is_running());
        assert!(!open.load(Ordering::SeqCst));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(capture.stats().frames_captured >= 1);
    }

    #[test]
    fn frame_sequence_and_timestamps_increase() {
        let mut config = fast_config();
        config.capture.source = SourceKind::Synthetic;
        let mut capture = FrameCapture::start(
            Box::new(SyntheticSource::new(SceneScript::Attentive)),
            &config,
            PipelineClock::start(),
        )
        .unwrap();

        let mut seen: Vec<(u64, u64)> = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while seen.len() < 3 && Instant::now() < deadline {
            if let Some(frame) = capture.latest_frame() {
                if seen.last().map_or(true, |(seq, _)| *seq != frame.seq) {
                    seen.push((frame.seq, frame.timestamp_ms));
                }
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        capture.stop();

        assert!(seen.len() >= 3);
        for pair in seen.windows(2) {
            assert!(pair[1].0 > pair[0].0);
            assert!(pair[1].1 >= pair[0].1);
        }
    }

    #[test]
    fn open_failure_is_reported_synchronously() {
        let source = ProbeSource {
            open: Arc::new(AtomicBool::new(false)),
            closes: Arc::new(AtomicU64::new(0)),
            fail_open: true,
        };
        let err = FrameCapture::start(Box::new(source), &fast_config(), PipelineClock::start())
            .err()
            .expect("open must fail");
        assert!(matches!(err, MochiError::DeviceUnavailable { .. }));
    }

    #[test]
    fn unavailable_camera_falls_back_to_synthetic() {
        let mut config = fast_config();
        config.capture.source = SourceKind::Camera;
        // Far beyond any real /dev/videoN node.
        config.capture.device_index = 4_000;
        config.capture.fallback_to_synthetic = true;

        let (mut capture, status) = start_capture(&config, &PipelineClock::start()).unwrap();
        assert!(status.is_fallback());
        assert_eq!(status.source(), "synthetic");
        capture.stop();

        config.capture.fallback_to_synthetic = false;
        let err = start_capture(&config, &PipelineClock::start())
            .err()
            .expect("no fallback configured");
        assert!(matches!(err, MochiError::DeviceUnavailable { .. }));
    }
}
