//! The vision pipeline orchestrator.
//!
//! ```text
//!  capture thread          tick loop (tokio task)           blocking pool
//! ┌──────────────┐   ┌──────────────────────────────┐   ┌──────────────────┐
//! │ FrameSource  │──▶│ every tick: heartbeat,       │   │ letterbox        │
//! │  (own thread)│   │   preview                    │   │ detect           │
//! └──────────────┘   │ every Kth tick: take latest  │──▶│ pose             │
//!   Latest<Frame>    │   frame, run one cycle       │◀──│ score            │
//!                    └──────────────┬───────────────┘   └──────────────────┘
//!                                   ▼
//!                          Latest<FocusState>
//! ```
//!
//! At most one inference cycle is in flight. An inference tick that finds the
//! worker busy is skipped. Frame capture never waits for inference.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use mochi_common::clock::{PipelineClock, RateController, TickDivider};
use mochi_common::config::{DetectorBackend, DetectorSettings, PipelineConfig};
use mochi_common::error::{MochiError, MochiResult};
use mochi_common::latest::{Latest, LatestReceiver};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::detector::FaceDetector;
use crate::focus::{FocusScorer, FocusState};
use crate::frame::Frame;
use crate::pose::{HeadPose, PoseEstimator};
use crate::preview::{PreviewEncoder, PreviewFrame};
use crate::source::{start_capture, CaptureStats, FrameCapture, FrameSource, SourceStatus};

/// Runtime counters of a vision pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Loop ticks at the capture rate.
    pub ticks: u64,
    /// Distinct frames handed to the detector.
    pub frames_processed: u64,
    /// Inference ticks that ran a cycle (including stale ones).
    pub inference_cycles: u64,
    /// Inference ticks skipped because the previous cycle was still running.
    pub skipped_busy: u64,
    /// Cycles without a fresh frame.
    pub stale_cycles: u64,
    /// Cycles that failed with an inference error.
    pub failed_cycles: u64,
    /// Cycles without a usable face.
    pub missed_detections: u64,
    /// Focus states published.
    pub published_states: u64,
    /// Preview frames published.
    pub previews: u64,
    /// Clock reading at the last tick.
    pub last_tick_ms: u64,
    /// Capture thread counters.
    pub capture: CaptureStats,
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    frames_processed: AtomicU64,
    inference_cycles: AtomicU64,
    skipped_busy: AtomicU64,
    stale_cycles: AtomicU64,
    failed_cycles: AtomicU64,
    missed_detections: AtomicU64,
    published_states: AtomicU64,
    previews: AtomicU64,
    last_tick_ms: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State shared between the loop task and handles.
struct Shared {
    state: Latest<FocusState>,
    preview: Latest<Option<Arc<PreviewFrame>>>,
    counters: Counters,
    capture_stats: std::sync::Mutex<CaptureStats>,
    running: AtomicBool,
}

/// Everything an inference cycle needs, moved onto the blocking pool and back.
struct InferenceWorker {
    detector: FaceDetector,
    pose: PoseEstimator,
    scorer: FocusScorer,
}

/// Result of one inference cycle.
#[derive(Debug)]
enum CycleOutcome {
    Face {
        confidence: f32,
        pose: HeadPose,
        score: f32,
    },
    NoFace {
        score: f32,
    },
    Failed(MochiError),
}

impl InferenceWorker {
    fn run_cycle(&mut self, frame: &Frame) -> CycleOutcome {
        let detection = match self.detector.detect(frame) {
            Ok(detection) => detection,
            Err(e) => return CycleOutcome::Failed(e),
        };
        let Some(detection) = detection else {
            return CycleOutcome::NoFace {
                score: self.scorer.update(None, None),
            };
        };

        match self.pose.estimate(&detection.landmarks) {
            Ok(pose) => CycleOutcome::Face {
                confidence: detection.confidence,
                pose,
                score: self.scorer.update(Some(&detection), Some(&pose)),
            },
            Err(e) => {
                tracing::debug!(frame = frame.seq, error = %e, "Discarding detection");
                CycleOutcome::NoFace {
                    score: self.scorer.update(None, None),
                }
            }
        }
    }
}

/// A configured but not yet running pipeline.
pub struct VisionProcessor {
    config: PipelineConfig,
    /// Built from the config at start when not given explicitly.
    detector: Option<FaceDetector>,
    pose: PoseEstimator,
    clock: PipelineClock,
}

impl VisionProcessor {
    pub fn new(config: PipelineConfig, detector: FaceDetector) -> Self {
        Self {
            config,
            detector: Some(detector),
            pose: PoseEstimator::default(),
            clock: PipelineClock::start(),
        }
    }

    /// Validate `config`. The detector backend is built at start, once it
    /// is known which source feeds the pipeline.
    pub fn from_config(config: PipelineConfig) -> MochiResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            detector: None,
            pose: PoseEstimator::default(),
            clock: PipelineClock::start(),
        })
    }

    /// Stamp states with `clock` instead of a private one, so they line up
    /// with the caller's other timestamps.
    pub fn with_clock(mut self, clock: PipelineClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_pose_estimator(mut self, pose: PoseEstimator) -> Self {
        self.pose = pose;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start with the configured source, falling back to synthetic frames
    /// when the camera is unavailable and fallback is enabled.
    ///
    /// Must be called from within a tokio runtime.
    /// Synthetic fallback frames only carry the marker face, so a fallback
    /// runs the marker backend whatever the configured one is.
    pub fn start(mut self) -> MochiResult<VisionHandle> {
        self.config.validate()?;
        let (mut capture, status) = start_capture(&self.config, &self.clock)?;
        let detector = match self.detector.take() {
            Some(detector) => detector,
            None => match detector_for_source(&self.config.detector, &status) {
                Ok(detector) => detector,
                Err(e) => {
                    capture.stop();
                    return Err(e);
                }
            },
        };
        Ok(self.spawn(detector, capture, status))
    }

    /// Start with an explicit source. No fallback is attempted.
    pub fn start_with_source(
        mut self,
        source: Box<dyn FrameSource>,
    ) -> MochiResult<VisionHandle> {
        self.config.validate()?;
        let detector = match self.detector.take() {
            Some(detector) => detector,
            None => FaceDetector::from_settings(&self.config.detector)?,
        };
        let capture = FrameCapture::start(source, &self.config, self.clock.clone())?;
        let status = SourceStatus::Opened {
            source: capture.source_name().to_string(),
        };
        Ok(self.spawn(detector, capture, status))
    }

    fn spawn(
        self,
        detector: FaceDetector,
        capture: FrameCapture,
        status: SourceStatus,
    ) -> VisionHandle {
        let shared = Arc::new(Shared {
            state: Latest::new(FocusState::absent(0.0, self.clock.now_ms())),
            preview: Latest::new(None),
            counters: Counters::default(),
            capture_stats: std::sync::Mutex::new(CaptureStats::default()),
            running: AtomicBool::new(true),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let preview = self.config.preview.enabled.then(|| {
            (
                PreviewEncoder::new(&self.config.preview),
                RateController::new(self.config.preview.fps),
            )
        });

        let pipeline = PipelineLoop {
            shared: shared.clone(),
            capture: Some(capture),
            clock: self.clock.clone(),
            stale_timeout_ms: self.config.stale_timeout().as_millis() as u64,
            preview,
            last_preview_seq: None,
            last_processed_seq: None,
        };
        let worker = InferenceWorker {
            detector,
            pose: self.pose,
            scorer: FocusScorer::new(&self.config.focus),
        };

        tracing::info!(
            source = status.source(),
            fallback = status.is_fallback(),
            capture_fps = self.config.capture.fps,
            inference_fps = self.config.focus.inference_fps,
            stride = self.config.inference_stride(),
            "Vision pipeline started"
        );

        let task = tokio::spawn(pipeline.run(
            worker,
            self.config.frame_interval(),
            self.config.inference_stride(),
            shutdown_rx,
        ));

        VisionHandle {
            shared,
            shutdown_tx,
            task: Some(task),
            status,
            clock: self.clock,
        }
    }
}

fn detector_for_source(
    settings: &DetectorSettings,
    status: &SourceStatus,
) -> MochiResult<FaceDetector> {
    if status.is_fallback() && settings.backend != DetectorBackend::Marker {
        tracing::info!(
            configured = ?settings.backend,
            "Using the marker detector for synthetic fallback frames"
        );
        return FaceDetector::from_settings(&DetectorSettings {
            backend: DetectorBackend::Marker,
            ..settings.clone()
        });
    }
    FaceDetector::from_settings(settings)
}

/// Handle to a running pipeline.
///
/// Dropping the handle asks the pipeline to stop but does not wait for it.
pub struct VisionHandle {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    status: SourceStatus,
    clock: PipelineClock,
}

impl VisionHandle {
    /// The latest published focus state.
    pub fn current_state(&self) -> FocusState {
        self.shared.state.get()
    }

    pub fn subscribe(&self) -> LatestReceiver<FocusState> {
        self.shared.state.subscribe()
    }

    pub fn latest_preview(&self) -> Option<Arc<PreviewFrame>> {
        self.shared.preview.get()
    }

    pub fn subscribe_preview(&self) -> LatestReceiver<Option<Arc<PreviewFrame>>> {
        self.shared.preview.subscribe()
    }

    pub fn source_status(&self) -> &SourceStatus {
        &self.status
    }

    pub fn clock(&self) -> &PipelineClock {
        &self.clock
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.shared.counters;
        PipelineStats {
            ticks: c.ticks.load(Ordering::Relaxed),
            frames_processed: c.frames_processed.load(Ordering::Relaxed),
            inference_cycles: c.inference_cycles.load(Ordering::Relaxed),
            skipped_busy: c.skipped_busy.load(Ordering::Relaxed),
            stale_cycles: c.stale_cycles.load(Ordering::Relaxed),
            failed_cycles: c.failed_cycles.load(Ordering::Relaxed),
            missed_detections: c.missed_detections.load(Ordering::Relaxed),
            published_states: c.published_states.load(Ordering::Relaxed),
            previews: c.previews.load(Ordering::Relaxed),
            last_tick_ms: c.last_tick_ms.load(Ordering::Relaxed),
            capture: self
                .shared
                .capture_stats
                .lock()
                .map(|s| *s)
                .unwrap_or_default(),
        }
    }

    /// Stop the pipeline and release the frame source. Idempotent.
    ///
    /// An inference cycle still running is awaited and its result discarded.
    /// Once this returns no further state is published and the device is
    /// closed.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Vision loop task failed");
        }
        self.shared.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for VisionHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

struct PipelineLoop {
    shared: Arc<Shared>,
    capture: Option<FrameCapture>,
    clock: PipelineClock,
    stale_timeout_ms: u64,
    preview: Option<(PreviewEncoder, RateController)>,
    last_preview_seq: Option<u64>,
    last_processed_seq: Option<u64>,
}

type InFlight = JoinHandle<(InferenceWorker, CycleOutcome)>;

impl PipelineLoop {
    async fn run(
        mut self,
        worker: InferenceWorker,
        tick_interval: std::time::Duration,
        stride: u32,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut divider = TickDivider::new(stride);
        let mut idle_worker = Some(worker);
        let mut in_flight: Option<InFlight> = None;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                joined = async {
                    match in_flight.as_mut() {
                        Some(handle) => handle.await,
                        None => std::future::pending().await,
                    }
                }, if in_flight.is_some() => {
                    in_flight = None;
                    match joined {
                        Ok((worker, outcome)) => {
                            idle_worker = Some(worker);
                            self.apply(outcome);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Inference worker failed; stopping pipeline");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.on_tick();
                    if divider.tick() {
                        match idle_worker.take() {
                            Some(worker) => {
                                match self.begin_cycle(worker) {
                                    Ok(handle) => in_flight = Some(handle),
                                    Err(worker) => idle_worker = Some(worker),
                                }
                            }
                            None => bump(&self.shared.counters.skipped_busy),
                        }
                    }
                }
            }
        }

        if let Some(handle) = in_flight.take() {
            tracing::debug!("Waiting for in-flight inference before shutdown");
            let _ = handle.await;
        }
        self.shutdown().await;
    }

    fn on_tick(&mut self) {
        let now = self.clock.now_ms();
        let counters = &self.shared.counters;
        bump(&counters.ticks);
        counters.last_tick_ms.store(now, Ordering::Relaxed);

        if let Some(capture) = &self.capture {
            if let Ok(mut stats) = self.shared.capture_stats.lock() {
                *stats = capture.stats();
            }
        }
        self.maybe_publish_preview(now);
    }

    fn maybe_publish_preview(&mut self, now: u64) {
        let Some((encoder, rate)) = self.preview.as_mut() else {
            return;
        };
        let Some(frame) = self.capture.as_ref().and_then(|c| c.latest_frame()) else {
            return;
        };
        if self.last_preview_seq == Some(frame.seq) || !rate.should_tick(now) {
            return;
        }
        match encoder.encode(&frame) {
            Ok(preview) => {
                self.last_preview_seq = Some(frame.seq);
                self.shared.preview.publish(Some(Arc::new(preview)));
                bump(&self.shared.counters.previews);
            }
            Err(e) => tracing::debug!(error = %e, "Preview encoding failed"),
        }
    }

    /// Start an inference cycle on the newest frame.
    ///
    /// Stale or missing frames are scored as absence right here and the
    /// worker is handed back.
    fn begin_cycle(&mut self, mut worker: InferenceWorker) -> Result<InFlight, InferenceWorker> {
        let counters = &self.shared.counters;
        bump(&counters.inference_cycles);

        let now = self.clock.now_ms();
        let frame = self.capture.as_ref().and_then(|c| c.latest_frame());
        let age_ms = frame
            .as_ref()
            .map(|f| f.age_ms(now))
            .unwrap_or_else(|| self.clock.elapsed().as_millis() as u64);

        let Some(frame) = frame.filter(|_| age_ms <= self.stale_timeout_ms) else {
            let stale = MochiError::StaleFrame { age_ms };
            tracing::debug!(error = %stale, "Treating cycle as absent");
            bump(&counters.stale_cycles);
            let score = worker.scorer.update(None, None);
            self.apply(CycleOutcome::NoFace { score });
            return Err(worker);
        };

        if self.last_processed_seq != Some(frame.seq) {
            bump(&counters.frames_processed);
            self.last_processed_seq = Some(frame.seq);
        }

        Ok(tokio::task::spawn_blocking(move || {
            let outcome = worker.run_cycle(&frame);
            (worker, outcome)
        }))
    }

    /// Publish the result of one cycle. Never leaves a partial state.
    fn apply(&self, outcome: CycleOutcome) {
        let counters = &self.shared.counters;
        let now = self.clock.now_ms();

        let next = match outcome {
            CycleOutcome::Face {
                confidence,
                pose,
                score,
            } => FocusState::present(confidence, pose, score, now),
            CycleOutcome::NoFace { score } => {
                bump(&counters.missed_detections);
                FocusState::absent(score, now)
            }
            CycleOutcome::Failed(e) => {
                bump(&counters.failed_cycles);
                tracing::warn!(error = %e, "Inference cycle failed; keeping previous state");
                self.shared.state.get().restamped(now)
            }
        };

        let published = self
            .shared
            .state
            .publish_if(next, |prev| prev.timestamp_ms <= next.timestamp_ms);
        if published {
            bump(&counters.published_states);
        }
    }

    async fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(mut capture) = self.capture.take() {
            let stats = tokio::task::spawn_blocking(move || {
                capture.stop();
                capture.stats()
            })
            .await;
            if let (Ok(stats), Ok(mut slot)) = (stats, self.shared.capture_stats.lock()) {
                *slot = stats;
            }
        }
        tracing::info!("Vision pipeline stopped");
    }
}
