//! Run the pipeline and stream pet state as JSON lines on stdout.

use std::time::Duration;

use anyhow::{bail, Context};
use mochi_app::{MochiController, PetStateResponse};
use mochi_common::config::{AppConfig, DetectorBackend, SceneScript, SourceKind};
use mochi_pet::{FocusStats, Gesture, Mood};
use mochi_vision::{PipelineStats, SourceStatus};
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub synthetic: bool,
    pub scene: Option<SceneScript>,
    pub marker: bool,
    pub duration: Option<Duration>,
    pub report_every: Duration,
    /// Sorted by time.
    pub gestures: Vec<(Duration, Gesture)>,
}

impl RunOptions {
    pub fn from_args(
        synthetic: bool,
        scene: Option<&str>,
        marker: bool,
        duration: Option<f64>,
        report_every: f64,
        gestures: &[String],
    ) -> anyhow::Result<Self> {
        let scene = scene.map(parse_scene).transpose()?;
        let duration = duration.map(seconds).transpose()?;
        let report_every = seconds(report_every)?;
        if report_every.is_zero() {
            bail!("report interval must be positive");
        }

        let mut gestures = gestures
            .iter()
            .map(|g| parse_scheduled_gesture(g))
            .collect::<anyhow::Result<Vec<_>>>()?;
        gestures.sort_by_key(|(at, _)| *at);

        Ok(Self {
            synthetic,
            scene,
            marker,
            duration,
            report_every,
            gestures,
        })
    }

    fn apply(&self, config: &mut AppConfig) {
        if self.synthetic || self.scene.is_some() {
            config.capture.source = SourceKind::Synthetic;
        }
        if let Some(scene) = self.scene {
            config.capture.scene = scene;
        }
        if self.marker {
            config.detector.backend = DetectorBackend::Marker;
        }
    }
}

fn seconds(value: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid duration: {value} s"))
}

fn parse_scene(name: &str) -> anyhow::Result<SceneScript> {
    let scene = match name.trim().to_ascii_lowercase().as_str() {
        "attentive" => SceneScript::Attentive,
        "sway" => SceneScript::Sway {
            period_frames: 60,
            amplitude: 0.6,
        },
        "look-away" | "look_away" => SceneScript::LookAway { offset: 0.75 },
        "intermittent" => SceneScript::Intermittent {
            present_frames: 100,
            absent_frames: 80,
        },
        "empty" => SceneScript::Empty,
        other => bail!("unknown scene: {other}"),
    };
    Ok(scene)
}

/// Parse `NAME@SECONDS`.
fn parse_scheduled_gesture(arg: &str) -> anyhow::Result<(Duration, Gesture)> {
    let (name, at) = arg
        .split_once('@')
        .with_context(|| format!("expected NAME@SECONDS, got {arg:?}"))?;
    let gesture: Gesture = name.parse()?;
    let at: f64 = at
        .trim()
        .parse()
        .with_context(|| format!("invalid gesture time in {arg:?}"))?;
    Ok((seconds(at)?, gesture))
}

/// One line of output.
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Event<'a> {
    Started {
        source: &'a SourceStatus,
    },
    Mood {
        mood: Mood,
        elapsed_ms: u64,
    },
    Gesture {
        gesture: Gesture,
        mood: Mood,
    },
    State {
        #[serde(flatten)]
        state: PetStateResponse,
    },
    Stopped {
        stats: FocusStats,
        pipeline: Option<PipelineStats>,
    },
}

fn emit(event: &Event<'_>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

pub async fn run(mut config: AppConfig, options: RunOptions) -> anyhow::Result<()> {
    options.apply(&mut config);
    let controller = MochiController::new(&config)?;

    let status = controller
        .start_vision()
        .await
        .context("failed to start the vision pipeline")?;
    emit(&Event::Started { source: &status })?;

    let start = Instant::now();
    let mut moods = controller.subscribe_mood();
    let mut report = tokio::time::interval(options.report_every);
    let mut gestures = options.gestures.iter().copied().peekable();

    let deadline = tokio::time::sleep_until(start + options.duration.unwrap_or_default());
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let next_gesture = gestures.peek().map(|(at, _)| start + *at);

        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break;
            }
            _ = &mut deadline, if options.duration.is_some() => break,
            Some(mood) = moods.changed() => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                emit(&Event::Mood { mood, elapsed_ms })?;
            }
            _ = tokio::time::sleep_until(next_gesture.unwrap_or(start)), if next_gesture.is_some() => {
                if let Some((_, gesture)) = gestures.next() {
                    let mood = controller.trigger_gesture(gesture);
                    emit(&Event::Gesture { gesture, mood })?;
                }
            }
            _ = report.tick() => {
                let state = controller.get_pet_state().await;
                emit(&Event::State { state })?;
            }
        }
    }

    let pipeline = controller.get_vision_status().await.stats;
    controller.stop_vision().await?;
    emit(&Event::Stopped {
        stats: controller.get_focus_stats(),
        pipeline,
    })?;
    Ok(())
}
