//! The application control surface.

use std::sync::{Arc, Mutex, MutexGuard};

use mochi_common::clock::PipelineClock;
use mochi_common::config::{AppConfig, PipelineConfig};
use mochi_common::error::{MochiError, MochiResult};
use mochi_common::latest::{Latest, LatestReceiver};
use mochi_pet::{FocusStats, Gesture, Mood, PetStateMachine};
use mochi_vision::{
    FocusState, PipelineStats, PreviewFrame, SourceStatus, VisionHandle, VisionProcessor,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What the pet window needs to draw itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PetStateResponse {
    pub mood: Mood,
    pub focus_score: f32,
    pub total_focus_minutes: f32,
    pub is_vision_active: bool,
    pub face_detected: bool,
}

/// Detailed vision status.
#[derive(Debug, Clone, Serialize)]
pub struct VisionStatus {
    pub is_running: bool,
    pub focus_state: Option<FocusState>,
    pub source: Option<SourceStatus>,
    pub stats: Option<PipelineStats>,
}

/// A running pipeline plus the task feeding its states to the pet.
struct VisionSession {
    handle: VisionHandle,
    pump_stop: watch::Sender<bool>,
    pump: JoinHandle<u64>,
}

/// Owns the pet and, while vision runs, the pipeline driving it.
pub struct MochiController {
    pipeline: PipelineConfig,
    clock: PipelineClock,
    pet: Arc<Mutex<PetStateMachine>>,
    mood: Arc<Latest<Mood>>,
    vision: tokio::sync::Mutex<Option<VisionSession>>,
}

/// Mood changes are published while this lock is held, so subscribers see
/// them in the order the machine made them.
fn lock(pet: &Mutex<PetStateMachine>) -> MutexGuard<'_, PetStateMachine> {
    // The machine holds no invariants a panicking reader could break.
    pet.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MochiController {
    pub fn new(config: &AppConfig) -> MochiResult<Self> {
        let pipeline = config.pipeline()?;
        let pet = PetStateMachine::new(&pipeline.pet);
        Ok(Self {
            pipeline,
            clock: PipelineClock::start(),
            pet: Arc::new(Mutex::new(pet)),
            mood: Arc::new(Latest::new(Mood::Idle)),
            vision: tokio::sync::Mutex::new(None),
        })
    }

    pub fn pipeline_config(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn clock(&self) -> &PipelineClock {
        &self.clock
    }

    /// Start the camera pipeline.
    ///
    /// Falls back to the synthetic source when the camera cannot be opened
    /// and fallback is enabled; the returned status says which one runs.
    pub async fn start_vision(&self) -> MochiResult<SourceStatus> {
        let mut vision = self.vision.lock().await;
        if vision.is_some() {
            return Err(MochiError::already_running("Vision"));
        }

        let handle = VisionProcessor::from_config(self.pipeline.clone())?
            .with_clock(self.clock.clone())
            .start()?;
        let status = handle.source_status().clone();

        let (pump_stop, stop_rx) = watch::channel(false);
        let pump = tokio::spawn(pump_states(
            handle.subscribe(),
            self.pet.clone(),
            self.mood.clone(),
            stop_rx,
        ));

        if status.is_fallback() {
            tracing::warn!(?status, "Vision started on the fallback source");
        } else {
            tracing::info!(source = status.source(), "Vision started");
        }

        *vision = Some(VisionSession {
            handle,
            pump_stop,
            pump,
        });
        Ok(status)
    }

    /// Stop the pipeline and release the camera.
    pub async fn stop_vision(&self) -> MochiResult<()> {
        let Some(mut session) = self.vision.lock().await.take() else {
            return Err(MochiError::not_running("Vision"));
        };

        session.handle.stop().await;
        let _ = session.pump_stop.send(true);
        match session.pump.await {
            Ok(states) => tracing::info!(states, "Focus state feed stopped"),
            Err(e) => tracing::warn!(error = %e, "Focus state feed join failed"),
        }

        lock(&self.pet).clear_streaks();
        tracing::info!("Vision stopped");
        Ok(())
    }

    pub async fn is_vision_running(&self) -> bool {
        self.vision.lock().await.is_some()
    }

    pub fn trigger_gesture(&self, gesture: Gesture) -> Mood {
        let mut pet = lock(&self.pet);
        let mood = pet.on_gesture(gesture, self.clock.now_ms());
        self.mood.publish(mood);
        mood
    }

    /// Parse `name` (for example `"wave"` or `"thumbs_up"`) and trigger it.
    pub fn trigger_gesture_named(&self, name: &str) -> MochiResult<Mood> {
        Ok(self.trigger_gesture(name.parse()?))
    }

    pub fn set_demo_mood(&self, mood: Mood) -> Mood {
        let mut pet = lock(&self.pet);
        let mood = pet.set_demo_mood(mood);
        self.mood.publish(mood);
        mood
    }

    pub fn set_demo_mood_named(&self, name: &str) -> MochiResult<Mood> {
        Ok(self.set_demo_mood(name.parse()?))
    }

    pub fn get_focus_stats(&self) -> FocusStats {
        self.expire_interaction();
        lock(&self.pet).stats()
    }

    pub fn reset_stats(&self) {
        lock(&self.pet).reset_stats();
        tracing::info!("Focus stats reset");
    }

    pub async fn get_pet_state(&self) -> PetStateResponse {
        self.expire_interaction();
        let focus = self.current_focus_state().await;
        let pet = lock(&self.pet);

        PetStateResponse {
            mood: pet.mood(),
            focus_score: focus.map(|f| f.focus_score).unwrap_or(pet.focus_score()),
            total_focus_minutes: pet.total_focus_ms() as f32 / 60_000.0,
            is_vision_active: focus.is_some(),
            face_detected: focus.is_some_and(|f| f.face_present),
        }
    }

    pub async fn get_vision_status(&self) -> VisionStatus {
        let vision = self.vision.lock().await;
        match vision.as_ref() {
            Some(session) => VisionStatus {
                is_running: session.handle.is_running(),
                focus_state: Some(session.handle.current_state()),
                source: Some(session.handle.source_status().clone()),
                stats: Some(session.handle.stats()),
            },
            None => VisionStatus {
                is_running: false,
                focus_state: None,
                source: None,
                stats: None,
            },
        }
    }

    /// Mood changes, for the presentation layer.
    pub fn subscribe_mood(&self) -> LatestReceiver<Mood> {
        self.mood.subscribe()
    }

    /// Focus states of the running pipeline.
    pub async fn subscribe_focus(&self) -> Option<LatestReceiver<FocusState>> {
        self.vision.lock().await.as_ref().map(|s| s.handle.subscribe())
    }

    pub async fn latest_preview(&self) -> Option<Arc<PreviewFrame>> {
        self.vision
            .lock()
            .await
            .as_ref()
            .and_then(|s| s.handle.latest_preview())
    }

    async fn current_focus_state(&self) -> Option<FocusState> {
        self.vision
            .lock()
            .await
            .as_ref()
            .map(|s| s.handle.current_state())
    }

    /// Interactions also end while no focus states arrive.
    fn expire_interaction(&self) {
        let mut pet = lock(&self.pet);
        if let Some(mood) = pet.expire_interaction(self.clock.now_ms()) {
            self.mood.publish(mood);
        }
    }
}

/// Feed every new focus state to the pet until told to stop.
///
/// Returns the number of states consumed.
async fn pump_states(
    mut focus: LatestReceiver<FocusState>,
    pet: Arc<Mutex<PetStateMachine>>,
    mood: Arc<Latest<Mood>>,
    mut stop: watch::Receiver<bool>,
) -> u64 {
    let mut consumed = 0;
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            next = focus.changed() => {
                let Some(state) = next else { break };
                consumed += 1;
                let mut machine = lock(&pet);
                if let Some(next_mood) = machine.update(&state) {
                    mood.publish(next_mood);
                }
            }
        }
    }
    consumed
}
