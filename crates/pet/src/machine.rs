//! The mood state machine.
//!
//! Time comes exclusively from the timestamps of the focus states fed in, so
//! the machine is deterministic and replayable. Rules, in priority order:
//!
//! 1. a gesture shows `Interact` until the interaction dwell passes;
//! 2. continuous absence for the absence timeout gives `Sleepy`;
//! 3. a score above the high threshold held for the long-focus duration
//!    gives `Excited`;
//! 4. a score at or above the focus threshold gives `Happy`;
//! 5. anything else with a face present gives `Sad`.
//!
//! Happy and Sad must hold for the confirmation dwell before they commit. A
//! short absence holds the current mood without interrupting that dwell or
//! the long-focus streak, and the streak only breaks once the score has
//! stayed below the high threshold for the confirmation dwell. Time spent in
//! an interaction counts toward a pending transition. A demo mood is shown
//! until the next focus update.

use mochi_common::clock::PipelineClock;
use mochi_common::config::PetSettings;
use mochi_vision::FocusState;
use serde::{Deserialize, Serialize};

use crate::mood::{FocusLevel, Gesture, Mood};

/// Snapshot of focus statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocusStats {
    pub total_focus_ms: u64,
    pub current_mood: Mood,
    pub focus_level: FocusLevel,
    pub focus_score: f32,
}

/// Something shown on top of the rule-selected mood.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Overlay {
    Interact {
        gesture: Gesture,
        since_ms: u64,
        /// First focus sample seen during the interaction.
        first_sample_ms: Option<u64>,
    },
    Demo(Mood),
}

impl Overlay {
    fn mood(self) -> Mood {
        match self {
            Overlay::Interact { .. } => Mood::Interact,
            Overlay::Demo(mood) => mood,
        }
    }
}

/// A Happy or Sad transition waiting out its dwell.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Pending {
    mood: Mood,
    since_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PetStateMachine {
    focus_threshold: f32,
    high_focus_threshold: f32,
    long_focus_ms: u64,
    absence_timeout_ms: u64,
    confirm_ms: u64,
    interact_ms: u64,
    max_focus_credit_ms: u64,

    rule_mood: Mood,
    overlay: Option<Overlay>,
    pending: Option<Pending>,
    absent_since: Option<u64>,
    high_focus_since: Option<u64>,
    /// Start of a dip below the high threshold inside a long-focus streak.
    high_focus_dip_since: Option<u64>,
    last_sample_ms: Option<u64>,

    focus_level: FocusLevel,
    focus_score: f32,
    total_focus_ms: u64,
}

impl PetStateMachine {
    pub fn new(settings: &PetSettings) -> Self {
        Self {
            focus_threshold: settings.focus_threshold,
            high_focus_threshold: settings.high_focus_threshold,
            long_focus_ms: PipelineClock::secs_to_ms(settings.long_focus_minutes as f64 * 60.0),
            absence_timeout_ms: PipelineClock::secs_to_ms(settings.absence_timeout_secs as f64),
            confirm_ms: PipelineClock::secs_to_ms(settings.confirm_secs as f64),
            interact_ms: PipelineClock::secs_to_ms(settings.interact_secs as f64),
            max_focus_credit_ms: settings.max_focus_credit_ms,
            rule_mood: Mood::Idle,
            overlay: None,
            pending: None,
            absent_since: None,
            high_focus_since: None,
            high_focus_dip_since: None,
            last_sample_ms: None,
            focus_level: FocusLevel::Away,
            focus_score: 0.0,
            total_focus_ms: 0,
        }
    }

    /// The mood currently shown.
    pub fn mood(&self) -> Mood {
        self.overlay.map(Overlay::mood).unwrap_or(self.rule_mood)
    }

    /// The mood selected by the focus rules alone.
    pub fn rule_mood(&self) -> Mood {
        self.rule_mood
    }

    pub fn focus_level(&self) -> FocusLevel {
        self.focus_level
    }

    pub fn focus_score(&self) -> f32 {
        self.focus_score
    }

    pub fn total_focus_ms(&self) -> u64 {
        self.total_focus_ms
    }

    pub fn stats(&self) -> FocusStats {
        FocusStats {
            total_focus_ms: self.total_focus_ms,
            current_mood: self.mood(),
            focus_level: self.focus_level,
            focus_score: self.focus_score,
        }
    }

    /// Feed one focus state. Returns the new mood if the shown mood changed.
    ///
    /// States older than the previous one are ignored.
    pub fn update(&mut self, state: &FocusState) -> Option<Mood> {
        let now = state.timestamp_ms;
        if self.last_sample_ms.is_some_and(|last| now < last) {
            tracing::debug!(timestamp_ms = now, "Ignoring out-of-order focus state");
            return None;
        }
        let before = self.mood();

        let present = state.face_present;
        let score = if state.focus_score.is_finite() {
            state.focus_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let level = if !present {
            FocusLevel::Away
        } else if score >= self.focus_threshold {
            FocusLevel::Focused
        } else {
            FocusLevel::Distracted
        };

        if let Some(last) = self.last_sample_ms {
            if level == FocusLevel::Focused && self.focus_level == FocusLevel::Focused {
                self.total_focus_ms += (now - last).min(self.max_focus_credit_ms);
            }
        }
        self.last_sample_ms = Some(now);
        self.focus_level = level;
        self.focus_score = score;

        if present {
            self.absent_since = None;
        } else {
            self.absent_since.get_or_insert(now);
        }
        if let Some(Overlay::Interact {
            first_sample_ms, ..
        }) = &mut self.overlay
        {
            first_sample_ms.get_or_insert(now);
        }

        if let Some(next) = self.evaluate_rules(now, present, score) {
            if next != self.rule_mood {
                tracing::debug!(from = %self.rule_mood, to = %next, "Focus rules committed");
                self.rule_mood = next;
            }
            self.pending = None;
        }

        if matches!(self.overlay, Some(Overlay::Demo(_))) {
            self.overlay = None;
        }
        self.expire_interaction(now);

        self.changed_from(before)
    }

    fn evaluate_rules(&mut self, now: u64, present: bool, score: f32) -> Option<Mood> {
        if !present {
            // A short absence holds the mood, any pending transition and the
            // long-focus streak.
            let absent_for = self.absent_since.map(|since| now - since).unwrap_or(0);
            if absent_for < self.absence_timeout_ms {
                return None;
            }
            self.high_focus_since = None;
            self.high_focus_dip_since = None;
            return Some(Mood::Sleepy);
        }

        let dip_ended_streak = self.track_high_focus(now, score);
        let excited = self
            .high_focus_since
            .is_some_and(|since| now - since >= self.long_focus_ms);
        if excited {
            return Some(Mood::Excited);
        }

        let target = if score >= self.focus_threshold {
            Mood::Happy
        } else {
            Mood::Sad
        };
        if target == self.rule_mood {
            self.pending = None;
            return None;
        }
        let since_ms = match self.pending {
            Some(pending) if pending.mood == target => pending.since_ms,
            _ => {
                // Leaving Excited: the confirmed dip already served as the dwell.
                let since_ms = match dip_ended_streak {
                    Some(dip_since) if self.rule_mood == Mood::Excited => dip_since,
                    _ => now,
                };
                self.pending = Some(Pending {
                    mood: target,
                    since_ms,
                });
                since_ms
            }
        };
        (now - since_ms >= self.confirm_ms).then_some(target)
    }

    /// Extend or break the long-focus streak with one present sample.
    ///
    /// Returns the start of the dip when a dip long enough to break the
    /// streak ends it on this sample.
    fn track_high_focus(&mut self, now: u64, score: f32) -> Option<u64> {
        if score > self.high_focus_threshold {
            self.high_focus_since.get_or_insert(now);
            self.high_focus_dip_since = None;
            return None;
        }
        self.high_focus_since?;
        let dip_since = *self.high_focus_dip_since.get_or_insert(now);
        if now - dip_since < self.confirm_ms {
            return None;
        }
        self.high_focus_since = None;
        self.high_focus_dip_since = None;
        Some(dip_since)
    }

    /// React to a gesture. Repeated gestures extend the interaction.
    pub fn on_gesture(&mut self, gesture: Gesture, now_ms: u64) -> Mood {
        tracing::info!(%gesture, "Gesture received");
        self.overlay = Some(Overlay::Interact {
            gesture,
            since_ms: now_ms,
            first_sample_ms: None,
        });
        self.mood()
    }

    /// Show `mood` until the next focus update.
    pub fn set_demo_mood(&mut self, mood: Mood) -> Mood {
        tracing::info!(%mood, "Demo mood set");
        self.overlay = Some(Overlay::Demo(mood));
        self.mood()
    }

    /// End an interaction whose dwell has passed. Returns the new mood if
    /// the shown mood changed.
    ///
    /// A transition that has been pending since the interaction's first
    /// focus sample commits as the interaction ends.
    pub fn expire_interaction(&mut self, now_ms: u64) -> Option<Mood> {
        let before = self.mood();
        let Some(Overlay::Interact {
            gesture,
            since_ms,
            first_sample_ms,
        }) = self.overlay
        else {
            return None;
        };
        if now_ms.saturating_sub(since_ms) < self.interact_ms {
            return None;
        }

        tracing::debug!(%gesture, "Interaction finished");
        self.overlay = None;
        let held = self
            .pending
            .filter(|p| first_sample_ms.is_some_and(|first| p.since_ms <= first));
        if let Some(pending) = held {
            tracing::debug!(from = %self.rule_mood, to = %pending.mood, "Focus rules committed");
            self.rule_mood = pending.mood;
            self.pending = None;
        }
        self.changed_from(before)
    }

    /// The gesture being reacted to, if any.
    pub fn active_gesture(&self) -> Option<Gesture> {
        match self.overlay {
            Some(Overlay::Interact { gesture, .. }) => Some(gesture),
            _ => None,
        }
    }

    /// Forget running streaks, for example when the camera stops. The mood
    /// and accumulated statistics stay.
    pub fn clear_streaks(&mut self) {
        self.pending = None;
        self.absent_since = None;
        self.high_focus_since = None;
        self.high_focus_dip_since = None;
        self.last_sample_ms = None;
    }

    pub fn reset_stats(&mut self) {
        self.total_focus_ms = 0;
    }

    fn changed_from(&self, before: Mood) -> Option<Mood> {
        let after = self.mood();
        if after != before {
            tracing::info!(from = %before, to = %after, "Pet mood changed");
            Some(after)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mochi_vision::HeadPose;

    const STEP_MS: u64 = 200;

    /// Feeds states at 5 Hz starting from an arbitrary epoch.
    struct Feeder {
        machine: PetStateMachine,
        now: u64,
    }

    impl Feeder {
        fn new() -> Self {
            Self {
                machine: PetStateMachine::new(&PetSettings::default()),
                now: 1_700_000_000_000,
            }
        }

        fn present(&mut self, score: f32) -> Option<Mood> {
            self.now += STEP_MS;
            let state = FocusState::present(0.9, HeadPose::default(), score, self.now);
            self.machine.update(&state)
        }

        fn absent(&mut self) -> Option<Mood> {
            self.now += STEP_MS;
            self.machine.update(&FocusState::absent(0.0, self.now))
        }

        fn present_for(&mut self, ms: u64, score: f32) {
            for _ in 0..ms / STEP_MS {
                self.present(score);
            }
        }

        fn mood(&self) -> Mood {
            self.machine.mood()
        }
    }

    #[test]
    fn starts_idle_and_away() {
        let machine = PetStateMachine::new(&PetSettings::default());
        assert_eq!(machine.mood(), Mood::Idle);
        assert_eq!(machine.focus_level(), FocusLevel::Away);
        assert_eq!(machine.total_focus_ms(), 0);
    }

    #[test]
    fn happy_commits_only_after_the_confirmation_dwell() {
        let mut feeder = Feeder::new();
        // The first sample opens the dwell; 14 more samples span 2.8 s.
        feeder.present_for(15 * STEP_MS, 0.8);
        assert_eq!(feeder.mood(), Mood::Idle);
        assert_eq!(feeder.present(0.8), Some(Mood::Happy));
    }

    #[test]
    fn single_noisy_sample_does_not_flip_the_mood() {
        let mut feeder = Feeder::new();
        feeder.present_for(4_000, 0.8);
        assert_eq!(feeder.mood(), Mood::Happy);

        assert_eq!(feeder.present(0.1), None);
        feeder.present_for(2_000, 0.8);
        assert_eq!(feeder.mood(), Mood::Happy);
    }

    #[test]
    fn one_cycle_dropout_amid_high_focus_does_not_cause_sleepy() {
        let mut feeder = Feeder::new();
        feeder.present_for(10_000, 0.9);
        assert_eq!(feeder.mood(), Mood::Happy);

        assert_eq!(feeder.absent(), None);
        for _ in 0..50 {
            assert_ne!(feeder.present(0.9), Some(Mood::Sleepy));
        }
        assert_eq!(feeder.mood(), Mood::Happy);
        assert_eq!(feeder.machine.focus_level(), FocusLevel::Focused);
    }

    #[test]
    fn sustained_absence_causes_sleepy() {
        let mut feeder = Feeder::new();
        feeder.present_for(4_000, 0.9);

        // First absent sample at t0; t0 + 4.8 s is still short of the timeout.
        for _ in 0..25 {
            assert_eq!(feeder.absent(), None);
        }
        assert_eq!(feeder.mood(), Mood::Happy);
        assert_eq!(feeder.machine.focus_level(), FocusLevel::Away);
        assert_eq!(feeder.absent(), Some(Mood::Sleepy));
    }

    #[test]
    fn long_focus_becomes_excited_and_stays_excited() {
        let mut feeder = Feeder::new();
        feeder.present_for(60_000, 0.85);
        assert_eq!(feeder.mood(), Mood::Happy);

        feeder.present_for(25 * 60_000, 0.85);
        assert_eq!(feeder.mood(), Mood::Excited);

        for _ in 0..(5 * 60_000 / STEP_MS) {
            assert_eq!(feeder.present(0.85), None);
        }
        assert_eq!(feeder.mood(), Mood::Excited);

        // Dropping below the high threshold settles back to Happy after the dwell.
        feeder.present_for(4_000, 0.6);
        assert_eq!(feeder.mood(), Mood::Happy);
    }

    #[test]
    fn long_focus_survives_a_dropped_frame() {
        let mut feeder = Feeder::new();
        feeder.present_for(26 * 60_000, 0.85);
        assert_eq!(feeder.mood(), Mood::Excited);

        assert_eq!(feeder.absent(), None);
        // Smoothing drags the first sample back below the high threshold.
        assert_eq!(feeder.present(0.68), None);
        for _ in 0..(4_000 / STEP_MS) {
            assert_eq!(feeder.present(0.85), None);
        }
        assert_eq!(feeder.mood(), Mood::Excited);
    }

    #[test]
    fn long_focus_streak_survives_short_absences_before_excited() {
        let mut feeder = Feeder::new();
        for _ in 0..26 {
            feeder.present_for(60_000 - 3 * STEP_MS, 0.85);
            for _ in 0..3 {
                feeder.absent();
            }
        }
        feeder.present_for(STEP_MS, 0.85);
        assert_eq!(feeder.mood(), Mood::Excited);
    }

    #[test]
    fn sleeping_breaks_the_long_focus_streak() {
        let mut feeder = Feeder::new();
        feeder.present_for(20 * 60_000, 0.85);
        for _ in 0..30 {
            feeder.absent();
        }
        assert_eq!(feeder.mood(), Mood::Sleepy);

        feeder.present_for(6 * 60_000, 0.85);
        assert_eq!(feeder.mood(), Mood::Happy);
    }

    #[test]
    fn wave_interacts_then_falls_back_to_sad_on_low_focus() {
        let mut feeder = Feeder::new();
        assert_eq!(feeder.machine.on_gesture(Gesture::Wave, feeder.now), Mood::Interact);
        assert_eq!(feeder.machine.active_gesture(), Some(Gesture::Wave));

        feeder.present_for(1_800, 0.2);
        assert_eq!(feeder.mood(), Mood::Interact);

        // The low score held through the whole interaction.
        assert_eq!(feeder.present(0.2), Some(Mood::Sad));
        assert_eq!(feeder.machine.rule_mood(), Mood::Sad);
        assert_eq!(feeder.machine.active_gesture(), None);

        feeder.present_for(1_600, 0.2);
        assert_eq!(feeder.mood(), Mood::Sad);
    }

    #[test]
    fn interaction_falls_back_to_the_rule_mood_when_focus_wavered() {
        let mut feeder = Feeder::new();
        feeder.present_for(4_000, 0.8);
        assert_eq!(feeder.mood(), Mood::Happy);

        feeder.machine.on_gesture(Gesture::Heart, feeder.now);
        feeder.present_for(1_000, 0.8);
        feeder.present_for(800, 0.2);
        assert_eq!(feeder.mood(), Mood::Interact);

        // Sad has only been pending for part of the interaction.
        assert_eq!(feeder.present(0.2), Some(Mood::Happy));
        // Its own dwell still runs from the first low sample.
        feeder.present_for(2_000, 0.2);
        assert_eq!(feeder.mood(), Mood::Happy);
        assert_eq!(feeder.present(0.2), Some(Mood::Sad));
    }

    #[test]
    fn repeated_gestures_extend_the_interaction() {
        let mut feeder = Feeder::new();
        feeder.machine.on_gesture(Gesture::Heart, feeder.now);
        feeder.present_for(1_600, 0.8);
        feeder.machine.on_gesture(Gesture::ThumbsUp, feeder.now);
        feeder.present_for(1_600, 0.8);
        assert_eq!(feeder.mood(), Mood::Interact);
        assert_eq!(feeder.machine.active_gesture(), Some(Gesture::ThumbsUp));
    }

    #[test]
    fn interaction_expires_without_focus_updates() {
        let mut machine = PetStateMachine::new(&PetSettings::default());
        machine.on_gesture(Gesture::Ok, 10_000);
        assert_eq!(machine.expire_interaction(11_000), None);
        assert_eq!(machine.expire_interaction(12_000), Some(Mood::Idle));
    }

    #[test]
    fn demo_mood_is_overwritten_by_the_next_update() {
        let mut feeder = Feeder::new();
        feeder.present_for(4_000, 0.8);
        assert_eq!(feeder.machine.set_demo_mood(Mood::Excited), Mood::Excited);
        assert_eq!(feeder.mood(), Mood::Excited);

        assert_eq!(feeder.present(0.8), Some(Mood::Happy));
    }

    #[test]
    fn focus_time_accumulates_with_capped_gaps() {
        let mut machine = PetStateMachine::new(&PetSettings::default());
        let focused = |ts| FocusState::present(0.9, HeadPose::default(), 0.8, ts);

        machine.update(&focused(1_000));
        machine.update(&focused(1_200));
        machine.update(&focused(1_500));
        assert_eq!(machine.total_focus_ms(), 500);

        // A ten second hole only earns the cap.
        machine.update(&focused(11_500));
        assert_eq!(machine.total_focus_ms(), 1_500);

        // Distracted and absent stretches earn nothing.
        machine.update(&FocusState::present(0.9, HeadPose::default(), 0.2, 12_000));
        machine.update(&FocusState::absent(0.0, 12_500));
        machine.update(&focused(13_000));
        assert_eq!(machine.total_focus_ms(), 1_500);

        let stats = machine.stats();
        assert_eq!(stats.focus_level, FocusLevel::Focused);
        assert_eq!(stats.focus_score, 0.8);

        machine.reset_stats();
        assert_eq!(machine.total_focus_ms(), 0);
    }

    #[test]
    fn out_of_order_states_are_ignored() {
        let mut machine = PetStateMachine::new(&PetSettings::default());
        machine.update(&FocusState::present(0.9, HeadPose::default(), 0.8, 5_000));
        assert_eq!(machine.update(&FocusState::absent(0.0, 4_000)), None);
        assert_eq!(machine.focus_level(), FocusLevel::Focused);
    }

    #[test]
    fn cleared_streaks_do_not_carry_absence_across_a_restart() {
        let mut feeder = Feeder::new();
        feeder.present_for(4_000, 0.8);
        for _ in 0..20 {
            feeder.absent();
        }
        feeder.machine.clear_streaks();
        feeder.now += 60_000;
        for _ in 0..20 {
            assert_eq!(feeder.absent(), None);
        }
        assert_eq!(feeder.mood(), Mood::Happy);
    }
}
