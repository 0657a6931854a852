//! Randomised focus streams against the mood rules.

use mochi_common::config::PetSettings;
use mochi_pet::{Mood, PetStateMachine};
use mochi_vision::{FocusState, HeadPose};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
struct Sample {
    present: bool,
    score: f32,
    dt_ms: u64,
}

fn sample() -> impl Strategy<Value = Sample> {
    (prop::bool::weighted(0.8), 0.0f32..=1.0, 50u64..400).prop_map(|(present, score, dt_ms)| {
        Sample {
            present,
            score,
            dt_ms,
        }
    })
}

fn runs() -> impl Strategy<Value = Vec<Sample>> {
    prop_oneof![
        prop::collection::vec(sample(), 1..300),
        // Long flat stretches with a few interruptions.
        (prop::collection::vec(sample(), 1..20), 10usize..60).prop_map(|(base, repeat)| {
            base.iter()
                .flat_map(|s| std::iter::repeat(*s).take(repeat))
                .collect()
        }),
    ]
}

proptest! {
    #[test]
    fn transitions_only_commit_after_their_dwell(samples in runs()) {
        let settings = PetSettings::default();
        let mut machine = PetStateMachine::new(&settings);

        let mut now = 1_000_000u64;
        let mut absent_since: Option<u64> = None;
        let mut happy_since: Option<u64> = None;
        let mut sad_since: Option<u64> = None;

        for s in samples {
            now += s.dt_ms;
            let state = if s.present {
                FocusState::present(0.9, HeadPose::default(), s.score, now)
            } else {
                FocusState::absent(s.score, now)
            };
            let happy = s.present && state.focus_score >= settings.focus_threshold;
            let sad = s.present && !happy;

            // Short absences do not interrupt a Happy or Sad streak.
            absent_since = if s.present { None } else { absent_since.or(Some(now)) };
            if happy {
                happy_since = happy_since.or(Some(now));
            } else if sad {
                happy_since = None;
            }
            if sad {
                sad_since = sad_since.or(Some(now));
            } else if happy {
                sad_since = None;
            }

            match machine.update(&state) {
                Some(Mood::Sleepy) => {
                    let since = absent_since.unwrap_or(now);
                    prop_assert!(now - since >= 5_000, "slept after {} ms", now - since);
                    happy_since = None;
                    sad_since = None;
                }
                Some(Mood::Happy) => {
                    let since = happy_since.unwrap_or(now);
                    prop_assert!(now - since >= 3_000, "happy after {} ms", now - since);
                }
                Some(Mood::Sad) => {
                    let since = sad_since.unwrap_or(now);
                    prop_assert!(now - since >= 3_000, "sad after {} ms", now - since);
                }
                Some(other) => prop_assert!(false, "unexpected transition to {other}"),
                None => {}
            }
            prop_assert_ne!(machine.mood(), Mood::Interact);
        }
    }

    #[test]
    fn focus_time_never_exceeds_elapsed_time(samples in runs()) {
        let mut machine = PetStateMachine::new(&PetSettings::default());
        let start = 500u64;
        let mut now = start;
        for s in samples {
            now += s.dt_ms;
            let state = if s.present {
                FocusState::present(0.9, HeadPose::default(), s.score, now)
            } else {
                FocusState::absent(0.0, now)
            };
            machine.update(&state);
            prop_assert!(machine.total_focus_ms() <= now - start);
        }
    }
}

#[test]
fn flicker_between_present_and_absent_never_sleeps() {
    let mut machine = PetStateMachine::new(&PetSettings::default());
    let mut now = 0;
    for i in 0..2_000u64 {
        now += 200;
        let state = if i % 10 == 9 {
            FocusState::absent(0.5, now)
        } else {
            FocusState::present(0.9, HeadPose::default(), 0.75, now)
        };
        machine.update(&state);
        assert_ne!(machine.mood(), Mood::Sleepy);
    }
    assert!(matches!(machine.mood(), Mood::Happy | Mood::Excited));
}
