//! FocusMochi Pet
//!
//! Derives the pet's mood from the stream of focus states and from discrete
//! gesture events. See [`machine`] for the transition rules.

pub mod machine;
pub mod mood;

pub use machine::{FocusStats, PetStateMachine};
pub use mood::{FocusLevel, Gesture, Mood};
