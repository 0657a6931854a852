//! FocusMochi App
//!
//! [`MochiController`] is the command surface a shell (tray app, CLI, web
//! view) talks to. It starts and stops the vision pipeline, forwards every
//! focus state to the pet state machine, and republishes mood changes.
//!
//! ```text
//!  VisionHandle ──Latest<FocusState>──▶ pump task ──▶ PetStateMachine
//!                                                          │
//!  commands (gesture, demo mood) ─────────────────────────▶│
//!                                                          ▼
//!                                                   Latest<Mood>
//! ```

pub mod controller;

pub use controller::{MochiController, PetStateResponse, VisionStatus};
