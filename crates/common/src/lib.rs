//! FocusMochi Common Utilities
//!
//! Shared infrastructure for all FocusMochi crates:
//! - Error types and result aliases
//! - Clock and tick utilities for the capture/inference loops
//! - Single-slot "latest value" broadcast channels
//! - Tracing/logging initialization
//! - Configuration loading and validation

pub mod clock;
pub mod config;
pub mod error;
pub mod latest;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
pub use latest::*;
