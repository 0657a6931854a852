//! Clock and tick utilities for the capture and inference loops.
//!
//! Every timestamp published by a pipeline comes from one [`PipelineClock`]:
//! a wall-clock anchor taken at start plus monotonic elapsed time. Readings
//! therefore look like Unix milliseconds but never go backwards, even if the
//! system clock is adjusted while the pipeline runs.

use std::time::{Duration, Instant};

/// Monotonic millisecond clock anchored to the wall clock at creation.
#[derive(Debug, Clone)]
pub struct PipelineClock {
    /// The instant the clock was started.
    epoch: Instant,

    /// Unix milliseconds at `epoch`.
    epoch_unix_ms: u64,
}

impl PipelineClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        let epoch_unix_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self {
            epoch: Instant::now(),
            epoch_unix_ms,
        }
    }

    /// Create a clock from a known anchor (tests and replays).
    pub fn from_epoch(epoch: Instant, epoch_unix_ms: u64) -> Self {
        Self {
            epoch,
            epoch_unix_ms,
        }
    }

    /// Current timestamp in milliseconds. Never decreases.
    pub fn now_ms(&self) -> u64 {
        self.epoch_unix_ms + self.elapsed().as_millis() as u64
    }

    /// Time elapsed since the clock started.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Unix milliseconds at clock start.
    pub fn epoch_unix_ms(&self) -> u64 {
        self.epoch_unix_ms
    }

    /// Convert a millisecond reading to seconds.
    pub fn ms_to_secs(ms: u64) -> f64 {
        ms as f64 / 1_000.0
    }

    /// Convert seconds to milliseconds (negative values clamp to zero).
    pub fn secs_to_ms(secs: f64) -> u64 {
        (secs.max(0.0) * 1_000.0).round() as u64
    }
}

/// Selects every Kth tick of a fixed-period loop.
///
/// Tick numbering starts at 1, so with `stride = 2` ticks 2, 4, 6, ... fire.
#[derive(Debug, Clone)]
pub struct TickDivider {
    stride: u32,
    ticks: u64,
}

impl TickDivider {
    pub fn new(stride: u32) -> Self {
        Self {
            stride: stride.max(1),
            ticks: 0,
        }
    }

    /// Advance one tick. Returns true on every `stride`th tick.
    pub fn tick(&mut self) -> bool {
        self.ticks += 1;
        self.ticks % self.stride as u64 == 0
    }

    /// Ticks seen so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }
}

/// Elapsed-time rate limiter for side channels such as previews.
#[derive(Debug)]
pub struct RateController {
    target_interval_ms: u64,
    last_tick_ms: Option<u64>,
}

impl RateController {
    /// Create a controller targeting the given Hz rate.
    pub fn new(target_hz: u32) -> Self {
        Self {
            target_interval_ms: 1_000 / target_hz.max(1) as u64,
            last_tick_ms: None,
        }
    }

    /// Check if enough time has passed for the next tick.
    /// Returns true and updates internal state if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self, current_ms: u64) -> bool {
        match self.last_tick_ms {
            None => {
                self.last_tick_ms = Some(current_ms);
                true
            }
            Some(last) if current_ms >= last + self.target_interval_ms => {
                self.last_tick_ms = Some(current_ms);
                true
            }
            _ => false,
        }
    }

    /// Target interval in milliseconds.
    pub fn interval_ms(&self) -> u64 {
        self.target_interval_ms
    }
}
