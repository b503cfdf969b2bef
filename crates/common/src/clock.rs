//! Frame timing utilities.
//!
//! Every frame in a job is stamped from a fixed frame rate anchored at
//! sequence index zero. This module provides utilities for:
//! - Converting between sequence indices and presentation timestamps
//! - Estimating frame counts from durations
//! - Throttling progress reports

/// Nanoseconds per second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Maps sequence indices to presentation timestamps for a constant frame rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    fps: f64,
}

impl FrameClock {
    /// Create a clock for the given frame rate. Non-positive or non-finite
    /// rates fall back to a single still frame at t=0.
    pub fn new(fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 0.0 };
        Self { fps }
    }

    /// Clock for a single still image.
    pub fn still() -> Self {
        Self { fps: 0.0 }
    }

    /// Frame rate this clock was built for (0 for stills).
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Presentation timestamp of a frame in nanoseconds.
    pub fn pts_ns(&self, index: u64) -> u64 {
        if self.fps == 0.0 {
            return 0;
        }
        (index as f64 * NANOS_PER_SEC as f64 / self.fps).round() as u64
    }

    /// Duration of one frame in nanoseconds.
    pub fn frame_duration_ns(&self) -> u64 {
        if self.fps == 0.0 {
            return 0;
        }
        (NANOS_PER_SEC as f64 / self.fps).round() as u64
    }

    /// Number of frames covering `duration_secs` (at least one).
    pub fn frame_count(&self, duration_secs: f64) -> u64 {
        if self.fps == 0.0 || duration_secs <= 0.0 {
            return 1;
        }
        ((duration_secs * self.fps).round() as u64).max(1)
    }

    /// Convert a nanosecond value to seconds.
    pub fn ns_to_secs(ns: u64) -> f64 {
        ns as f64 / NANOS_PER_SEC as f64
    }

    /// Convert seconds to nanoseconds.
    pub fn secs_to_ns(secs: f64) -> u64 {
        (secs * NANOS_PER_SEC as f64) as u64
    }
}

/// Emits a progress value only when it moved by at least one step.
#[derive(Debug)]
pub struct ProgressThrottle {
    step: f64,
    last: Option<f64>,
}

impl ProgressThrottle {
    /// Create a throttle that reports every `step` percent.
    pub fn new(step: f64) -> Self {
        Self {
            step: step.max(0.0),
            last: None,
        }
    }

    /// Returns true and records the value if it should be reported.
    /// The first value and 100% are always reported.
    pub fn should_report(&mut self, percent: f64) -> bool {
        match self.last {
            None => {
                self.last = Some(percent);
                true
            }
            Some(last) if percent >= 100.0 && last < 100.0 => {
                self.last = Some(percent);
                true
            }
            Some(last) if percent >= last + self.step => {
                self.last = Some(percent);
                true
            }
            _ => false,
        }
    }
}
