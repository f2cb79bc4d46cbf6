//! Frame clock.

use std::time::{Duration, Instant};

/// Measures time between frames and the frame rate over a reporting window.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    window_start: Instant,
    window_frames: u32,
}

impl Timer {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            window_start: now,
            window_frames: 0,
        }
    }

    /// Time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time since the previous tick; the first tick measures from creation.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.window_frames += 1;
        delta
    }

    /// Frames per second since the last report, once `window` has elapsed.
    /// Starts a new window when it returns `Some`.
    pub fn frame_rate(&mut self, window: Duration) -> Option<f64> {
        let span = self.last_tick.saturating_duration_since(self.window_start);
        if span < window || span.is_zero() {
            return None;
        }

        let rate = f64::from(self.window_frames) / span.as_secs_f64();
        self.window_start = self.last_tick;
        self.window_frames = 0;
        Some(rate)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
