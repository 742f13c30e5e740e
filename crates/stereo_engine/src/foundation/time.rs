//! Frame clock and frame-rate reporting

use std::time::{Duration, Instant};

/// Frame clock for the engine loop
///
/// Deltas are clamped to `max_delta`, so a long stall hands the
/// application one bounded step instead of a jump.
pub struct Timer {
    started: Instant,
    last_tick: Instant,
    delta: Duration,
    max_delta: Duration,
    ticks: u64,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Default clamp for a single step
    pub const DEFAULT_MAX_DELTA: Duration = Duration::from_millis(250);

    /// Start a clock now
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_tick: now,
            delta: Duration::ZERO,
            max_delta: Self::DEFAULT_MAX_DELTA,
            ticks: 0,
        }
    }

    /// Change the clamp applied to each step
    pub fn with_max_delta(mut self, max_delta: Duration) -> Self {
        self.max_delta = max_delta;
        self
    }

    /// Advance one frame; returns the clamped step in seconds
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        self.delta = now.duration_since(self.last_tick).min(self.max_delta);
        self.last_tick = now;
        self.ticks += 1;
        self.delta_time()
    }

    /// Last clamped step in seconds
    pub fn delta_time(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Wall time since the clock started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Number of ticks so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// Windowed frame-rate counter
///
/// Accumulates frame durations and reports an average once every
/// `interval` frames.
pub struct FpsCounter {
    interval: u32,
    frames: u32,
    accumulated: Duration,
}

impl FpsCounter {
    /// Create a counter reporting every `interval` frames (minimum 1)
    pub fn new(interval: u32) -> Self {
        Self {
            interval: interval.max(1),
            frames: 0,
            accumulated: Duration::ZERO,
        }
    }

    /// Record one frame; returns the average FPS when a window completes
    pub fn record(&mut self, frame_time: Duration) -> Option<f32> {
        self.frames += 1;
        self.accumulated += frame_time;

        if self.frames < self.interval {
            return None;
        }

        let seconds = self.accumulated.as_secs_f32();
        let fps = if seconds > 0.0 {
            self.frames as f32 / seconds
        } else {
            0.0
        };

        self.frames = 0;
        self.accumulated = Duration::ZERO;
        Some(fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fps_counter_reports_once_per_window() {
        let mut counter = FpsCounter::new(4);
        let frame = Duration::from_millis(10);

        assert_eq!(counter.record(frame), None);
        assert_eq!(counter.record(frame), None);
        assert_eq!(counter.record(frame), None);
        let fps = counter.record(frame).expect("window complete");
        assert!((fps - 100.0).abs() < 0.01);

        // Window restarts
        assert_eq!(counter.record(frame), None);
    }

    #[test]
    fn test_timer_clamps_long_steps() {
        let mut timer = Timer::new().with_max_delta(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(timer.tick(), 0.0);
        assert_eq!(timer.ticks(), 1);
        assert!(timer.elapsed() >= Duration::from_millis(2));
    }

    #[test]
    fn test_fps_counter_zero_duration() {
        let mut counter = FpsCounter::new(1);
        assert_eq!(counter.record(Duration::ZERO), Some(0.0));
    }
}
