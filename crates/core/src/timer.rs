//! Frame timer used by the frame loop for delta time and averages.

use std::time::{Duration, Instant};

/// Measures per-frame delta time and keeps a running frame count.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    frames: u64,
    longest_frame: Duration,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            frames: 0,
            longest_frame: Duration::ZERO,
        }
    }

    /// Total elapsed time since the timer was created or reset.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Marks the end of a frame and returns the time since the previous one.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        self.frames += 1;
        self.longest_frame = self.longest_frame.max(delta);
        delta
    }

    /// Same as [`tick`](Self::tick), in seconds.
    pub fn delta_secs(&mut self) -> f32 {
        self.tick().as_secs_f32()
    }

    /// Number of frames ticked so far.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// The slowest frame seen so far.
    #[inline]
    pub fn longest_frame(&self) -> Duration {
        self.longest_frame
    }

    /// Mean frame time, or zero before the first tick.
    pub fn average_frame_time(&self) -> Duration {
        if self.frames == 0 {
            return Duration::ZERO;
        }
        let total = self.last_tick - self.start;
        total.div_f64(self.frames as f64)
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counts_frames() {
        let mut timer = Timer::new();
        assert_eq!(timer.frame_count(), 0);
        assert_eq!(timer.average_frame_time(), Duration::ZERO);

        timer.tick();
        timer.tick();
        assert_eq!(timer.frame_count(), 2);
        assert!(timer.longest_frame() <= timer.elapsed());
    }

    #[test]
    fn test_reset_clears_frames() {
        let mut timer = Timer::new();
        timer.tick();
        timer.reset();
        assert_eq!(timer.frame_count(), 0);
        assert_eq!(timer.longest_frame(), Duration::ZERO);
    }
}
