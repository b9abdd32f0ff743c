//! Time management utilities
//!
//! `FrameTimer` is owned by the frame loop and passed around explicitly; there
//! is no process-wide timer.

use std::time::{Duration, Instant};

/// Frame timer tracking delta time and a once-per-second FPS sample
pub struct FrameTimer {
    last_frame: Instant,
    delta: Duration,
    second_start: Instant,
    frames_this_second: u32,
    last_fps: u32,
    second_elapsed: bool,
    frame_count: u64,
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTimer {
    /// Create a new timer
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            last_frame: now,
            delta: Duration::ZERO,
            second_start: now,
            frames_this_second: 0,
            last_fps: 0,
            second_elapsed: false,
            frame_count: 0,
        }
    }

    /// Update the timer (should be called once per frame)
    pub fn update(&mut self) {
        let now = Instant::now();
        self.delta = now.duration_since(self.last_frame);
        self.last_frame = now;
        self.frame_count += 1;
        self.frames_this_second += 1;

        self.second_elapsed = now.duration_since(self.second_start) >= Duration::from_secs(1);
        if self.second_elapsed {
            self.last_fps = self.frames_this_second;
            self.frames_this_second = 0;
            self.second_start = now;
        }
    }

    /// Time between the two most recent updates
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Delta time in seconds
    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Frames counted during the last full second
    pub fn fps(&self) -> u32 {
        self.last_fps
    }

    /// True on the update that closed a one-second window
    pub fn is_second(&self) -> bool {
        self.second_elapsed
    }

    /// Total number of updates
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Sleep away whatever is left of the current frame budget
    pub fn hold_at_fps(&self, target_fps: u32) {
        if target_fps == 0 {
            return;
        }
        let budget = Duration::from_secs(1) / target_fps;
        let spent = self.last_frame.elapsed();
        if let Some(remaining) = budget.checked_sub(spent) {
            std::thread::sleep(remaining);
        }
    }
}

/// Simple stopwatch for measuring elapsed time
pub struct Stopwatch {
    start_time: Option<Instant>,
    elapsed: Duration,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    /// Create a new stopped stopwatch
    pub fn new() -> Self {
        Self {
            start_time: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Create a new stopwatch and start it immediately
    pub fn start_new() -> Self {
        let mut stopwatch = Self::new();
        stopwatch.start();
        stopwatch
    }

    /// Start the stopwatch
    pub fn start(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Stop the stopwatch and accumulate elapsed time
    pub fn stop(&mut self) {
        if let Some(start) = self.start_time.take() {
            self.elapsed += start.elapsed();
        }
    }

    /// Get the elapsed time
    pub fn elapsed(&self) -> Duration {
        let running = self.start_time.map_or(Duration::ZERO, |start| start.elapsed());
        self.elapsed + running
    }

    /// Check if the stopwatch is currently running
    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }
}
