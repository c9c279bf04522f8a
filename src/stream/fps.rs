use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Frames counted over roughly one-second windows. The label shows the count of
/// the last completed window.
#[derive(Debug)]
pub struct FpsCounter {
    last: Instant,
    accumulated: Duration,
    frames: u32,
    label: String,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
            accumulated: Duration::ZERO,
            frames: 0,
            label: "FPS: ??".to_string(),
        }
    }

    /// Records one frame ending now.
    pub fn tick(&mut self) -> &str {
        let now = Instant::now();
        let elapsed = now - self.last;
        self.last = now;
        self.record(elapsed)
    }

    /// Records one frame that took `elapsed`.
    pub fn record(&mut self, elapsed: Duration) -> &str {
        self.accumulated += elapsed;
        self.frames += 1;
        if self.accumulated >= WINDOW {
            self.accumulated -= WINDOW;
            self.label = format!("FPS: {}", self.frames);
            self.frames = 0;
        }
        &self.label
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}
