/// Guard against a zero wall-clock delta.
const MIN_DT: f64 = 1e-6;

/// Exponential moving average of processing cadence.
///
/// `fps = 0.9 * fps + 0.1 * (1 / max(dt, eps))`, starting from zero.
/// Fed only from completed ticks; a skipped tick must not update it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateEstimator {
    fps: f64,
}

impl RateEstimator {
    pub fn new() -> Self {
        RateEstimator { fps: 0.0 }
    }

    /// Fold in the delta between two completed ticks, returning the new
    /// estimate.
    pub fn update(&mut self, dt: f64) -> f64 {
        self.fps = 0.9 * self.fps + 0.1 * (1.0 / dt.max(MIN_DT));
        self.fps
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }
}
