use serde::Deserialize;
use std::fs;

/// Session configuration. Every field has a default so an empty JSON
/// object is a valid config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// CSV audit-trail output path.
    pub csv_path: String,
    /// Allowed class ids (COCO). Empty means all classes.
    pub classes: Vec<i32>,
    /// Seconds before an unseen track's transient state is evicted.
    pub ttl_sec: f64,
    /// Bound on the durable counted-id set.
    pub counted_cap: usize,
    /// Initial inference resolution; must appear in `resolutions`.
    pub image_size: u32,
    /// Resolution cycle for the external detector.
    pub resolutions: Vec<u32>,
    /// Pixels per gate move command.
    pub move_step: i32,
    /// Pixels per gate resize command.
    pub resize_step: i32,
    /// Optional initial gate override as [x1, y1, x2, y2]; the default
    /// gate is derived from the frame size.
    pub gate: Option<[i32; 4]>,
    /// Capacity of the capture-to-processing batch queue.
    pub queue_capacity: usize,
    /// Longest the tick loop waits for a batch before skipping a tick.
    pub tick_wait_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            csv_path: "gate_counts.csv".to_string(),
            classes: vec![2, 5, 7],
            ttl_sec: 2.0,
            counted_cap: 100_000,
            image_size: 960,
            resolutions: vec![640, 832, 960, 1280],
            move_step: 5,
            resize_step: 3,
            gate: None,
            queue_capacity: 8,
            tick_wait_ms: 500,
        }
    }
}

impl Config {
    /// Load from a JSON file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: Config = serde_json::from_str(&data)?;
        Ok(cfg)
    }
}
