use serde::Serialize;

/// Default resolution cycle, smallest to largest.
pub const DEFAULT_RESOLUTIONS: [u32; 4] = [640, 832, 960, 1280];

/// The closed set of control actions. Any input device (keyboard,
/// socket, test harness) maps onto these; the tick loop drains them
/// atomically at tick start so no command lands mid-evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Clear all counting state; gate geometry stays put.
    Reset,
    /// Translate the gate by `step` pixels in a direction.
    MoveGate(Direction, i32),
    /// Grow (positive) or shrink (negative) the gate thickness.
    ResizeGate(i32),
    /// Swap between the two confidence presets.
    ToggleSensitivity,
    /// Advance to the next inference resolution, wrapping.
    CycleResolution,
    /// Finish the current tick, flush, and stop.
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Pixel delta for a unit step.
    pub fn delta(&self, step: i32) -> (i32, i32) {
        match self {
            Direction::Up => (0, -step),
            Direction::Down => (0, step),
            Direction::Left => (-step, 0),
            Direction::Right => (step, 0),
        }
    }
}

/// Named confidence presets for the external detector. Day is the
/// normal threshold; Night lowers it to pick up more in poor light.
/// Pure pass-through: not persisted core state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SensitivityPreset {
    Day,
    Night,
}

impl SensitivityPreset {
    pub fn toggle(self) -> Self {
        match self {
            SensitivityPreset::Day => SensitivityPreset::Night,
            SensitivityPreset::Night => SensitivityPreset::Day,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            SensitivityPreset::Day => 0.25,
            SensitivityPreset::Night => 0.15,
        }
    }
}

/// Cursor over a fixed ordered list of inference resolutions. The
/// external detector consumes the current value on its next pull.
#[derive(Debug, Clone)]
pub struct ResolutionCycle {
    values: Vec<u32>,
    cursor: usize,
}

impl ResolutionCycle {
    /// Start at `initial` if present in `values`, else at the first
    /// entry. Empty input falls back to the default list.
    pub fn new(values: Vec<u32>, initial: u32) -> Self {
        let values = if values.is_empty() {
            DEFAULT_RESOLUTIONS.to_vec()
        } else {
            values
        };
        let cursor = values.iter().position(|&v| v == initial).unwrap_or(0);
        ResolutionCycle { values, cursor }
    }

    pub fn current(&self) -> u32 {
        self.values[self.cursor]
    }

    /// Advance the cursor, wrapping, and return the new value.
    pub fn advance(&mut self) -> u32 {
        self.cursor = (self.cursor + 1) % self.values.len();
        self.current()
    }
}
