pub mod config;
pub mod control;
pub mod counter;
pub mod detection;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod rate;
pub mod sink;

// Re-export main types
pub use crate::config::Config;
pub use crate::control::{Command, Direction, SensitivityPreset};
pub use crate::counter::{CrossingEvent, GateCounter};
pub use crate::detection::{DetectionRecord, DetectionSource, JsonlSource, SourceTick};
pub use crate::gate::{GateGeometry, GateRegion};
pub use crate::pipeline::{Pipeline, Summary};
pub use crate::sink::{CsvSink, EventSink};
