use thiserror::Error;

/// Errors raised by a detection source.
///
/// End-of-stream is deliberately *not* an error: sources report it as
/// `SourceTick::Exhausted` so callers cannot confuse normal termination
/// with failure.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be opened at all. Fatal at startup.
    #[error("detection source unavailable: {0}")]
    Unavailable(String),

    /// A record or the session header could not be parsed.
    #[error("malformed source record at line {line}: {source}")]
    BadRecord {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by gate geometry edits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateError {
    /// Corners out of order or zero-area after clamping.
    #[error("degenerate gate region: ({x1},{y1})-({x2},{y2})")]
    Degenerate { x1: i32, y1: i32, x2: i32, y2: i32 },
}
