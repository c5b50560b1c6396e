use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::warn;

use crate::counter::CrossingEvent;

/// Consumes the crossing-event stream. Implementations must never let a
/// write failure corrupt or lose counting state upstream: a failing
/// sink degrades, it does not abort the tick loop.
pub trait EventSink {
    fn write_events(&mut self, events: &[CrossingEvent]);
    fn flush(&mut self);
    /// True while previously written rows are still buffered after a
    /// write failure.
    fn degraded(&self) -> bool {
        false
    }
}

/// Append-only CSV audit trail, one row per evaluated detection.
///
/// Header `ts,id,cls,x,y,crossed` goes out once at open. Timestamps
/// carry three decimals; centers are written as whole pixels; crossed
/// is 0 or 1. Rows that fail to write stay buffered and are retried on
/// the next write or flush.
pub struct CsvSink<W: Write> {
    writer: W,
    pending: String,
    degraded: bool,
}

impl<W: Write> CsvSink<W> {
    pub fn new(writer: W) -> Self {
        let mut sink = CsvSink {
            writer,
            pending: String::from("ts,id,cls,x,y,crossed\n"),
            degraded: false,
        };
        sink.try_drain();
        sink
    }

    fn try_drain(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        match self.writer.write_all(self.pending.as_bytes()) {
            Ok(()) => {
                self.pending.clear();
                if self.degraded {
                    warn!("event sink recovered, buffered rows flushed");
                    self.degraded = false;
                }
            }
            Err(e) => {
                if !self.degraded {
                    warn!(error = %e, "event sink write failed, buffering rows");
                }
                self.degraded = true;
            }
        }
    }

    #[cfg(test)]
    fn get_ref(&self) -> &W {
        &self.writer
    }
}

impl CsvSink<BufWriter<File>> {
    /// Open (truncating) a CSV file at `path`.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(CsvSink::new(BufWriter::new(file)))
    }
}

impl<W: Write> EventSink for CsvSink<W> {
    fn write_events(&mut self, events: &[CrossingEvent]) {
        use std::fmt::Write as _;
        for ev in events {
            let _ = writeln!(
                self.pending,
                "{:.3},{},{},{},{},{}",
                ev.timestamp,
                ev.track_id,
                ev.class_id,
                ev.center_x.round() as i32,
                ev.center_y.round() as i32,
                ev.crossed as u8,
            );
        }
        self.try_drain();
    }

    fn flush(&mut self) {
        self.try_drain();
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "event sink flush failed");
            self.degraded = true;
        }
    }

    fn degraded(&self) -> bool {
        self.degraded
    }
}

/// In-memory sink, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct VecSink {
    pub events: Vec<CrossingEvent>,
}

impl EventSink for VecSink {
    fn write_events(&mut self, events: &[CrossingEvent]) {
        self.events.extend_from_slice(events);
    }

    fn flush(&mut self) {}
}
