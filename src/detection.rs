use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::error::SourceError;

/// One detection as delivered by the upstream detector/tracker.
///
/// The track id is assigned upstream; this crate never re-identifies
/// objects across id resets.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectionRecord {
    pub track_id: i64,
    pub class_id: i32,
    pub confidence: f32,
    /// Bounding box as (x1, y1, x2, y2) in frame pixels.
    pub bbox: [f32; 4],
    /// Capture time in seconds.
    pub timestamp: f64,
}

impl DetectionRecord {
    /// Center point of the bounding box.
    pub fn center(&self) -> (f32, f32) {
        (
            (self.bbox[0] + self.bbox[2]) / 2.0,
            (self.bbox[1] + self.bbox[3]) / 2.0,
        )
    }
}

/// Outcome of one pull from a detection source.
///
/// Exhaustion is an ordinary value, not an error, so the tick loop can
/// treat end-of-stream as normal shutdown.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceTick {
    Batch(Vec<DetectionRecord>),
    Exhausted,
}

/// Detector-facing knobs owned by the control surface. The source reads
/// them on every pull; the core never interprets them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSettings {
    /// Minimum confidence a record must carry to be delivered.
    pub min_confidence: f32,
    /// Inference resolution hint for live detectors.
    pub image_size: u32,
}

/// Anything that can feed detection batches to the tick loop.
pub trait DetectionSource {
    /// Frame dimensions, fixed for the session, read once at open.
    fn frame_size(&self) -> (u32, u32);

    /// Pull the next batch. `settings` reflects the control surface as
    /// of this tick.
    fn next_batch(&mut self, settings: &SourceSettings) -> Result<SourceTick, SourceError>;
}

#[derive(Debug, Deserialize)]
struct SessionHeader {
    frame_width: u32,
    frame_height: u32,
}

/// Replays tracked detections from a JSON-lines file.
///
/// The first line is a session header with the frame dimensions; every
/// following line is one `DetectionRecord`. Consecutive records sharing
/// a timestamp form one batch (one tick). Unparseable body lines are
/// dropped with a warning, not fatal.
#[derive(Debug)]
pub struct JsonlSource {
    reader: BufReader<File>,
    frame_width: u32,
    frame_height: u32,
    classes: Vec<i32>,
    /// First record of the next batch, read past the current one.
    pending: Option<DetectionRecord>,
    line_no: usize,
    bad_lines: u64,
}

impl JsonlSource {
    /// Open a detection file. `classes` is the allow-list of class ids;
    /// empty means all classes pass.
    pub fn open(path: &Path, classes: Vec<i32>) -> Result<Self, SourceError> {
        let file = File::open(path)
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let mut reader = BufReader::new(file);

        let mut header_line = String::new();
        let n = reader.read_line(&mut header_line)?;
        if n == 0 {
            return Err(SourceError::Unavailable(format!(
                "{}: empty detection file",
                path.display()
            )));
        }
        let header: SessionHeader = serde_json::from_str(header_line.trim())
            .map_err(|source| SourceError::BadRecord { line: 1, source })?;

        Ok(JsonlSource {
            reader,
            frame_width: header.frame_width,
            frame_height: header.frame_height,
            classes,
            pending: None,
            line_no: 1,
            bad_lines: 0,
        })
    }

    /// Body lines dropped because they failed to parse.
    pub fn bad_lines(&self) -> u64 {
        self.bad_lines
    }

    fn read_record(&mut self) -> Result<Option<DetectionRecord>, SourceError> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<DetectionRecord>(trimmed) {
                Ok(rec) => return Ok(Some(rec)),
                Err(e) => {
                    self.bad_lines += 1;
                    warn!(line = self.line_no, error = %e, "dropping unparseable detection line");
                }
            }
        }
    }
}

impl DetectionSource for JsonlSource {
    fn frame_size(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }

    fn next_batch(&mut self, settings: &SourceSettings) -> Result<SourceTick, SourceError> {
        let first = match self.pending.take() {
            Some(rec) => rec,
            None => match self.read_record()? {
                Some(rec) => rec,
                None => return Ok(SourceTick::Exhausted),
            },
        };

        let ts = first.timestamp;
        let mut batch = vec![first];
        loop {
            match self.read_record()? {
                Some(rec) if rec.timestamp == ts => batch.push(rec),
                Some(rec) => {
                    self.pending = Some(rec);
                    break;
                }
                None => break,
            }
        }

        batch.retain(|rec| {
            rec.confidence >= settings.min_confidence
                && (self.classes.is_empty() || self.classes.contains(&rec.class_id))
        });
        Ok(SourceTick::Batch(batch))
    }
}
