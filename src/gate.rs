use serde::Serialize;

use crate::error::GateError;

/// Minimum vertical thickness of the gate in pixels.
pub const MIN_THICKNESS: i32 = 12;

/// The counting rectangle, in pixel coordinates of the source frame.
///
/// Invariant: `x1 < x2`, `y1 < y2`, all coordinates within
/// `[0, frame_width] x [0, frame_height]`. Only `GateGeometry` mutates
/// a region; everyone else works on value snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateRegion {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl GateRegion {
    /// Closed-interval containment test on both axes.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x1 as f32 && x <= self.x2 as f32 && y >= self.y1 as f32 && y <= self.y2 as f32
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }
}

/// Owns the mutable counting rectangle and validates every edit.
#[derive(Debug, Clone)]
pub struct GateGeometry {
    region: GateRegion,
    frame_width: i32,
    frame_height: i32,
}

impl GateGeometry {
    /// Default gate for a frame: a band in the lower-right quadrant
    /// (x: 50%..80% of width, y: 60%..80% of height).
    pub fn for_frame(frame_width: u32, frame_height: u32) -> Self {
        let (w, h) = (frame_width as i32, frame_height as i32);
        GateGeometry {
            region: GateRegion {
                x1: w / 2,
                y1: h * 6 / 10,
                x2: w * 8 / 10,
                y2: h * 8 / 10,
            },
            frame_width: w,
            frame_height: h,
        }
    }

    /// Replace the region wholesale. The input is clamped to frame
    /// bounds first; if the result is degenerate the current region is
    /// left untouched.
    pub fn set_region(&mut self, region: GateRegion) -> Result<(), GateError> {
        let clamped = GateRegion {
            x1: region.x1.clamp(0, self.frame_width),
            y1: region.y1.clamp(0, self.frame_height),
            x2: region.x2.clamp(0, self.frame_width),
            y2: region.y2.clamp(0, self.frame_height),
        };
        if clamped.x1 >= clamped.x2 || clamped.y1 >= clamped.y2 {
            return Err(GateError::Degenerate {
                x1: clamped.x1,
                y1: clamped.y1,
                x2: clamped.x2,
                y2: clamped.y2,
            });
        }
        self.region = clamped;
        Ok(())
    }

    /// Translate the whole gate by (dx, dy), clamped so the rectangle
    /// stays inside the frame. Size is preserved.
    pub fn shift(&mut self, dx: i32, dy: i32) {
        let w = self.region.width();
        let h = self.region.height();
        let x1 = (self.region.x1 + dx).clamp(0, self.frame_width - w);
        let y1 = (self.region.y1 + dy).clamp(0, self.frame_height - h);
        self.region = GateRegion {
            x1,
            y1,
            x2: x1 + w,
            y2: y1 + h,
        };
    }

    /// Grow or shrink the vertical extent by `delta` pixels. Floors at
    /// `MIN_THICKNESS`, ceils at the frame height. A gate already
    /// thinner than the floor (set against the bottom edge) can only
    /// stay where it is or grow.
    pub fn resize(&mut self, delta: i32) {
        let floor = (self.region.y1 + MIN_THICKNESS).min(self.frame_height);
        self.region.y2 = (self.region.y2 + delta).clamp(floor, self.frame_height);
    }

    /// Immutable copy for concurrent readers.
    pub fn snapshot(&self) -> GateRegion {
        self.region
    }

    pub fn frame_size(&self) -> (i32, i32) {
        (self.frame_width, self.frame_height)
    }
}
