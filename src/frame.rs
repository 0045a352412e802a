//! Labeled frames and sequences.
//!
//! - `Frame`: one image of a sequence with its per-image ground truth.
//! - `Sequence`: chronologically ordered frames from one camera event, sharing
//!   a single ground-truth label.
//!
//! Both are immutable once built; the evaluation loop only reads them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timedelta::{format_timedelta, parse_timedelta};

// ----------------------------------------------------------------------------
// BoundingBox: ground-truth annotation, opaque to scoring
// ----------------------------------------------------------------------------

/// Normalized `xyxy` box (0..1 coordinates).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub path: PathBuf,
    /// Does this image show smoke.
    pub label: bool,
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
    /// Elapsed time since the first frame of the sequence, as recorded by the
    /// labeling tool. Only used for detection delay.
    #[serde(default)]
    pub timedelta: String,
}

impl Frame {
    pub fn new(path: impl Into<PathBuf>, label: bool, elapsed: Duration) -> Self {
        Self {
            path: path.into(),
            label,
            boxes: Vec::new(),
            timedelta: format_timedelta(elapsed),
        }
    }

    pub fn with_boxes(mut self, boxes: Vec<BoundingBox>) -> Self {
        self.boxes = boxes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed elapsed time, `None` when the recorded value is unusable.
    pub fn elapsed(&self) -> Option<Duration> {
        parse_timedelta(&self.timedelta)
    }
}

// ----------------------------------------------------------------------------
// Sequence
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub sequence_id: String,
    /// Does the sequence contain a fire at any point.
    pub label: bool,
    #[serde(rename = "images")]
    pub frames: Vec<Frame>,
}

impl Sequence {
    pub fn new(sequence_id: impl Into<String>, label: bool, frames: Vec<Frame>) -> Self {
        Self {
            sequence_id: sequence_id.into(),
            label,
            frames,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True when every parseable timedelta is non-decreasing in frame order.
    pub fn is_chronological(&self) -> bool {
        let mut last: Option<Duration> = None;
        for elapsed in self.frames.iter().filter_map(Frame::elapsed) {
            if matches!(last, Some(prev) if elapsed < prev) {
                return false;
            }
            last = Some(elapsed);
        }
        true
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sequence {} ({} frames, label={})",
            self.sequence_id,
            self.frames.len(),
            self.label
        )
    }
}
