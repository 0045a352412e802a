//! Per-sequence scoring.
//!
//! `run_sequence` is pure with respect to everything but the backend: it
//! builds its own `AlertWindow`, so sequences never share alert state and may
//! be scored independently.

use anyhow::Result;

use crate::alert::{AlertWindow, ConfidenceAggregation};
use crate::config::EvalConfig;
use crate::detect::ScoreBackend;
use crate::error::EvalError;
use crate::frame::Sequence;
use crate::record::PredictionRecord;

/// Alerting parameters shared by every sequence of a run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlertSettings {
    pub nb_consecutive_frames: usize,
    pub conf_thresh: f32,
    pub aggregation: ConfidenceAggregation,
}

impl AlertSettings {
    /// A fresh, empty window for one sequence.
    pub fn window(&self) -> Result<AlertWindow> {
        AlertWindow::new(self.nb_consecutive_frames, self.conf_thresh, self.aggregation)
    }
}

impl From<&EvalConfig> for AlertSettings {
    fn from(cfg: &EvalConfig) -> Self {
        Self {
            nb_consecutive_frames: cfg.nb_consecutive_frames,
            conf_thresh: cfg.conf_thresh,
            aggregation: cfg.aggregation,
        }
    }
}

/// Score every frame of `sequence` in order and return one record per frame.
///
/// A frame whose inference fails is recorded with a zero raw score; the rest
/// of the sequence is still scored.
pub fn run_sequence(
    sequence: &Sequence,
    backend: &mut dyn ScoreBackend,
    settings: &AlertSettings,
) -> Result<Vec<PredictionRecord>> {
    let mut window = settings.window()?;
    let records = run_sequence_with(sequence, backend, &mut window);
    window.reset();
    Ok(records)
}

/// Same as `run_sequence` against a caller-owned window.
///
/// The window is reset before the first frame, so a window reused from a
/// previous sequence starts clean.
pub fn run_sequence_with(
    sequence: &Sequence,
    backend: &mut dyn ScoreBackend,
    window: &mut AlertWindow,
) -> Vec<PredictionRecord> {
    window.reset();
    let mut records = Vec::with_capacity(sequence.len());
    for frame in &sequence.frames {
        let raw = match backend.inference(frame) {
            Ok(score) => score,
            Err(e) => {
                let err = EvalError::FrameInference {
                    path: frame.path.display().to_string(),
                    reason: e.to_string(),
                };
                log::warn!("{}; scoring frame as 0", err);
                0.0
            }
        };
        let decision = window.observe(raw);
        records.push(PredictionRecord::from_decision(sequence, frame, decision));
    }
    records
}
