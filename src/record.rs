use serde::{Deserialize, Serialize};

use crate::alert::AlertDecision;
use crate::frame::{BoundingBox, Frame, Sequence};

/// One row of the prediction table: a frame, its ground truth and the alert
/// decision taken on it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub sequence_id: String,
    pub image: String,
    pub sequence_label: bool,
    #[serde(default)]
    pub ground_truth_boxes: Vec<BoundingBox>,
    pub image_label: bool,
    pub prediction: bool,
    pub confidence: f32,
    #[serde(default)]
    pub timedelta: String,
}

impl PredictionRecord {
    pub fn from_decision(sequence: &Sequence, frame: &Frame, decision: AlertDecision) -> Self {
        Self {
            sequence_id: sequence.sequence_id.clone(),
            image: frame.path.display().to_string(),
            sequence_label: sequence.label,
            ground_truth_boxes: frame.boxes.clone(),
            image_label: frame.label,
            prediction: decision.alert,
            confidence: decision.confidence,
            timedelta: frame.timedelta.clone(),
        }
    }
}
