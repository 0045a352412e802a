//! Engine evaluation for wildfire smoke detection.
//!
//! Replays the consecutive-frame alerting of the detection engine over labeled
//! image sequences and scores the result at two granularities.
//!
//! # Pipeline
//!
//! 1. A `ScoreBackend` gives one confidence per frame.
//! 2. An `AlertWindow` (fresh per sequence) turns the last
//!    `nb_consecutive_frames` confidences into an alert decision.
//! 3. `run_sequence` builds one `PredictionRecord` per frame.
//! 4. `EngineEvaluator` loops over the dataset, resumes and checkpoints the
//!    prediction table through a `PredictionStore`.
//! 5. `RunMetrics` reduces the table to image-level and sequence-level
//!    confusion matrices, with the average detection delay of true-positive
//!    sequences.
//!
//! # Module Structure
//!
//! - `alert`: sliding-window alert state machine and aggregation policies
//! - `runner`: per-sequence scoring
//! - `evaluation`: dataset loop, resume and checkpoints
//! - `metrics` / `report`: pure aggregation and its reporting
//! - `detect`: scoring backends and model file handling
//! - `storage`: run-keyed prediction tables (SQLite, in-memory)

pub mod alert;
pub mod config;
pub mod dataset;
pub mod detect;
pub mod error;
pub mod evaluation;
pub mod frame;
pub mod metrics;
pub mod record;
pub mod report;
pub mod runner;
pub mod storage;
pub mod timedelta;

pub use alert::{AlertDecision, AlertWindow, ConfidenceAggregation};
pub use config::EvalConfig;
pub use dataset::Dataset;
pub use detect::{CommandExporter, ModelArtifact, ModelExporter, ReplayBackend, ScoreBackend};
pub use error::EvalError;
pub use evaluation::{generate_run_id, EngineEvaluator, NoProgress, ProgressSink};
pub use frame::{BoundingBox, Frame, Sequence};
pub use metrics::{
    compute_image_metrics, compute_sequence_metrics, detection_delay, ConfusionMatrix,
    ImageMetrics, RunMetrics, SequenceBuckets, SequenceMetrics, SequenceOutcome,
};
pub use record::PredictionRecord;
pub use runner::{run_sequence, run_sequence_with, AlertSettings};
pub use storage::{Checkpoint, InMemoryPredictionStore, PredictionStore, SqlitePredictionStore};
pub use timedelta::{format_timedelta, parse_timedelta};

#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
