//! Consecutive-frame alerting.
//!
//! An `AlertWindow` keeps the last `nb_consecutive_frames` raw scores of one
//! sequence and turns each new score into an alert decision. The window is
//! sequence-scoped: the runner builds a fresh one per sequence, so nothing
//! observed in one sequence can influence the next.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::EvalError;

/// How the window contents are reduced to the confidence compared against
/// the threshold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceAggregation {
    /// Highest score in the window.
    #[default]
    Max,
    /// Mean of the scores currently held.
    Mean,
    /// Most recent score only.
    Last,
}

impl ConfidenceAggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Max => "max",
            Self::Mean => "mean",
            Self::Last => "last",
        }
    }

    fn reduce(&self, scores: &VecDeque<f32>) -> f32 {
        match self {
            Self::Max => scores.iter().copied().fold(0.0, f32::max),
            Self::Mean => {
                if scores.is_empty() {
                    0.0
                } else {
                    scores.iter().sum::<f32>() / scores.len() as f32
                }
            }
            Self::Last => scores.back().copied().unwrap_or(0.0),
        }
    }
}

impl FromStr for ConfidenceAggregation {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "max" => Ok(Self::Max),
            "mean" => Ok(Self::Mean),
            "last" => Ok(Self::Last),
            other => Err(EvalError::configuration(format!(
                "unknown confidence aggregation '{}', expected max|mean|last",
                other
            ))),
        }
    }
}

impl fmt::Display for ConfidenceAggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one observed frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlertDecision {
    pub alert: bool,
    pub confidence: f32,
}

/// Sliding window over the latest raw frame scores of one sequence.
#[derive(Clone, Debug)]
pub struct AlertWindow {
    scores: VecDeque<f32>,
    capacity: usize,
    conf_thresh: f32,
    aggregation: ConfidenceAggregation,
    ongoing: bool,
}

impl AlertWindow {
    pub fn new(
        nb_consecutive_frames: usize,
        conf_thresh: f32,
        aggregation: ConfidenceAggregation,
    ) -> Result<Self> {
        if nb_consecutive_frames == 0 {
            return Err(EvalError::configuration("nb_consecutive_frames must be >= 1").into());
        }
        if !conf_thresh.is_finite() || !(0.0..=1.0).contains(&conf_thresh) {
            return Err(EvalError::configuration(format!(
                "conf_thresh must be within [0, 1], got {}",
                conf_thresh
            ))
            .into());
        }
        Ok(Self {
            scores: VecDeque::with_capacity(nb_consecutive_frames),
            capacity: nb_consecutive_frames,
            conf_thresh,
            aggregation,
            ongoing: false,
        })
    }

    /// Push a raw score and decide whether the current frame alerts.
    ///
    /// Scores outside [0, 1] are clamped; non-finite scores count as 0.
    pub fn observe(&mut self, raw_score: f32) -> AlertDecision {
        let score = if raw_score.is_finite() {
            raw_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if self.scores.len() == self.capacity {
            self.scores.pop_front();
        }
        self.scores.push_back(score);

        let confidence = self.aggregation.reduce(&self.scores);
        let alert = confidence > self.conf_thresh;
        if alert {
            self.ongoing = true;
        }
        AlertDecision { alert, confidence }
    }

    pub fn reset(&mut self) {
        self.scores.clear();
        self.ongoing = false;
    }

    /// True once any frame since the last reset raised an alert.
    pub fn is_ongoing(&self) -> bool {
        self.ongoing
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn conf_thresh(&self) -> f32 {
        self.conf_thresh
    }

    pub fn scores(&self) -> impl Iterator<Item = f32> + '_ {
        self.scores.iter().copied()
    }
}
