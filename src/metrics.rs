//! Image-level and sequence-level scoring of a prediction table.
//!
//! Everything here is pure: the functions read records and return snapshots.
//! Logging the snapshots is `report`'s job.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::EvalError;
use crate::record::PredictionRecord;
use crate::timedelta::parse_timedelta;

// ----------------------------------------------------------------------------
// Confusion matrix
// ----------------------------------------------------------------------------

/// 2x2 confusion matrix with labels ordered `{false, true}`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    pub r#fn: usize,
    pub tp: usize,
}

impl ConfusionMatrix {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (bool, bool)>,
    {
        let mut cm = Self::default();
        for (truth, predicted) in pairs {
            cm.add(truth, predicted);
        }
        cm
    }

    pub fn add(&mut self, truth: bool, predicted: bool) {
        match (truth, predicted) {
            (false, false) => self.tn += 1,
            (false, true) => self.fp += 1,
            (true, false) => self.r#fn += 1,
            (true, true) => self.tp += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.tn + self.fp + self.r#fn + self.tp
    }

    /// `tp / (tp + fp)`, 0 when nothing was predicted positive.
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    /// `tp / (tp + fn)`, 0 when there is no positive ground truth.
    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.r#fn)
    }

    /// `2tp / (2tp + fp + fn)`, 0 when all three counts are 0.
    pub fn f1(&self) -> f64 {
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.r#fn)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

// ----------------------------------------------------------------------------
// Snapshots
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub tn: usize,
    pub fp: usize,
    pub r#fn: usize,
    pub tp: usize,
}

impl From<ConfusionMatrix> for ImageMetrics {
    fn from(cm: ConfusionMatrix) -> Self {
        Self {
            precision: cm.precision(),
            recall: cm.recall(),
            f1: cm.f1(),
            tn: cm.tn,
            fp: cm.fp,
            r#fn: cm.r#fn,
            tp: cm.tp,
        }
    }
}

/// Sequence ids per confusion bucket, sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceBuckets {
    pub tp: Vec<String>,
    pub r#fn: Vec<String>,
    pub fp: Vec<String>,
    pub tn: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SequenceMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub tp: usize,
    pub fp: usize,
    pub r#fn: usize,
    pub tn: usize,
    /// Mean delay in seconds over true-positive sequences with a usable delay.
    pub avg_detection_delay: Option<f64>,
    pub predictions: SequenceBuckets,
}

impl SequenceMetrics {
    pub fn avg_detection_delay(&self) -> Option<Duration> {
        self.avg_detection_delay
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub run_id: String,
    pub image_metrics: ImageMetrics,
    pub sequence_metrics: SequenceMetrics,
}

impl RunMetrics {
    pub fn compute(run_id: impl Into<String>, records: &[PredictionRecord]) -> Result<Self> {
        Ok(Self {
            run_id: run_id.into(),
            image_metrics: compute_image_metrics(records),
            sequence_metrics: compute_sequence_metrics(records)?,
        })
    }
}

// ----------------------------------------------------------------------------
// Aggregation
// ----------------------------------------------------------------------------

/// Every record is an independent trial of `image_label` vs `prediction`.
pub fn compute_image_metrics(records: &[PredictionRecord]) -> ImageMetrics {
    ConfusionMatrix::from_pairs(records.iter().map(|r| (r.image_label, r.prediction))).into()
}

/// Reduced view of one sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceOutcome {
    pub sequence_id: String,
    pub label: bool,
    pub has_detection: bool,
    pub detection_delay: Option<Duration>,
}

/// Earliest timedelta among positively predicted records.
///
/// Unparseable timedeltas are skipped; `None` when no positive record has a
/// usable one.
pub fn detection_delay<'a, I>(records: I) -> Option<Duration>
where
    I: IntoIterator<Item = &'a PredictionRecord>,
{
    records
        .into_iter()
        .filter(|r| r.prediction)
        .filter_map(|r| parse_timedelta(&r.timedelta))
        .min()
}

/// Group records by sequence id (sorted) and reduce each group.
///
/// Fails with `DataIntegrity` when a group carries more than one
/// `sequence_label`.
pub fn sequence_outcomes(records: &[PredictionRecord]) -> Result<Vec<SequenceOutcome>> {
    let mut groups: BTreeMap<&str, Vec<&PredictionRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(&record.sequence_id).or_default().push(record);
    }

    let mut outcomes = Vec::with_capacity(groups.len());
    for (sequence_id, group) in groups {
        let label = group[0].sequence_label;
        if group.iter().any(|r| r.sequence_label != label) {
            return Err(EvalError::data_integrity(format!(
                "sequence {} has inconsistent sequence_label values",
                sequence_id
            ))
            .into());
        }
        outcomes.push(SequenceOutcome {
            sequence_id: sequence_id.to_string(),
            label,
            has_detection: group.iter().any(|r| r.prediction),
            detection_delay: detection_delay(group.iter().copied()),
        });
    }
    Ok(outcomes)
}

pub fn compute_sequence_metrics(records: &[PredictionRecord]) -> Result<SequenceMetrics> {
    let outcomes = sequence_outcomes(records)?;

    let mut cm = ConfusionMatrix::default();
    let mut buckets = SequenceBuckets::default();
    let mut tp_delays = Vec::new();
    for outcome in outcomes {
        cm.add(outcome.label, outcome.has_detection);
        let bucket = match (outcome.label, outcome.has_detection) {
            (true, true) => {
                tp_delays.extend(outcome.detection_delay);
                &mut buckets.tp
            }
            (true, false) => &mut buckets.r#fn,
            (false, true) => &mut buckets.fp,
            (false, false) => &mut buckets.tn,
        };
        bucket.push(outcome.sequence_id);
    }

    let avg_detection_delay = if tp_delays.is_empty() {
        None
    } else {
        let total: f64 = tp_delays.iter().map(Duration::as_secs_f64).sum();
        Some(total / tp_delays.len() as f64)
    };

    Ok(SequenceMetrics {
        precision: cm.precision(),
        recall: cm.recall(),
        f1: cm.f1(),
        tp: cm.tp,
        fp: cm.fp,
        r#fn: cm.r#fn,
        tn: cm.tn,
        avg_detection_delay,
        predictions: buckets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(seq: &str, seq_label: bool, image_label: bool, pred: bool, td: &str) -> PredictionRecord {
        PredictionRecord {
            sequence_id: seq.to_string(),
            image: format!("{seq}/{td}.jpg"),
            sequence_label: seq_label,
            ground_truth_boxes: Vec::new(),
            image_label,
            prediction: pred,
            confidence: if pred { 0.9 } else { 0.1 },
            timedelta: td.to_string(),
        }
    }

    #[test]
    fn image_matrix_sums_to_record_count() {
        let records = vec![
            record("a", true, true, true, "0s"),
            record("a", true, true, false, "1s"),
            record("a", true, false, true, "2s"),
            record("b", false, false, false, "0s"),
            record("b", false, false, false, "1s"),
        ];
        let m = compute_image_metrics(&records);
        assert_eq!(m.tp + m.fp + m.r#fn + m.tn, records.len());
        assert_eq!((m.tp, m.fp, m.r#fn, m.tn), (1, 1, 1, 2));
        assert!((m.precision - 0.5).abs() < 1e-12);
        assert!((m.recall - 0.5).abs() < 1e-12);
        assert!((m.f1 - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zero_denominators_yield_zero() {
        let records = vec![
            record("a", false, false, false, "0s"),
            record("a", false, false, false, "1s"),
        ];
        let m = compute_image_metrics(&records);
        assert_eq!(m.recall, 0.0);
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.f1, 0.0);

        let empty = compute_image_metrics(&[]);
        assert_eq!(empty.tp + empty.fp + empty.r#fn + empty.tn, 0);
        assert_eq!(empty.f1, 0.0);
    }

    #[test]
    fn detection_delay_is_earliest_positive() {
        let records = vec![
            record("s", true, true, true, "5s"),
            record("s", true, true, true, "2s"),
            record("s", true, true, true, "9s"),
            record("s", true, true, false, "1s"),
        ];
        assert_eq!(detection_delay(&records), Some(Duration::from_secs(2)));
    }

    #[test]
    fn unparseable_delays_are_missing() {
        let records = vec![
            record("s", true, true, true, "NaT"),
            record("s", true, true, true, "later"),
        ];
        assert_eq!(detection_delay(&records), None);
    }

    #[test]
    fn buckets_partition_sequences() {
        let records = vec![
            record("tp", true, true, true, "0 days 00:00:30"),
            record("tp", true, true, false, "0 days 00:00:00"),
            record("fn", true, true, false, "0s"),
            record("fp", false, false, true, "0s"),
            record("tn", false, false, false, "0s"),
            record("tn2", false, false, false, "0s"),
        ];
        let m = compute_sequence_metrics(&records).unwrap();
        assert_eq!(m.predictions.tp, vec!["tp"]);
        assert_eq!(m.predictions.r#fn, vec!["fn"]);
        assert_eq!(m.predictions.fp, vec!["fp"]);
        assert_eq!(m.predictions.tn, vec!["tn", "tn2"]);
        assert_eq!((m.tp, m.fp, m.r#fn, m.tn), (1, 1, 1, 2));

        let mut all: Vec<_> = [
            &m.predictions.tp,
            &m.predictions.r#fn,
            &m.predictions.fp,
            &m.predictions.tn,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect();
        all.sort();
        assert_eq!(all, vec!["fn", "fp", "tn", "tn2", "tp"]);

        assert_eq!(m.avg_detection_delay, Some(30.0));
    }

    #[test]
    fn avg_delay_ignores_missing_and_non_tp() {
        let records = vec![
            record("a", true, true, true, "10s"),
            record("b", true, true, true, "NaT"),
            record("c", true, true, true, "20s"),
            record("d", false, false, true, "1s"),
        ];
        let m = compute_sequence_metrics(&records).unwrap();
        assert_eq!(m.avg_detection_delay, Some(15.0));
        assert_eq!(m.avg_detection_delay(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn avg_delay_absent_without_usable_tp() {
        let records = vec![
            record("a", true, true, true, "NaT"),
            record("b", false, false, true, "3s"),
        ];
        let m = compute_sequence_metrics(&records).unwrap();
        assert_eq!(m.avg_detection_delay, None);

        let json = serde_json::to_value(&m).unwrap();
        assert!(json["avg_detection_delay"].is_null());
        assert_eq!(json["fn"], 0);
    }

    #[test]
    fn overflowing_delay_is_missing_not_fatal() {
        let records = vec![record("a", true, true, true, "213503982334602 days 00:00:00")];
        let m = compute_sequence_metrics(&records).unwrap();
        assert_eq!(m.tp, 1);
        assert_eq!(m.avg_detection_delay, None);
    }

    #[test]
    fn inconsistent_sequence_label_is_rejected() {
        let records = vec![
            record("a", true, true, true, "0s"),
            record("a", false, false, false, "1s"),
        ];
        let err = compute_sequence_metrics(&records).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::DataIntegrity(_))
        ));
    }
}
