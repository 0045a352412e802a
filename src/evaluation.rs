//! Dataset evaluation loop.
//!
//! `EngineEvaluator` scores every sequence of a dataset, one sequence at a
//! time, and accumulates the prediction table. With a store attached it
//! resumes from the stored table of the same run id and checkpoints the table
//! whenever the row count crosses a multiple of the checkpoint interval.
//!
//! Error policy:
//! - configuration errors fail `new` before any sequence is scored
//! - frame inference errors are recovered by the runner
//! - checkpoint and metrics writes that fail are logged and the run goes on
//! - an interrupted run checkpoints what it has and returns `Interrupted`
//! - the model artifact (if any) is dropped, and its temporary file removed,
//!   on every exit path of `run_dataset`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use rand::Rng;

use crate::config::EvalConfig;
use crate::dataset::Dataset;
use crate::detect::{ModelArtifact, ScoreBackend};
use crate::error::EvalError;
use crate::metrics::RunMetrics;
use crate::record::PredictionRecord;
use crate::runner::{run_sequence, AlertSettings};
use crate::storage::{Checkpoint, PredictionStore};

/// Observer for loop progress, e.g. a terminal progress bar.
pub trait ProgressSink {
    fn start(&self, _total: usize) {}
    fn sequence_done(&self, _sequence_id: &str, _skipped: bool) {}
    fn finish(&self) {}
}

/// Progress sink that ignores everything.
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// `run-YYYYMMDD-HHMMSS-NNNN`
pub fn generate_run_id() -> String {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let suffix: u16 = rand::thread_rng().gen_range(1000..=9999);
    format!("run-{}-{}", timestamp, suffix)
}

fn crosses_interval(before: usize, after: usize, interval: usize) -> bool {
    after > before && before / interval != after / interval
}

fn write_checkpoint(store: &mut dyn PredictionStore, run_id: &str, checkpoint: &Checkpoint) {
    match store.save_checkpoint(run_id, checkpoint) {
        Ok(()) => log::debug!("checkpointed {} rows for {}", checkpoint.len(), run_id),
        Err(e) => log::error!("{}", EvalError::Persistence(format!("{:#}", e))),
    }
}

pub struct EngineEvaluator {
    dataset: Dataset,
    config: EvalConfig,
    settings: AlertSettings,
    backend: Box<dyn ScoreBackend>,
    store: Option<Box<dyn PredictionStore>>,
    run_id: String,
    resume: bool,
    cancel: Option<Arc<AtomicBool>>,
    artifact: Option<ModelArtifact>,
    progress: Box<dyn ProgressSink>,
    checkpoint: Checkpoint,
}

impl EngineEvaluator {
    pub fn new(dataset: Dataset, config: EvalConfig, backend: Box<dyn ScoreBackend>) -> Result<Self> {
        config.validate()?;
        let settings = AlertSettings::from(&config);
        Ok(Self {
            dataset,
            config,
            settings,
            backend,
            store: None,
            run_id: generate_run_id(),
            resume: true,
            cancel: None,
            artifact: None,
            progress: Box::new(NoProgress),
            checkpoint: Checkpoint::default(),
        })
    }

    /// Persist checkpoints and metrics in `store`.
    pub fn with_store(mut self, store: Box<dyn PredictionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Load the stored table of this run id before scoring (default: on).
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Stop between sequences once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Hand over the model file; it is released when the loop exits.
    pub fn with_model_artifact(mut self, artifact: ModelArtifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn records(&self) -> &[PredictionRecord] {
        &self.checkpoint.records
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Take back the store, e.g. to read what the run persisted.
    pub fn into_store(self) -> Option<Box<dyn PredictionStore>> {
        self.store
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Score every sequence not already present in the resumed table.
    pub fn run_dataset(&mut self) -> Result<()> {
        // Released on every return path below.
        let _artifact = self.artifact.take();

        self.checkpoint = match (&mut self.store, self.resume) {
            (Some(store), true) => match store.load_checkpoint(&self.run_id)? {
                Some(checkpoint) => {
                    log::info!(
                        "loaded {} previous predictions for {}",
                        checkpoint.len(),
                        self.run_id
                    );
                    checkpoint
                }
                None => Checkpoint::default(),
            },
            _ => Checkpoint::default(),
        };

        if let Err(e) = self.backend.warm_up() {
            log::warn!("{} warm-up failed: {:#}", self.backend.name(), e);
        }

        log::info!(
            "evaluating {} sequences with {} (nb_consecutive_frames={}, conf_thresh={}, aggregation={})",
            self.dataset.len(),
            self.backend.name(),
            self.settings.nb_consecutive_frames,
            self.settings.conf_thresh,
            self.settings.aggregation
        );
        self.progress.start(self.dataset.len());

        let interval = self.config.checkpoint_interval;
        for (done, sequence) in self.dataset.sequences.iter().enumerate() {
            if self.is_cancelled() {
                if let Some(store) = self.store.as_deref_mut() {
                    write_checkpoint(store, &self.run_id, &self.checkpoint);
                }
                self.progress.finish();
                return Err(EvalError::Interrupted { completed: done }.into());
            }

            let id = sequence.sequence_id.as_str();
            if self.resume && self.checkpoint.rows_for(id) > 0 {
                if self.checkpoint.is_complete(id, sequence.len()) {
                    log::info!("results of {} found in checkpoint, sequence skipped", sequence);
                    self.progress.sequence_done(id, true);
                    continue;
                }
                let dropped = self.checkpoint.discard_sequence(id);
                log::warn!(
                    "{} was only partially recorded ({} rows), re-evaluating",
                    sequence,
                    dropped
                );
            }

            let records = run_sequence(sequence, self.backend.as_mut(), &self.settings)?;
            let before = self.checkpoint.len();
            self.checkpoint.push_sequence(id, records);
            self.progress.sequence_done(id, false);

            if crosses_interval(before, self.checkpoint.len(), interval) {
                if let Some(store) = self.store.as_deref_mut() {
                    write_checkpoint(store, &self.run_id, &self.checkpoint);
                }
            }
        }
        self.progress.finish();

        if let Some(store) = self.store.as_deref_mut() {
            log::info!(
                "saving {} predictions for {}",
                self.checkpoint.len(),
                self.run_id
            );
            write_checkpoint(store, &self.run_id, &self.checkpoint);
        }
        Ok(())
    }

    /// Run the loop, then compute and persist both metric snapshots.
    pub fn evaluate(&mut self) -> Result<RunMetrics> {
        self.run_dataset()?;
        let metrics = RunMetrics::compute(self.run_id.clone(), &self.checkpoint.records)?;
        if let Some(store) = self.store.as_deref_mut() {
            if let Err(e) = store.save_metrics(&self.run_id, &metrics) {
                log::error!("{}", EvalError::Persistence(format!("{:#}", e)));
            }
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::ReplayBackend;
    use crate::frame::{Frame, Sequence};
    use crate::storage::InMemoryPredictionStore;
    use anyhow::anyhow;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    fn dataset(sizes: &[(&str, bool, usize)]) -> Dataset {
        let sequences = sizes
            .iter()
            .map(|&(id, label, n)| {
                let frames = (0..n)
                    .map(|i| Frame::new(format!("{id}/{i}.jpg"), label, Duration::from_secs(i as u64)))
                    .collect();
                Sequence::new(id, label, frames)
            })
            .collect();
        Dataset::new(sequences).unwrap()
    }

    fn config(interval: usize) -> EvalConfig {
        EvalConfig {
            nb_consecutive_frames: 2,
            conf_thresh: 0.5,
            checkpoint_interval: interval,
            ..EvalConfig::default()
        }
    }

    struct RecordingStore {
        writes: Rc<RefCell<Vec<usize>>>,
    }

    impl PredictionStore for RecordingStore {
        fn load_checkpoint(&mut self, _run_id: &str) -> Result<Option<Checkpoint>> {
            Ok(None)
        }
        fn save_checkpoint(&mut self, _run_id: &str, checkpoint: &Checkpoint) -> Result<()> {
            self.writes.borrow_mut().push(checkpoint.len());
            Ok(())
        }
        fn save_metrics(&mut self, _run_id: &str, _metrics: &RunMetrics) -> Result<()> {
            Ok(())
        }
        fn load_metrics(&mut self, _run_id: &str) -> Result<Option<RunMetrics>> {
            Ok(None)
        }
    }

    struct FailingStore;

    impl PredictionStore for FailingStore {
        fn load_checkpoint(&mut self, _run_id: &str) -> Result<Option<Checkpoint>> {
            Ok(None)
        }
        fn save_checkpoint(&mut self, _run_id: &str, _checkpoint: &Checkpoint) -> Result<()> {
            Err(anyhow!("disk full"))
        }
        fn save_metrics(&mut self, _run_id: &str, _metrics: &RunMetrics) -> Result<()> {
            Err(anyhow!("disk full"))
        }
        fn load_metrics(&mut self, _run_id: &str) -> Result<Option<RunMetrics>> {
            Ok(None)
        }
    }

    #[test]
    fn run_ids_have_expected_shape() {
        let id = generate_run_id();
        let parts: Vec<_> = id.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "run");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 6);
        let suffix: u16 = parts[3].parse().unwrap();
        assert!((1000..=9999).contains(&suffix));
    }

    #[test]
    fn interval_crossing() {
        assert!(crosses_interval(45, 50, 50));
        assert!(crosses_interval(48, 53, 50));
        assert!(!crosses_interval(50, 53, 50));
        assert!(!crosses_interval(10, 10, 50));
        assert!(crosses_interval(0, 1, 1));
    }

    #[test]
    fn invalid_config_fails_before_scoring() {
        let cfg = EvalConfig {
            nb_consecutive_frames: 0,
            ..EvalConfig::default()
        };
        let err = EngineEvaluator::new(dataset(&[]), cfg, Box::new(ReplayBackend::empty()))
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::Configuration(_))
        ));
    }

    #[test]
    fn checkpoints_when_row_count_crosses_interval() {
        let data = dataset(&[("a", true, 3), ("b", false, 3), ("c", false, 3)]);
        let writes = Rc::new(RefCell::new(Vec::new()));
        let store = RecordingStore {
            writes: Rc::clone(&writes),
        };
        let mut eval = EngineEvaluator::new(data, config(5), Box::new(ReplayBackend::empty()))
            .unwrap()
            .with_run_id("run-test")
            .with_store(Box::new(store));
        eval.run_dataset().unwrap();

        assert_eq!(eval.records().len(), 9);
        // 3 -> 6 crosses 5, 6 -> 9 does not; then the final write.
        assert_eq!(*writes.borrow(), vec![6, 9]);
    }

    #[test]
    fn persistence_failures_do_not_stop_the_run() {
        let data = dataset(&[("a", true, 2), ("b", false, 2)]);
        let mut eval = EngineEvaluator::new(data, config(1), Box::new(ReplayBackend::empty()))
            .unwrap()
            .with_store(Box::new(FailingStore));
        let metrics = eval.evaluate().unwrap();
        assert_eq!(eval.records().len(), 4);
        assert_eq!(metrics.sequence_metrics.r#fn, 1);
        assert_eq!(metrics.sequence_metrics.tn, 1);
    }

    #[test]
    fn cancelled_run_checkpoints_and_reports_interrupt() {
        let data = dataset(&[("a", true, 2), ("b", false, 2)]);
        let flag = Arc::new(AtomicBool::new(true));
        let mut eval = EngineEvaluator::new(data, config(50), Box::new(ReplayBackend::empty()))
            .unwrap()
            .with_cancel_flag(flag);
        let err = eval.run_dataset().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::Interrupted { completed: 0 })
        ));
        assert!(eval.records().is_empty());
    }

    fn temporary_model(dir: &tempfile::TempDir) -> (std::path::PathBuf, ModelArtifact) {
        let path = dir.path().join("exported.onnx");
        std::fs::write(&path, b"onnx").unwrap();
        let artifact = ModelArtifact::temporary(path.clone());
        (path, artifact)
    }

    #[test]
    fn model_artifact_removed_after_completed_run() {
        let dir = tempfile::tempdir().unwrap();
        let (path, artifact) = temporary_model(&dir);
        let data = dataset(&[("a", true, 2)]);
        let mut eval = EngineEvaluator::new(data, config(50), Box::new(ReplayBackend::empty()))
            .unwrap()
            .with_model_artifact(artifact);
        assert!(path.is_file());
        eval.run_dataset().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn model_artifact_removed_after_interrupted_run() {
        let dir = tempfile::tempdir().unwrap();
        let (path, artifact) = temporary_model(&dir);
        let data = dataset(&[("a", true, 2), ("b", false, 2)]);
        let mut eval = EngineEvaluator::new(data, config(50), Box::new(ReplayBackend::empty()))
            .unwrap()
            .with_cancel_flag(Arc::new(AtomicBool::new(true)))
            .with_model_artifact(artifact);
        let err = eval.run_dataset().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EvalError>(),
            Some(EvalError::Interrupted { .. })
        ));
        assert!(!path.exists());
    }

    struct UnreadableStore;

    impl PredictionStore for UnreadableStore {
        fn load_checkpoint(&mut self, _run_id: &str) -> Result<Option<Checkpoint>> {
            Err(anyhow!("database is locked"))
        }
        fn save_checkpoint(&mut self, _run_id: &str, _checkpoint: &Checkpoint) -> Result<()> {
            Ok(())
        }
        fn save_metrics(&mut self, _run_id: &str, _metrics: &RunMetrics) -> Result<()> {
            Ok(())
        }
        fn load_metrics(&mut self, _run_id: &str) -> Result<Option<RunMetrics>> {
            Ok(None)
        }
    }

    #[test]
    fn model_artifact_removed_when_resume_load_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (path, artifact) = temporary_model(&dir);
        let data = dataset(&[("a", true, 2)]);
        let mut eval = EngineEvaluator::new(data, config(50), Box::new(ReplayBackend::empty()))
            .unwrap()
            .with_store(Box::new(UnreadableStore))
            .with_model_artifact(artifact);
        assert!(eval.run_dataset().is_err());
        assert!(!path.exists());
    }

    #[test]
    fn partial_sequences_are_re_evaluated_on_resume() {
        let data = dataset(&[("a", true, 3), ("b", false, 2)]);
        let mut store = InMemoryPredictionStore::new();

        // "a" complete, "b" with one of its two rows and no marker.
        let mut seed = Checkpoint::default();
        let a_rows = (0..3)
            .map(|i| PredictionRecord {
                sequence_id: "a".into(),
                image: format!("a/{i}.jpg"),
                sequence_label: true,
                ground_truth_boxes: Vec::new(),
                image_label: true,
                prediction: true,
                confidence: 0.9,
                timedelta: format!("{i}s"),
            })
            .collect();
        seed.push_sequence("a", a_rows);
        seed.records.push(PredictionRecord {
            sequence_id: "b".into(),
            image: "b/0.jpg".into(),
            sequence_label: false,
            ground_truth_boxes: Vec::new(),
            image_label: false,
            prediction: true,
            confidence: 0.9,
            timedelta: "0s".into(),
        });
        store.save_checkpoint("run-resume", &seed).unwrap();

        let mut eval = EngineEvaluator::new(data, config(50), Box::new(ReplayBackend::empty()))
            .unwrap()
            .with_run_id("run-resume")
            .with_store(Box::new(store));
        let metrics = eval.evaluate().unwrap();

        assert_eq!(eval.records().len(), 5);
        assert!(eval.checkpoint().is_complete("a", 3));
        assert!(eval.checkpoint().is_complete("b", 2));
        // "a" kept its stored positive predictions, "b" was re-scored at 0.
        assert_eq!(metrics.sequence_metrics.predictions.tp, vec!["a"]);
        assert_eq!(metrics.sequence_metrics.predictions.tn, vec!["b"]);
    }
}
