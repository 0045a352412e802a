//! engine_eval - score a smoke detector with the engine's consecutive-frame alerting
//!
//! 1. Loads the dataset manifest and engine configuration
//! 2. Resolves the scoring backend (replayed scores or a local ONNX model)
//! 3. Evaluates every sequence, resuming and checkpointing through SQLite
//! 4. Writes image-level and sequence-level metrics as JSON

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use engine_eval::{
    generate_run_id, report, CommandExporter, Dataset, EngineEvaluator, EvalConfig, ModelArtifact,
    ModelExporter, ReplayBackend, ScoreBackend, SqlitePredictionStore,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Dataset manifest (JSON).
    #[arg(long)]
    dataset: PathBuf,
    /// Precomputed per-image confidences (JSON object: image path -> score).
    #[arg(long, conflicts_with = "model")]
    scores: Option<PathBuf>,
    /// Model file (.onnx, or .pt exported through the `yolo` CLI). Overrides the config.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Engine configuration file (JSON or TOML). Defaults to ENGINE_EVAL_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Run identifier; reuse one to resume an interrupted run.
    #[arg(long)]
    run_id: Option<String>,
    /// SQLite database holding prediction checkpoints and metrics.
    #[arg(long, env = "ENGINE_EVAL_DB_PATH", default_value = "engine_eval.db")]
    db_path: String,
    /// Keep results in memory only.
    #[arg(long)]
    no_save: bool,
    /// Ignore previously stored predictions of the run.
    #[arg(long)]
    no_resume: bool,
    /// Directory receiving <run_id>/engine_metrics.json.
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let mut cfg = match &args.config {
        Some(path) => EvalConfig::from_path(path)?,
        None => EvalConfig::load()?,
    };
    if args.model.is_some() {
        cfg.model_path = args.model.clone();
    }

    let dataset = {
        let _stage = ui.stage("Load dataset");
        Dataset::from_json_file(&args.dataset)?
    };

    let (backend, artifact) = {
        let _stage = ui.stage("Prepare scoring backend");
        build_backend(&args, &cfg)?
    };

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            log::warn!("interrupt received, stopping after the current sequence");
            cancel.store(true, Ordering::SeqCst);
        })?;
    }

    let run_id = args.run_id.clone().unwrap_or_else(generate_run_id);
    let mut evaluator = EngineEvaluator::new(dataset, cfg, backend)?
        .with_run_id(run_id.clone())
        .with_resume(!args.no_resume)
        .with_cancel_flag(cancel)
        .with_progress(ui.sequence_progress());
    if let Some(artifact) = artifact {
        evaluator = evaluator.with_model_artifact(artifact);
    }
    if !args.no_save {
        evaluator = evaluator.with_store(Box::new(SqlitePredictionStore::open(&args.db_path)?));
        log::info!("run {} checkpoints to {}", run_id, args.db_path);
    }

    let metrics = {
        let _stage = ui.evaluation_stage("Evaluate sequences");
        evaluator.evaluate()?
    };
    report::log_summary(&metrics);

    if !args.no_save {
        let path = args.output_dir.join(&run_id).join("engine_metrics.json");
        let _stage = ui.stage("Write metrics");
        report::write_metrics_json(&path, &metrics)?;
        println!("metrics written to {}", path.display());
    } else {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    }
    Ok(())
}

fn build_backend(
    args: &Args,
    cfg: &EvalConfig,
) -> Result<(Box<dyn ScoreBackend>, Option<ModelArtifact>)> {
    if let Some(scores) = &args.scores {
        let backend = ReplayBackend::from_json_file(scores)?;
        log::info!("replaying {} scores from {}", backend.len(), scores.display());
        return Ok((Box::new(backend), None));
    }

    let model_path = cfg
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("either --scores or --model must be given"))?;
    let exporter = CommandExporter::yolo();
    let exporter: &dyn ModelExporter = &exporter;
    let artifact = ModelArtifact::prepare(model_path, Some(exporter))?;
    let backend = load_model(&artifact, cfg)?;
    Ok((backend, Some(artifact)))
}

#[cfg(feature = "backend-tract")]
fn load_model(artifact: &ModelArtifact, cfg: &EvalConfig) -> Result<Box<dyn ScoreBackend>> {
    let backend = engine_eval::TractBackend::new(
        artifact.path(),
        engine_eval::detect::DEFAULT_INPUT_SIZE,
        cfg.max_bbox_size,
    )?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(artifact: &ModelArtifact, _cfg: &EvalConfig) -> Result<Box<dyn ScoreBackend>> {
    Err(anyhow!(
        "cannot load {}: built without the backend-tract feature",
        artifact.path().display()
    ))
}
