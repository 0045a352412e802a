use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::alert::ConfidenceAggregation;
use crate::error::EvalError;

const DEFAULT_NB_CONSECUTIVE_FRAMES: usize = 4;
const DEFAULT_CONF_THRESH: f32 = 0.15;
const DEFAULT_MAX_BBOX_SIZE: f32 = 0.4;
const DEFAULT_CHECKPOINT_INTERVAL: usize = 50;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EvalConfigFile {
    nb_consecutive_frames: Option<usize>,
    conf_thresh: Option<f32>,
    max_bbox_size: Option<f32>,
    model_path: Option<PathBuf>,
    aggregation: Option<ConfidenceAggregation>,
    checkpoint: Option<CheckpointConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CheckpointConfigFile {
    interval: Option<usize>,
}

/// Engine parameters of an evaluation run.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
    pub nb_consecutive_frames: usize,
    pub conf_thresh: f32,
    /// Passed through to the scoring backend.
    pub max_bbox_size: f32,
    /// Passed through to the scoring backend.
    pub model_path: Option<PathBuf>,
    pub aggregation: ConfidenceAggregation,
    /// Rows between two checkpoint writes.
    pub checkpoint_interval: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            nb_consecutive_frames: DEFAULT_NB_CONSECUTIVE_FRAMES,
            conf_thresh: DEFAULT_CONF_THRESH,
            max_bbox_size: DEFAULT_MAX_BBOX_SIZE,
            model_path: None,
            aggregation: ConfidenceAggregation::default(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }
}

impl EvalConfig {
    /// Load from `ENGINE_EVAL_CONFIG` (if set), apply env overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ENGINE_EVAL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a config file without consulting the environment.
    pub fn from_path(path: &Path) -> Result<Self> {
        let cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EvalConfigFile) -> Self {
        Self {
            nb_consecutive_frames: file
                .nb_consecutive_frames
                .unwrap_or(DEFAULT_NB_CONSECUTIVE_FRAMES),
            conf_thresh: file.conf_thresh.unwrap_or(DEFAULT_CONF_THRESH),
            max_bbox_size: file.max_bbox_size.unwrap_or(DEFAULT_MAX_BBOX_SIZE),
            model_path: file.model_path,
            aggregation: file.aggregation.unwrap_or_default(),
            checkpoint_interval: file
                .checkpoint
                .and_then(|checkpoint| checkpoint.interval)
                .unwrap_or(DEFAULT_CHECKPOINT_INTERVAL),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(frames) = std::env::var("ENGINE_EVAL_NB_CONSECUTIVE_FRAMES") {
            self.nb_consecutive_frames = frames.trim().parse().map_err(|_| {
                EvalError::configuration("ENGINE_EVAL_NB_CONSECUTIVE_FRAMES must be an integer")
            })?;
        }
        if let Ok(thresh) = std::env::var("ENGINE_EVAL_CONF_THRESH") {
            self.conf_thresh = thresh.trim().parse().map_err(|_| {
                EvalError::configuration("ENGINE_EVAL_CONF_THRESH must be a number")
            })?;
        }
        if let Ok(size) = std::env::var("ENGINE_EVAL_MAX_BBOX_SIZE") {
            self.max_bbox_size = size.trim().parse().map_err(|_| {
                EvalError::configuration("ENGINE_EVAL_MAX_BBOX_SIZE must be a number")
            })?;
        }
        if let Ok(path) = std::env::var("ENGINE_EVAL_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(agg) = std::env::var("ENGINE_EVAL_AGGREGATION") {
            if !agg.trim().is_empty() {
                self.aggregation = agg.parse()?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.nb_consecutive_frames == 0 {
            return Err(EvalError::configuration("nb_consecutive_frames must be >= 1").into());
        }
        if !self.conf_thresh.is_finite() || !(0.0..=1.0).contains(&self.conf_thresh) {
            return Err(EvalError::configuration(format!(
                "conf_thresh must be within [0, 1], got {}",
                self.conf_thresh
            ))
            .into());
        }
        if !self.max_bbox_size.is_finite() || self.max_bbox_size <= 0.0 || self.max_bbox_size > 1.0
        {
            return Err(EvalError::configuration(format!(
                "max_bbox_size must be within (0, 1], got {}",
                self.max_bbox_size
            ))
            .into());
        }
        if self.checkpoint_interval == 0 {
            return Err(EvalError::configuration("checkpoint interval must be >= 1").into());
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<EvalConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path.extension().and_then(|ext| ext.to_str()) == Some("toml");
    let parsed: Result<EvalConfigFile, String> = if is_toml {
        toml::from_str(&raw).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| {
        EvalError::configuration(format!("invalid config file {}: {}", path.display(), e)).into()
    })
}
