//! Model file resolution and cleanup of converted copies.
//!
//! The scoring engine only reads ONNX. A `.pt` checkpoint is first converted
//! by a `ModelExporter`; the converted file belongs to the run and is removed
//! when the `ModelArtifact` is dropped, on every exit path of the evaluation.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};

use crate::error::EvalError;

/// Converts a model checkpoint into an ONNX file the engine can load.
pub trait ModelExporter {
    /// Export `source` and return the path of the produced ONNX file.
    fn export(&self, source: &Path) -> Result<PathBuf>;
}

/// Runs an external export tool, e.g. `yolo export format=onnx model=<path>`.
///
/// `{model}` in `args` is replaced by the source path. The tool is expected to
/// write `<source stem>.onnx` next to the source.
#[derive(Clone, Debug)]
pub struct CommandExporter {
    program: String,
    args: Vec<String>,
}

impl CommandExporter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Ultralytics CLI export.
    pub fn yolo() -> Self {
        Self::new(
            "yolo",
            vec![
                "export".to_string(),
                "format=onnx".to_string(),
                "model={model}".to_string(),
            ],
        )
    }
}

impl ModelExporter for CommandExporter {
    fn export(&self, source: &Path) -> Result<PathBuf> {
        let model = source.display().to_string();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("{model}", &model))
            .collect();
        log::info!("exporting {} to onnx with {}", model, self.program);
        let status = Command::new(&self.program)
            .args(&args)
            .status()
            .with_context(|| format!("failed to launch {}", self.program))?;
        if !status.success() {
            return Err(anyhow!("{} exited with {}", self.program, status));
        }
        let exported = source.with_extension("onnx");
        if !exported.is_file() {
            return Err(anyhow!(
                "export did not produce {}",
                exported.display()
            ));
        }
        Ok(exported)
    }
}

/// The model file a run scores with.
#[derive(Debug)]
pub struct ModelArtifact {
    path: PathBuf,
    temporary: bool,
}

impl ModelArtifact {
    /// Resolve a configured model path.
    ///
    /// `.onnx` files are used in place. `.pt` files need an exporter and the
    /// exported copy is owned (and deleted) by the artifact.
    pub fn prepare(model_path: &Path, exporter: Option<&dyn ModelExporter>) -> Result<Self> {
        match model_path.extension().and_then(|ext| ext.to_str()) {
            Some("onnx") => Ok(Self::existing(model_path)),
            Some("pt") => {
                let exporter = exporter.ok_or_else(|| {
                    EvalError::configuration(format!(
                        "{} needs an exporter to be converted to onnx",
                        model_path.display()
                    ))
                })?;
                let exported = exporter.export(model_path)?;
                Ok(Self::temporary(exported))
            }
            _ => Err(EvalError::configuration(format!(
                "model format not supported by the engine: {}",
                model_path.display()
            ))
            .into()),
        }
    }

    pub fn existing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: false,
        }
    }

    /// A file created for this run, removed on drop.
    pub fn temporary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }
}

impl Drop for ModelArtifact {
    fn drop(&mut self) {
        if !self.temporary {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            let err = EvalError::Cleanup(format!("{}: {}", self.path.display(), e));
            log::error!("{}", err);
        } else {
            log::debug!("removed temporary model {}", self.path.display());
        }
    }
}
