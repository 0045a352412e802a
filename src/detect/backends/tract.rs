#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::ScoreBackend;
use crate::frame::Frame;

/// Default square input size of the exported smoke detector.
pub const DEFAULT_INPUT_SIZE: u32 = 1024;

/// Tract-based backend for ONNX smoke detectors.
///
/// Expects a single-class YOLO export whose output is `[1, 5, N]` with rows
/// `(cx, cy, w, h, conf)` in input pixels. The frame confidence is the best
/// box confidence among boxes no wider than `max_bbox_size` (normalized);
/// a frame without boxes scores 0.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    max_bbox_size: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32, max_bbox_size: f32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            max_bbox_size,
        })
    }

    fn build_input(&self, path: &Path) -> Result<Tensor> {
        let img = image::open(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        let rgb = image::imageops::resize(
            &img.to_rgb8(),
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            rgb.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn extract_confidence(&self, outputs: TVec<TValue>) -> Result<f32> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape().to_vec();

        if shape.len() != 3 || shape[1] != 5 {
            let max_score = preds.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            return Ok(if max_score.is_finite() { max_score } else { 0.0 });
        }

        let size = self.input_size as f32;
        let mut best = 0.0f32;
        for i in 0..shape[2] {
            let w = preds[&[0, 2, i][..]] / size;
            let conf = preds[&[0, 4, i][..]];
            if !conf.is_finite() || w > self.max_bbox_size {
                continue;
            }
            best = best.max(conf);
        }
        Ok(best.clamp(0.0, 1.0))
    }
}

impl ScoreBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn inference(&mut self, frame: &Frame) -> Result<f32> {
        let input = self.build_input(frame.path())?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_confidence(outputs)
    }
}
