//! Human-readable and JSON output of computed metrics.

use std::path::Path;

use anyhow::{anyhow, Result};

use crate::metrics::{ImageMetrics, RunMetrics, SequenceMetrics};

pub fn image_summary(m: &ImageMetrics) -> [String; 2] {
    [
        format!(
            "Precision: {:.3}, Recall: {:.3}, F1: {:.3}",
            m.precision, m.recall, m.f1
        ),
        format!("TP: {}, FP: {}, FN: {}, TN: {}", m.tp, m.fp, m.r#fn, m.tn),
    ]
}

pub fn sequence_summary(m: &SequenceMetrics) -> [String; 3] {
    let delay = match m.avg_detection_delay {
        Some(secs) => format!("Avg. delay before detection (TP sequences): {:.1}s", secs),
        None => "No detection delay info available for TP sequences.".to_string(),
    };
    [
        format!(
            "Precision: {:.3}, Recall: {:.3}, F1: {:.3}",
            m.precision, m.recall, m.f1
        ),
        format!("TP: {}, FP: {}, FN: {}, TN: {}", m.tp, m.fp, m.r#fn, m.tn),
        delay,
    ]
}

/// Log both snapshots at info level.
pub fn log_summary(metrics: &RunMetrics) {
    log::info!("Run {}", metrics.run_id);
    log::info!("Image-level metrics");
    for line in image_summary(&metrics.image_metrics) {
        log::info!("{}", line);
    }
    log::info!("Sequence-level metrics");
    for line in sequence_summary(&metrics.sequence_metrics) {
        log::info!("{}", line);
    }
}

/// Write the metrics as pretty JSON.
pub fn write_metrics_json(path: &Path, metrics: &RunMetrics) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow!("failed to create {}: {}", parent.display(), e))?;
    }
    let json = serde_json::to_vec_pretty(metrics)?;
    std::fs::write(path, json)
        .map_err(|e| anyhow!("failed to write metrics to {}: {}", path.display(), e))
}
