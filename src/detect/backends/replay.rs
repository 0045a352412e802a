use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::detect::backend::ScoreBackend;
use crate::frame::Frame;

/// Replays confidences computed ahead of time by an external model.
///
/// Scores are keyed by image path exactly as the dataset manifest spells it.
/// A frame without a score fails inference, which the runner records as a
/// zero confidence.
#[derive(Clone, Debug, Default)]
pub struct ReplayBackend {
    scores: HashMap<String, f32>,
}

impl ReplayBackend {
    pub fn new(scores: HashMap<String, f32>) -> Self {
        Self { scores }
    }

    /// Backend with no scores; every inference fails.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a JSON object mapping image path to confidence.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read score file {}: {}", path.display(), e))?;
        let scores: HashMap<String, f32> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid score file {}: {}", path.display(), e))?;
        Ok(Self::new(scores))
    }

    pub fn insert(&mut self, image: impl Into<String>, score: f32) {
        self.scores.insert(image.into(), score);
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

impl ScoreBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn inference(&mut self, frame: &Frame) -> Result<f32> {
        let key = frame.path.display().to_string();
        self.scores
            .get(&key)
            .copied()
            .ok_or_else(|| anyhow!("no replayed score for {}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn replays_scores_by_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"cam/a.jpg": 0.7, "cam/b.jpg": 0.1}"#)
            .unwrap();
        let mut backend = ReplayBackend::from_json_file(file.path()).unwrap();
        assert_eq!(backend.len(), 2);

        let a = Frame::new("cam/a.jpg", true, Duration::ZERO);
        let c = Frame::new("cam/c.jpg", true, Duration::ZERO);
        assert_eq!(backend.inference(&a).unwrap(), 0.7);
        assert!(backend.inference(&c).is_err());
    }

    #[test]
    fn empty_backend_always_fails() {
        let mut backend = ReplayBackend::empty();
        let frame = Frame::new("x.jpg", false, Duration::ZERO);
        assert!(backend.inference(&frame).is_err());
    }
}
