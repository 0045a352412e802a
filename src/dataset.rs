use std::collections::HashSet;
use std::path::Path;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::error::EvalError;
use crate::frame::Sequence;

/// Labeled sequences to evaluate, in evaluation order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub sequences: Vec<Sequence>,
}

impl Dataset {
    pub fn new(sequences: Vec<Sequence>) -> Result<Self> {
        let dataset = Self { sequences };
        dataset.check()?;
        Ok(dataset)
    }

    /// Load a JSON manifest:
    /// `{"sequences": [{"sequence_id", "label", "images": [{"path", "label", "boxes", "timedelta"}]}]}`
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read dataset manifest {}: {}", path.display(), e))?;
        let dataset: Dataset = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid dataset manifest {}: {}", path.display(), e))?;
        dataset.check()?;
        log::info!(
            "loaded {} sequences ({} frames) from {}",
            dataset.sequences.len(),
            dataset.frame_count(),
            path.display()
        );
        Ok(dataset)
    }

    fn check(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for sequence in &self.sequences {
            if !seen.insert(sequence.sequence_id.as_str()) {
                return Err(EvalError::data_integrity(format!(
                    "duplicate sequence id {}",
                    sequence.sequence_id
                ))
                .into());
            }
            if !sequence.is_chronological() {
                log::warn!("{} is not in chronological order", sequence);
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn frame_count(&self) -> usize {
        self.sequences.iter().map(Sequence::len).sum()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sequence> {
        self.sequences.iter()
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Sequence;
    type IntoIter = std::slice::Iter<'a, Sequence>;

    fn into_iter(self) -> Self::IntoIter {
        self.sequences.iter()
    }
}
