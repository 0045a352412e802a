use thiserror::Error;

/// Failure classes of an evaluation run.
///
/// Library functions return `anyhow::Result`; these variants are wrapped into
/// the `anyhow::Error` so callers can `downcast_ref::<EvalError>()` to tell a
/// fatal configuration problem from an interrupted run.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("inference failed on {path}: {reason}")]
    FrameInference { path: String, reason: String },
    #[error("checkpoint write failed: {0}")]
    Persistence(String),
    #[error("temporary artifact could not be removed: {0}")]
    Cleanup(String),
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),
    #[error("evaluation interrupted after {completed} sequences")]
    Interrupted { completed: usize },
}

impl EvalError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn data_integrity(msg: impl Into<String>) -> Self {
        Self::DataIntegrity(msg.into())
    }
}
