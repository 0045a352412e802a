use anyhow::Result;

use crate::frame::Frame;

/// Scoring backend trait.
///
/// A backend turns one frame into a single smoke confidence in [0, 1]. How it
/// gets there (local ONNX, replayed scores, a remote service) is its own
/// business; the evaluation only needs the scalar.
///
/// Errors are per frame: the sequence runner recovers a failed call as a zero
/// confidence, so implementations should fail fast rather than retry.
pub trait ScoreBackend {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Score a single frame.
    fn inference(&mut self, frame: &Frame) -> Result<f32>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
