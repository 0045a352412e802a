mod artifact;
mod backend;
mod backends;

pub use artifact::{CommandExporter, ModelArtifact, ModelExporter};
pub use backend::ScoreBackend;
pub use backends::ReplayBackend;

#[cfg(feature = "backend-tract")]
pub use backends::tract::{TractBackend, DEFAULT_INPUT_SIZE};
