//! The optimization engine contract.
//!
//! The training loop treats the engine as opaque: it asks for one step at a
//! time and, when the reload protocol allows it, asks the engine to re-read
//! its dataset from disk.

use std::path::Path;
use tandem_data::DataError;

/// Result of a single optimization step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepResult {
    /// `false` once the engine has nothing left to do.
    pub keep_running: bool,
    /// Loss of this step.
    pub loss: f32,
    /// Number of training steps taken so far.
    pub iteration: u64,
}

/// Trait for optimization engines driven by [`crate::TrainingLoop`].
pub trait Engine {
    /// Advance the optimization by one step.
    fn step(&mut self) -> Result<StepResult, EngineError>;

    /// Re-read the dataset at `path`.
    ///
    /// On error the engine must keep training on the dataset it already had.
    fn reload_dataset(&mut self, path: &Path) -> Result<(), EngineError>;

    /// Enable or disable parameter updates.
    fn set_training(&mut self, enabled: bool);

    /// Whether steps update parameters.
    fn is_training(&self) -> bool;

    /// Persist the trained parameters.
    fn save_snapshot(&self, _path: &Path) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("snapshots"))
    }

    /// Restore parameters saved by [`Engine::save_snapshot`].
    fn load_snapshot(&mut self, _path: &Path) -> Result<(), EngineError> {
        Err(EngineError::Unsupported("snapshots"))
    }
}

/// Errors reported by an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Dataset error: {0}")]
    Dataset(#[from] DataError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("Snapshot does not match this engine: {0}")]
    SnapshotMismatch(String),
    #[error("Engine does not support {0}")]
    Unsupported(&'static str),
    #[error("Optimization diverged at step {iteration}: loss {loss}")]
    Diverged { iteration: u64, loss: f32 },
}
