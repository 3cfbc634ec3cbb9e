//! Tandem Training Crate
//!
//! Drives an optimization engine one step at a time while an independent
//! process may rewrite the dataset on disk. The two sides cooperate through
//! an advisory lock file and a change-marker file.
//!
//! ## Modules
//!
//! - [`engine`]: The contract the training loop expects from an optimizer
//! - [`monitor`]: Loss history and the convergence test that gates reloads
//! - [`lock`]: Non-blocking advisory file locks
//! - [`reload`]: The per-iteration reload decision
//! - [`driver`]: The training loop state machine
//! - [`fit`]: A small reference engine that fits splats to dataset samples

pub mod driver;
pub mod engine;
pub mod fit;
pub mod lock;
pub mod monitor;
pub mod reload;

pub use driver::{ConfigError, LoopConfig, LoopState, LoopSummary, ProgressReporter, TracingProgress, TrainingLoop};
pub use engine::{Engine, EngineError, StepResult};
pub use fit::{FitConfig, SplatFitEngine};
pub use lock::{LockCoordinator, LockHandle};
pub use monitor::{ConvergenceMonitor, LossHistory};
pub use reload::{ReloadOutcome, ReloadPaths, ReloadTrigger};
