//! The training loop.
//!
//! Each tick steps the engine, records the loss, reports progress, and gives
//! the reload trigger its turn. The loop is `Running` until the engine says
//! it has nothing left to do, then `Stopped` for good. Convergence is not a
//! state of its own: training continues after it, only reloads depend on it.

use crate::engine::{Engine, EngineError};
use crate::monitor::{ConvergenceMonitor, DEFAULT_THRESHOLD, DEFAULT_WINDOW, LossHistory};
use crate::reload::{ReloadOutcome, ReloadTrigger};
use thiserror::Error;
use tracing::{info, warn};

/// Loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// Convergence settings for the loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopConfig {
    /// Loss window size; also the number of samples needed before the loop
    /// can count as stable.
    pub window: usize,
    /// Dispersion threshold for stability.
    pub threshold: f32,
}

impl LoopConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window < 2 {
            return Err(ConfigError::WindowTooSmall(self.window));
        }
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        Ok(())
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Startup configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Loss window must hold at least 2 samples, got {0}")]
    WindowTooSmall(usize),

    #[error("Convergence threshold must be positive and finite, got {0}")]
    InvalidThreshold(f32),

    #[error(transparent)]
    Mode(#[from] tandem_data::ModeError),
}

/// Receives per-iteration progress.
pub trait ProgressReporter {
    fn report(&mut self, iteration: u64, loss: f32, stable: bool);
}

/// Logs every iteration through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&mut self, iteration: u64, loss: f32, stable: bool) {
        info!(iteration, loss, stable, "Training step");
    }
}

/// Counters collected over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopSummary {
    /// Ticks executed.
    pub ticks: u64,
    /// Engine iteration reported by the last step.
    pub last_iteration: u64,
    pub final_loss: Option<f32>,
    /// Ticks on which the loss history counted as stable.
    pub stable_ticks: u64,
    pub reloads: u64,
    pub reload_failures: u64,
    pub lock_contentions: u64,
}

impl LoopSummary {
    fn record(&mut self, outcome: &ReloadOutcome) {
        match outcome {
            ReloadOutcome::Reloaded { .. } => self.reloads += 1,
            ReloadOutcome::Failed { .. } => self.reload_failures += 1,
            ReloadOutcome::LockUnavailable => self.lock_contentions += 1,
            ReloadOutcome::Disabled | ReloadOutcome::NotStable | ReloadOutcome::NoChange => {}
        }
    }
}

/// Drives an [`Engine`] until it stops, coordinating dataset reloads.
pub struct TrainingLoop<E, P = TracingProgress> {
    engine: E,
    progress: P,
    history: LossHistory,
    monitor: ConvergenceMonitor,
    trigger: ReloadTrigger,
    state: LoopState,
    summary: LoopSummary,
}

impl<E: Engine> TrainingLoop<E> {
    pub fn new(engine: E, config: LoopConfig, trigger: ReloadTrigger) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            engine,
            progress: TracingProgress,
            history: LossHistory::new(config.window),
            monitor: ConvergenceMonitor::new(config.threshold),
            trigger,
            state: LoopState::Running,
            summary: LoopSummary::default(),
        })
    }
}

impl<E: Engine, P: ProgressReporter> TrainingLoop<E, P> {
    /// Replace the progress reporter.
    pub fn with_progress<Q: ProgressReporter>(self, progress: Q) -> TrainingLoop<E, Q> {
        TrainingLoop {
            engine: self.engine,
            progress,
            history: self.history,
            monitor: self.monitor,
            trigger: self.trigger,
            state: self.state,
            summary: self.summary,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn history(&self) -> &LossHistory {
        &self.history
    }

    pub fn summary(&self) -> LoopSummary {
        self.summary
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn progress(&self) -> &P {
        &self.progress
    }

    /// Run one iteration. A stopped loop stays stopped and does nothing.
    ///
    /// An engine error stops the loop and is returned to the caller.
    pub fn tick(&mut self) -> Result<LoopState, EngineError> {
        if self.state == LoopState::Stopped {
            return Ok(LoopState::Stopped);
        }

        let step = match self.engine.step() {
            Ok(step) => step,
            Err(err) => {
                self.state = LoopState::Stopped;
                return Err(err);
            }
        };

        self.history.push(step.loss);
        let stable = self.monitor.is_stable(&self.history);
        self.progress.report(step.iteration, step.loss, stable);

        let outcome = self.trigger.poll(stable, &mut self.engine);

        self.summary.ticks += 1;
        self.summary.last_iteration = step.iteration;
        self.summary.final_loss = Some(step.loss);
        if stable {
            self.summary.stable_ticks += 1;
        }
        self.summary.record(&outcome);

        if !step.keep_running {
            self.state = LoopState::Stopped;
        }
        Ok(self.state)
    }

    /// Tick until the engine stops.
    pub fn run(&mut self) -> Result<LoopSummary, EngineError> {
        if self.trigger.is_enabled() {
            info!("Dataset reload coordination enabled");
        }

        while self.tick()? == LoopState::Running {}

        let summary = self.summary;
        info!(
            ticks = summary.ticks,
            reloads = summary.reloads,
            "Training loop stopped at iteration {}",
            summary.last_iteration
        );
        if summary.reload_failures > 0 {
            warn!("{} dataset reloads failed", summary.reload_failures);
        }
        Ok(summary)
    }
}
