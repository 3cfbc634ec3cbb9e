//! Run configuration and startup with builder pattern.

use std::path::PathBuf;
use tandem_data::resolve_mode;
use tandem_train::{
    ConfigError, Engine, EngineError, FitConfig, LoopConfig, LoopSummary, ReloadTrigger,
    SplatFitEngine, TrainingLoop,
};
use thiserror::Error;
use tracing::{info, warn};

/// Logging configuration.
pub struct LoggingConfig {
    pub level: String,
    pub enable_tracy: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enable_tracy: false,
        }
    }
}

/// Fatal errors that end a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("The built-in engine needs a scene path")]
    MissingScene,

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Builder for configuring and running a training session.
pub struct RunBuilder {
    scene: Option<PathBuf>,
    mode: Option<String>,
    lock_file: Option<PathBuf>,
    marker: Option<PathBuf>,
    training: bool,
    loop_config: LoopConfig,
    fit_config: FitConfig,
    load_snapshot: Option<PathBuf>,
    save_snapshot: Option<PathBuf>,
    logging: LoggingConfig,
}

impl RunBuilder {
    /// Create a new RunBuilder with default settings.
    pub fn new() -> Self {
        Self {
            scene: None,
            mode: None,
            lock_file: None,
            marker: None,
            training: true,
            loop_config: LoopConfig::default(),
            fit_config: FitConfig::default(),
            load_snapshot: None,
            save_snapshot: None,
            logging: LoggingConfig::default(),
        }
    }

    /// Set the scene (dataset) path.
    pub fn with_scene(mut self, path: impl Into<PathBuf>) -> Self {
        self.scene = Some(path.into());
        self
    }

    /// Set the operating mode by name instead of inferring it.
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Enable reload coordination through this lock file.
    pub fn with_lock_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_file = Some(path.into());
        self
    }

    /// Override the change marker path.
    pub fn with_marker(mut self, path: impl Into<PathBuf>) -> Self {
        self.marker = Some(path.into());
        self
    }

    pub fn with_training(mut self, enabled: bool) -> Self {
        self.training = enabled;
        self
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.loop_config.window = window;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.loop_config.threshold = threshold;
        self
    }

    pub fn with_fit_config(mut self, config: FitConfig) -> Self {
        self.fit_config = config;
        self
    }

    pub fn with_load_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.load_snapshot = Some(path.into());
        self
    }

    pub fn with_save_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.save_snapshot = Some(path.into());
        self
    }

    /// Configure logging.
    pub fn with_logging(mut self, config: LoggingConfig) -> Self {
        self.logging = config;
        self
    }

    /// Resolve the configuration, train, and return the loop summary.
    pub fn run(self) -> Result<LoopSummary, RunError> {
        self.init_logging();

        // Everything is validated before the engine touches the scene.
        self.loop_config.validate()?;
        let mode = resolve_mode(self.mode.as_deref(), self.scene.as_deref()).map_err(ConfigError::from)?;
        let scene = self.scene.clone().ok_or(RunError::MissingScene)?;
        info!("Scene {} in {} mode", scene.display(), mode);

        let mut engine = SplatFitEngine::load(mode, &scene, self.fit_config)?;
        engine.set_training(self.training);
        if !engine.is_training() {
            info!("Training disabled, evaluating the loaded parameters only");
        }
        if let Some(path) = &self.load_snapshot {
            engine.load_snapshot(path)?;
        }

        let trigger = ReloadTrigger::from_parts(self.lock_file.clone(), Some(scene), self.marker.clone());
        if self.marker.is_some() && !trigger.is_enabled() {
            warn!("--marker has no effect without --lock-file");
        }

        let mut training_loop = TrainingLoop::new(engine, self.loop_config, trigger)?;
        let summary = training_loop.run()?;
        info!(
            reloads = summary.reloads,
            reload_failures = summary.reload_failures,
            lock_contentions = summary.lock_contentions,
            stable_ticks = summary.stable_ticks,
            "Final loss {:?} after {} ticks",
            summary.final_loss,
            summary.ticks
        );

        if let Some(path) = &self.save_snapshot {
            training_loop.engine().save_snapshot(path)?;
        }
        Ok(summary)
    }

    fn init_logging(&self) {
        // A subscriber may already be installed (tests run several sessions
        // in one process), so failures to install are ignored.
        #[cfg(feature = "tracy")]
        {
            if self.logging.enable_tracy {
                use tracing_subscriber::Layer;
                use tracing_subscriber::layer::SubscriberExt;
                use tracing_subscriber::util::SubscriberInitExt;
                let _ = tracing_subscriber::registry()
                    .with(tracing_tracy::TracyLayer::default())
                    .with(
                        tracing_subscriber::fmt::layer().with_filter(
                            tracing_subscriber::EnvFilter::try_from_default_env()
                                .unwrap_or_else(|_| self.logging.level.clone().into()),
                        ),
                    )
                    .try_init();
                return;
            }
        }

        #[cfg(not(feature = "tracy"))]
        {
            if self.logging.enable_tracy {
                eprintln!("tandem: built without the `tracy` feature, ignoring --tracy");
            }
        }

        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&self.logging.level)),
            )
            .with_target(false)
            .try_init();
    }
}

impl Default for RunBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tandem_data::ModeError;

    const MESH: &str = "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 0 0 1\nv 1 1 1\n";

    fn quiet() -> LoggingConfig {
        LoggingConfig {
            level: "warn".to_string(),
            enable_tracy: false,
        }
    }

    fn short_fit() -> FitConfig {
        FitConfig {
            splat_count: 4,
            batch_size: 16,
            learning_rate: 0.1,
            n_steps: Some(40),
        }
    }

    #[test]
    fn test_missing_scene_and_mode_is_config_error() {
        let err = RunBuilder::new().with_logging(quiet()).run().unwrap_err();
        assert!(matches!(err, RunError::Config(ConfigError::Mode(ModeError::MissingInput))));
    }

    #[test]
    fn test_explicit_mode_without_scene() {
        let err = RunBuilder::new()
            .with_logging(quiet())
            .with_mode("sdf")
            .run()
            .unwrap_err();
        assert!(matches!(err, RunError::MissingScene));
    }

    #[test]
    fn test_invalid_mode_name() {
        let dir = tempfile::tempdir().unwrap();
        let scene = dir.path().join("mesh.obj");
        fs::write(&scene, MESH).unwrap();

        let err = RunBuilder::new()
            .with_logging(quiet())
            .with_scene(&scene)
            .with_mode("hologram")
            .run()
            .unwrap_err();
        assert!(matches!(err, RunError::Config(ConfigError::Mode(ModeError::InvalidMode(_)))));
    }

    #[test]
    fn test_trains_for_step_budget() {
        let dir = tempfile::tempdir().unwrap();
        let scene = dir.path().join("mesh.obj");
        fs::write(&scene, MESH).unwrap();

        let summary = RunBuilder::new()
            .with_logging(quiet())
            .with_scene(&scene)
            .with_window(4)
            .with_fit_config(short_fit())
            .run()
            .unwrap();
        assert_eq!(summary.ticks, 40);
        assert_eq!(summary.last_iteration, 40);
        assert_eq!(summary.reloads, 0);
    }

    #[test]
    fn test_no_train_evaluates_once() {
        let dir = tempfile::tempdir().unwrap();
        let scene = dir.path().join("mesh.obj");
        fs::write(&scene, MESH).unwrap();

        let summary = RunBuilder::new()
            .with_logging(quiet())
            .with_scene(&scene)
            .with_training(false)
            .with_fit_config(short_fit())
            .run()
            .unwrap();
        assert_eq!(summary.ticks, 1);
        assert_eq!(summary.last_iteration, 0);
    }

    #[test]
    fn test_reloads_marked_scene_and_saves_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let scene = dir.path().join("mesh.obj");
        let lock = dir.path().join("scene.lock");
        let marker = dir.path().join("scene.ready");
        let snapshot = dir.path().join("snapshot.json");
        fs::write(&scene, MESH).unwrap();
        fs::write(&marker, b"").unwrap();

        // A threshold this large makes the loop stable as soon as the window cycles.
        let summary = RunBuilder::new()
            .with_logging(quiet())
            .with_scene(&scene)
            .with_lock_file(&lock)
            .with_marker(&marker)
            .with_window(4)
            .with_threshold(1e6)
            .with_fit_config(short_fit())
            .with_save_snapshot(&snapshot)
            .run()
            .unwrap();

        assert_eq!(summary.reloads, 1);
        assert!(!marker.exists());
        assert!(snapshot.exists());
    }
}
