//! Per-iteration dataset reload decision.
//!
//! Protocol with the external mutator:
//!
//! 1. The mutator takes the lock, rewrites the dataset, creates the change
//!    marker, and releases the lock.
//! 2. Once training is stable, the loop takes the lock. If the marker is
//!    there it deletes it and reloads the dataset, then releases the lock.
//!
//! Deleting the marker is the commit point: a deleted marker always means a
//! reload attempt was made. The lock is held from the marker check until the
//! reload returns, so the mutator never writes while the engine reads.

use crate::engine::Engine;
use crate::lock::{LockCoordinator, LockHandle};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Suffix appended to the lock path when no marker path is given.
pub const DEFAULT_MARKER_SUFFIX: &str = "changed";

/// Files shared with the external mutator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadPaths {
    pub lock: PathBuf,
    pub dataset: PathBuf,
    pub marker: PathBuf,
}

impl ReloadPaths {
    /// Paths with the marker defaulting to `<lock>.changed`.
    pub fn new(lock: impl Into<PathBuf>, dataset: impl Into<PathBuf>) -> Self {
        let lock = lock.into();
        let marker = default_marker_path(&lock);
        Self {
            lock,
            dataset: dataset.into(),
            marker,
        }
    }

    pub fn with_marker(mut self, marker: impl Into<PathBuf>) -> Self {
        self.marker = marker.into();
        self
    }
}

/// `<lock>.changed`, next to the lock file.
pub fn default_marker_path(lock: &Path) -> PathBuf {
    let mut name = lock.as_os_str().to_owned();
    name.push(".");
    name.push(DEFAULT_MARKER_SUFFIX);
    PathBuf::from(name)
}

/// What a single reload check did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadOutcome {
    /// No lock or dataset path configured.
    Disabled,
    /// Training has not settled yet.
    NotStable,
    /// Another process holds the lock.
    LockUnavailable,
    /// Lock taken, but the mutator had nothing new.
    NoChange,
    /// Marker consumed and dataset reloaded.
    Reloaded { elapsed: Duration },
    /// Marker consumed but the reload did not complete; the engine keeps its
    /// previous dataset.
    Failed { reason: String },
}

/// Decides once per iteration whether to reload the dataset.
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    target: Option<(ReloadPaths, LockCoordinator)>,
}

impl ReloadTrigger {
    pub fn new(paths: ReloadPaths) -> Self {
        let coordinator = LockCoordinator::new(&paths.lock);
        Self {
            target: Some((paths, coordinator)),
        }
    }

    /// A trigger that never reloads.
    pub fn disabled() -> Self {
        Self { target: None }
    }

    /// Enabled only when both a lock path and a dataset path are given.
    pub fn from_parts(lock: Option<PathBuf>, dataset: Option<PathBuf>, marker: Option<PathBuf>) -> Self {
        match (lock, dataset) {
            (Some(lock), Some(dataset)) => {
                let paths = ReloadPaths::new(lock, dataset);
                Self::new(match marker {
                    Some(marker) => paths.with_marker(marker),
                    None => paths,
                })
            }
            _ => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    pub fn paths(&self) -> Option<&ReloadPaths> {
        self.target.as_ref().map(|(paths, _)| paths)
    }

    /// Run the reload check for one iteration.
    pub fn poll<E: Engine + ?Sized>(&self, stable: bool, engine: &mut E) -> ReloadOutcome {
        let Some((paths, coordinator)) = &self.target else {
            return ReloadOutcome::Disabled;
        };
        if !stable {
            return ReloadOutcome::NotStable;
        }

        let handle = match coordinator.try_acquire() {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                warn!(
                    "Dataset lock {} is held by another process, skipping reload",
                    paths.lock.display()
                );
                return ReloadOutcome::LockUnavailable;
            }
            Err(err) => {
                warn!("Could not lock {}: {}, skipping reload", paths.lock.display(), err);
                return ReloadOutcome::LockUnavailable;
            }
        };

        let outcome = reload_under_lock(paths, &handle, engine);
        handle.release();
        outcome
    }
}

fn reload_under_lock<E: Engine + ?Sized>(
    paths: &ReloadPaths,
    _held: &LockHandle,
    engine: &mut E,
) -> ReloadOutcome {
    match fs::remove_file(&paths.marker) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!("No change marker at {}", paths.marker.display());
            return ReloadOutcome::NoChange;
        }
        Err(err) => {
            // Without consuming the marker there is no hand-off, so no reload.
            error!("Could not remove change marker {}: {}", paths.marker.display(), err);
            return ReloadOutcome::Failed {
                reason: err.to_string(),
            };
        }
    }

    info!("Change marker consumed, reloading {}", paths.dataset.display());
    let start = Instant::now();

    if !paths.dataset.exists() {
        let reason = format!("dataset path {} does not exist", paths.dataset.display());
        error!("Reload failed: {}", reason);
        return ReloadOutcome::Failed { reason };
    }

    match engine.reload_dataset(&paths.dataset) {
        Ok(()) => {
            let elapsed = start.elapsed();
            info!("Reloaded dataset in {:.2?}", elapsed);
            ReloadOutcome::Reloaded { elapsed }
        }
        Err(err) => {
            error!("Reload failed after {:.2?}: {}", start.elapsed(), err);
            ReloadOutcome::Failed {
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, StepResult};
    use std::cell::RefCell;
    use std::fmt;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tracing::field::{Field, Visit};
    use tracing::{Level, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Reload {
            marker_present: bool,
            lock_free: bool,
        },
    }

    /// Engine that records what it observed when asked to reload.
    struct RecordingEngine {
        paths: ReloadPaths,
        events: Rc<RefCell<Vec<Event>>>,
        fail_reload: bool,
    }

    impl Engine for RecordingEngine {
        fn step(&mut self) -> Result<StepResult, EngineError> {
            Ok(StepResult {
                keep_running: true,
                loss: 0.0,
                iteration: 0,
            })
        }

        fn reload_dataset(&mut self, _path: &Path) -> Result<(), EngineError> {
            let second_holder = LockCoordinator::new(&self.paths.lock).try_acquire()?;
            self.events.borrow_mut().push(Event::Reload {
                marker_present: self.paths.marker.exists(),
                lock_free: second_holder.is_some(),
            });
            if self.fail_reload {
                return Err(EngineError::Unsupported("reloading in this test"));
            }
            Ok(())
        }

        fn set_training(&mut self, _enabled: bool) {}

        fn is_training(&self) -> bool {
            true
        }
    }

    /// Collects the messages of `WARN` events.
    #[derive(Clone, Default)]
    struct WarningLog(Arc<Mutex<Vec<String>>>);

    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: Subscriber> Layer<S> for WarningLog {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                let mut visitor = MessageVisitor(String::new());
                event.record(&mut visitor);
                self.0.lock().unwrap().push(visitor.0);
            }
        }
    }

    /// Run `f` with warnings captured, returning its result and the warnings.
    fn capture_warnings<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
        let log = WarningLog::default();
        let subscriber = tracing_subscriber::registry().with(log.clone());
        let result = tracing::subscriber::with_default(subscriber, f);
        let warnings = log.0.lock().unwrap().clone();
        (result, warnings)
    }

    struct Fixture {
        _dir: TempDir,
        paths: ReloadPaths,
        events: Rc<RefCell<Vec<Event>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let dataset = dir.path().join("mesh.obj");
            fs::write(&dataset, "v 0 0 0\n").unwrap();
            let paths = ReloadPaths::new(dir.path().join("dataset.lock"), dataset);
            Self {
                _dir: dir,
                paths,
                events: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn engine(&self, fail_reload: bool) -> RecordingEngine {
            RecordingEngine {
                paths: self.paths.clone(),
                events: Rc::clone(&self.events),
                fail_reload,
            }
        }

        fn trigger(&self) -> ReloadTrigger {
            ReloadTrigger::new(self.paths.clone())
        }

        fn write_marker(&self) {
            fs::write(&self.paths.marker, b"").unwrap();
        }

        fn lock_is_free(&self) -> bool {
            LockCoordinator::new(&self.paths.lock).try_acquire().unwrap().is_some()
        }
    }

    #[test]
    fn test_default_marker_path() {
        let paths = ReloadPaths::new("/tmp/scene.lock", "/tmp/scene");
        assert_eq!(paths.marker, PathBuf::from("/tmp/scene.lock.changed"));
        let paths = paths.with_marker("/tmp/ready");
        assert_eq!(paths.marker, PathBuf::from("/tmp/ready"));
    }

    #[test]
    fn test_from_parts_requires_lock_and_dataset() {
        assert!(!ReloadTrigger::from_parts(None, Some("scene".into()), None).is_enabled());
        assert!(!ReloadTrigger::from_parts(Some("a.lock".into()), None, None).is_enabled());
        let trigger = ReloadTrigger::from_parts(Some("a.lock".into()), Some("scene".into()), Some("m".into()));
        assert!(trigger.is_enabled());
        assert_eq!(trigger.paths().unwrap().marker, PathBuf::from("m"));
    }

    #[test]
    fn test_disabled_trigger_touches_nothing() {
        let fixture = Fixture::new();
        fixture.write_marker();
        let outcome = ReloadTrigger::disabled().poll(true, &mut fixture.engine(false));

        assert_eq!(outcome, ReloadOutcome::Disabled);
        assert!(fixture.paths.marker.exists());
        assert!(!fixture.paths.lock.exists());
        assert!(fixture.events.borrow().is_empty());
    }

    #[test]
    fn test_unstable_skips_before_locking() {
        let fixture = Fixture::new();
        fixture.write_marker();
        let outcome = fixture.trigger().poll(false, &mut fixture.engine(false));

        assert_eq!(outcome, ReloadOutcome::NotStable);
        assert!(fixture.paths.marker.exists());
        assert!(!fixture.paths.lock.exists());
        assert!(fixture.events.borrow().is_empty());
    }

    #[test]
    fn test_no_marker_means_no_reload_and_lock_released() {
        let fixture = Fixture::new();
        let (outcome, warnings) = capture_warnings(|| fixture.trigger().poll(true, &mut fixture.engine(false)));

        assert_eq!(outcome, ReloadOutcome::NoChange);
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
        assert!(fixture.events.borrow().is_empty());
        assert!(fixture.lock_is_free());
    }

    #[test]
    fn test_contended_lock_leaves_marker_untouched() {
        let fixture = Fixture::new();
        fixture.write_marker();
        let mutator = LockCoordinator::new(&fixture.paths.lock).try_acquire().unwrap();
        assert!(mutator.is_some());

        let (outcome, warnings) = capture_warnings(|| fixture.trigger().poll(true, &mut fixture.engine(false)));

        assert_eq!(outcome, ReloadOutcome::LockUnavailable);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("held by another process"), "{}", warnings[0]);
        assert!(fixture.paths.marker.exists());
        assert!(fixture.events.borrow().is_empty());
        LockCoordinator::release(mutator);
    }

    #[test]
    fn test_unopenable_lock_skips_reload_with_warning() {
        let fixture = Fixture::new();
        fixture.write_marker();
        // A directory cannot be opened for writing as a lock file.
        let lock_dir = fixture._dir.path().join("lock-dir");
        fs::create_dir(&lock_dir).unwrap();
        let paths = ReloadPaths {
            lock: lock_dir,
            ..fixture.paths.clone()
        };

        let (outcome, warnings) =
            capture_warnings(|| ReloadTrigger::new(paths).poll(true, &mut fixture.engine(false)));

        assert_eq!(outcome, ReloadOutcome::LockUnavailable);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("Could not lock"), "{}", warnings[0]);
        assert!(fixture.paths.marker.exists());
        assert!(fixture.events.borrow().is_empty());
    }

    #[test]
    fn test_marker_deleted_before_reload_and_lock_held_during_it() {
        let fixture = Fixture::new();
        fixture.write_marker();

        let outcome = fixture.trigger().poll(true, &mut fixture.engine(false));

        assert!(matches!(outcome, ReloadOutcome::Reloaded { .. }));
        assert_eq!(
            *fixture.events.borrow(),
            vec![Event::Reload {
                marker_present: false,
                lock_free: false,
            }]
        );
        assert!(!fixture.paths.marker.exists());
        assert!(fixture.lock_is_free());
    }

    #[test]
    fn test_failed_reload_still_releases_lock() {
        let fixture = Fixture::new();
        fixture.write_marker();

        let outcome = fixture.trigger().poll(true, &mut fixture.engine(true));

        assert!(matches!(outcome, ReloadOutcome::Failed { .. }));
        assert_eq!(fixture.events.borrow().len(), 1);
        assert!(!fixture.paths.marker.exists());
        assert!(fixture.lock_is_free());
    }

    #[test]
    fn test_missing_dataset_fails_after_consuming_marker() {
        let fixture = Fixture::new();
        fixture.write_marker();
        fs::remove_file(&fixture.paths.dataset).unwrap();

        let outcome = fixture.trigger().poll(true, &mut fixture.engine(false));

        assert!(matches!(outcome, ReloadOutcome::Failed { .. }));
        assert!(fixture.events.borrow().is_empty());
        assert!(!fixture.paths.marker.exists());
        assert!(fixture.lock_is_free());
    }

    #[test]
    fn test_marker_is_consumed_once() {
        let fixture = Fixture::new();
        fixture.write_marker();
        let trigger = fixture.trigger();
        let mut engine = fixture.engine(false);

        assert!(matches!(trigger.poll(true, &mut engine), ReloadOutcome::Reloaded { .. }));
        assert_eq!(trigger.poll(true, &mut engine), ReloadOutcome::NoChange);
        assert_eq!(fixture.events.borrow().len(), 1);
    }
}
