//! Non-blocking advisory file locks.
//!
//! The lock file is a token shared with the process that rewrites the
//! dataset. Acquisition never waits: contention is an ordinary outcome and
//! the caller simply tries again on its next iteration. The lock is
//! advisory, so it only excludes processes that also take it.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Takes and releases the exclusive lock on a single path.
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    path: PathBuf,
}

impl LockCoordinator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to take the lock without blocking.
    ///
    /// Creates the lock file if needed. Returns `Ok(None)` when another
    /// holder has it; any other failure to open or lock is an `Err`.
    pub fn try_acquire(&self) -> io::Result<Option<LockHandle>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!("Acquired lock {}", self.path.display());
                Ok(Some(LockHandle {
                    file,
                    path: self.path.clone(),
                }))
            }
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Release a handle returned by [`LockCoordinator::try_acquire`].
    ///
    /// Passing `None` is a no-op.
    pub fn release(handle: Option<LockHandle>) {
        if let Some(handle) = handle {
            handle.release();
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Ownership of an acquired lock.
///
/// The lock is held until the handle is released or dropped, so every exit
/// path of the holder gives it back.
#[derive(Debug)]
pub struct LockHandle {
    file: File,
    path: PathBuf,
}

impl LockHandle {
    /// Give the lock back.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        // Closing the file would release it too; unlock first so the release
        // does not depend on when the descriptor is closed.
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!("Unlocking {} failed: {}", self.path.display(), err);
        }
        debug!("Released lock {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_acquire_creates_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.lock");
        let coordinator = LockCoordinator::new(&path);

        let handle = coordinator.try_acquire().unwrap();
        assert!(handle.is_some());
        assert!(path.exists());
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = LockCoordinator::new(dir.path().join("dataset.lock"));

        let first = coordinator.try_acquire().unwrap();
        assert!(first.is_some());
        assert!(coordinator.try_acquire().unwrap().is_none());

        LockCoordinator::release(first);
        assert!(coordinator.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_drop_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = LockCoordinator::new(dir.path().join("dataset.lock"));
        {
            let _held = coordinator.try_acquire().unwrap().unwrap();
            assert!(coordinator.try_acquire().unwrap().is_none());
        }
        assert!(coordinator.try_acquire().unwrap().is_some());
    }

    #[test]
    fn test_release_none_is_noop() {
        LockCoordinator::release(None);
    }

    #[test]
    fn test_lock_content_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.lock");
        std::fs::write(&path, b"owner=mutator").unwrap();

        let coordinator = LockCoordinator::new(&path);
        LockCoordinator::release(coordinator.try_acquire().unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), b"owner=mutator");
    }

    #[test]
    fn test_only_one_concurrent_holder() {
        const CONTENDERS: usize = 8;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.lock");
        let winners = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(CONTENDERS));

        let threads: Vec<_> = (0..CONTENDERS)
            .map(|_| {
                let coordinator = LockCoordinator::new(&path);
                let winners = Arc::clone(&winners);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let handle = coordinator.try_acquire().unwrap();
                    if handle.is_some() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    // Every contender has tried before anyone lets go.
                    barrier.wait();
                    LockCoordinator::release(handle);
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
