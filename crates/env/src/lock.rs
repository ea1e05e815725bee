//! Cross-process advisory file locking.
//!
//! Backs the sources/environments locks (§5) and the per-task metadata/run
//! locks used by `tasklab-store`. Supports a blocking acquire, a
//! poll-with-timeout acquire, and reentrant acquire/release from the same
//! holder via a depth counter — the process that already holds the lock
//! can call `lock()` again without deadlocking itself.

use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A reentrant, cross-process exclusive file lock.
pub struct FileLock {
    path: PathBuf,
    file: Option<File>,
    depth: u32,
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).write(true).truncate(false).open(path)
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

impl FileLock {
    /// Create a lock handle for the file at `path`. Does not lock yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            depth: 0,
        }
    }

    /// Is this handle currently holding the lock?
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.depth > 0
    }

    /// Block until the lock is acquired.
    pub fn lock(&mut self) -> io::Result<()> {
        if self.depth > 0 {
            self.depth += 1;
            return Ok(());
        }
        let file = open_lock_file(&self.path)?;
        file.lock_exclusive()?;
        self.file = Some(file);
        self.depth = 1;
        Ok(())
    }

    /// Try to acquire within `timeout`, polling. `Duration::ZERO` means
    /// try exactly once, non-blocking.
    pub fn lock_timeout(&mut self, timeout: Duration) -> io::Result<bool> {
        if self.depth > 0 {
            self.depth += 1;
            return Ok(true);
        }
        let file = open_lock_file(&self.path)?;
        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    self.file = Some(file);
                    self.depth = 1;
                    return Ok(true);
                }
                Err(e) if is_contended(&e) => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }
                    std::thread::sleep(Duration::from_millis(25).min(timeout));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Release one level of reentrancy; unlocks the file once depth hits 0.
    pub fn unlock(&mut self) -> io::Result<()> {
        if self.depth == 0 {
            return Ok(());
        }
        self.depth -= 1;
        if self.depth == 0 {
            if let Some(file) = self.file.take() {
                FileExt::unlock(&file)?;
            }
        }
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

/// Probe whether the lock at `path` is currently free, without holding it.
///
/// Used by crash recovery: a task left `running` is orphaned (its runlock
/// is acquirable) rather than actually running elsewhere (runlock held).
pub fn is_acquirable(path: &Path) -> io::Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    let file = open_lock_file(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            FileExt::unlock(&file)?;
            Ok(true)
        }
        Err(e) if is_contended(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrant_lock_does_not_deadlock_same_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let mut lock = FileLock::new(&path);
        lock.lock().unwrap();
        lock.lock().unwrap();
        lock.unlock().unwrap();
        assert!(lock.is_held());
        lock.unlock().unwrap();
        assert!(!lock.is_held());
    }

    #[test]
    fn lock_timeout_reports_contention_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let mut holder = FileLock::new(&path);
        holder.lock().unwrap();

        let mut other = FileLock::new(&path);
        let acquired = other.lock_timeout(Duration::from_millis(50)).unwrap();
        assert!(!acquired);
    }

    #[test]
    fn is_acquirable_true_when_no_one_holds_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".runlock");
        assert!(is_acquirable(&path).unwrap());
    }

    #[test]
    fn is_acquirable_false_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".runlock");
        let mut holder = FileLock::new(&path);
        holder.lock().unwrap();
        assert!(!is_acquirable(&path).unwrap());
    }
}
