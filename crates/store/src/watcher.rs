//! A polling filesystem watcher over a root directory's entry list plus a
//! set of individual target files (each task's `.meta/meta.json`).
//!
//! Precise inotify/FSEvents bindings are not required; `check()` need only
//! be idempotent and report whether anything changed since the last call.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn dir_fingerprint(path: &Path) -> Vec<(PathBuf, SystemTime)> {
    let Ok(entries) = fs::read_dir(path) else {
        return Vec::new();
    };
    let mut snapshot: Vec<(PathBuf, SystemTime)> = entries
        .filter_map(std::result::Result::ok)
        .filter_map(|entry| mtime(&entry.path()).map(|t| (entry.path(), t)))
        .collect();
    snapshot.sort();
    snapshot
}

/// Tracks a directory's entry list and a set of individual target files;
/// reports whether any of them changed since the last [`Watcher::check`].
pub struct Watcher {
    root: PathBuf,
    root_fingerprint: Vec<(PathBuf, SystemTime)>,
    targets: BTreeMap<PathBuf, Option<SystemTime>>,
}

impl Watcher {
    /// Start watching `root`, capturing its current entry fingerprint.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        let root_fingerprint = dir_fingerprint(&root);
        Self {
            root,
            root_fingerprint,
            targets: BTreeMap::new(),
        }
    }

    /// Begin tracking an additional target file.
    pub fn watch_target(&mut self, path: PathBuf) {
        let current = mtime(&path);
        self.targets.insert(path, current);
    }

    /// Replace the full target set in one go (used after a full rescan).
    pub fn set_targets(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.targets = paths.into_iter().map(|p| (p.clone(), mtime(&p))).collect();
    }

    /// Has the root directory's entry list, or any watched target file,
    /// changed since the previous call? Always idempotent: calling twice
    /// in a row without an intervening change reports `false` both times.
    pub fn check(&mut self) -> bool {
        let mut changed = false;

        let fingerprint = dir_fingerprint(&self.root);
        if fingerprint != self.root_fingerprint {
            changed = true;
            self.root_fingerprint = fingerprint;
        }

        for (path, last) in &mut self.targets {
            let current = mtime(path);
            if current != *last {
                changed = true;
                *last = current;
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn check_is_false_with_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = Watcher::new(dir.path().to_path_buf());
        assert!(!watcher.check());
        assert!(!watcher.check());
    }

    #[test]
    fn check_detects_a_new_entry_in_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = Watcher::new(dir.path().to_path_buf());
        assert!(!watcher.check());

        thread::sleep(Duration::from_millis(10));
        std::fs::write(dir.path().join("new-task"), b"id").unwrap();
        assert!(watcher.check());
        assert!(!watcher.check(), "second call without further changes must be false");
    }

    #[test]
    fn check_detects_a_target_file_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("meta.json");
        std::fs::write(&target, b"{}").unwrap();
        let mut watcher = Watcher::new(dir.path().to_path_buf());
        watcher.watch_target(target.clone());
        assert!(!watcher.check());

        thread::sleep(Duration::from_millis(10));
        std::fs::write(&target, b"{\"status\":\"running\"}").unwrap();
        assert!(watcher.check());
    }
}
