//! Cleanup of the shared checkout/environment caches.
//!
//! Both caches are content-addressed directories keyed by `hash({repository,
//! commit})` or `hash(canon(env_spec))`. An entry is eligible for removal
//! once no live task still references its key and (if an age policy is
//! given) it has aged past the cutoff. `gc` never removes an entry whose
//! cache-root file lock is currently held — a concurrent `setup()`/clone is
//! in flight for it.

use crate::error::Error;
use crate::lock::is_acquirable;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// One cache entry under a checkout or environment cache root.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The content-addressed key (directory name).
    pub key: String,
    /// Full path to the entry.
    pub path: PathBuf,
    /// Last-modified time, used for age-based eviction.
    pub modified: SystemTime,
}

/// Outcome of a [`gc`] pass.
#[derive(Debug, Clone, Default)]
pub struct GcReport {
    /// Entries scanned in total.
    pub scanned: usize,
    /// Entries removed (or that would be removed, under `dry_run`).
    pub removed: Vec<String>,
    /// Entries skipped because their key is still referenced.
    pub retained: usize,
    /// Entries skipped because their lock is currently held.
    pub busy: usize,
}

fn list_entries(root: &Path) -> crate::error::Result<Vec<CacheEntry>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let read = fs::read_dir(root).map_err(|e| Error::io(e, Some(root.to_path_buf()), "read_dir"))?;
    let mut entries = Vec::new();
    for item in read {
        let item = item.map_err(|e| Error::io(e, Some(root.to_path_buf()), "read_dir_entry"))?;
        let path = item.path();
        if !path.is_dir() {
            continue;
        }
        let Some(key) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        entries.push(CacheEntry { key, path, modified });
    }
    Ok(entries)
}

/// Remove every entry under `root` whose key is not in `live_keys`, is older
/// than `max_age` (when given), and whose `.lock` file is acquirable (not
/// held by a concurrent clone/setup). With `dry_run`, reports what would be
/// removed without touching disk.
pub fn gc(
    root: &Path,
    live_keys: &std::collections::HashSet<String>,
    max_age: Option<Duration>,
    dry_run: bool,
) -> crate::error::Result<GcReport> {
    let entries = list_entries(root)?;
    let now = SystemTime::now();
    let mut report = GcReport {
        scanned: entries.len(),
        ..GcReport::default()
    };

    for entry in entries {
        if live_keys.contains(&entry.key) {
            report.retained += 1;
            continue;
        }
        if let Some(max_age) = max_age {
            let age = now.duration_since(entry.modified).unwrap_or(Duration::ZERO);
            if age < max_age {
                report.retained += 1;
                continue;
            }
        }

        let lock_path = entry.path.join(".lock");
        let acquirable = is_acquirable(&lock_path).unwrap_or(true);
        if !acquirable {
            report.busy += 1;
            continue;
        }

        if !dry_run {
            fs::remove_dir_all(&entry.path).map_err(|e| Error::io(e, Some(entry.path.clone()), "remove_dir_all"))?;
        }
        report.removed.push(entry.key);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn removes_unreferenced_entries_and_keeps_live_ones() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("live")).unwrap();
        std::fs::create_dir_all(dir.path().join("dead")).unwrap();

        let mut live = HashSet::new();
        live.insert("live".to_string());

        let report = gc(dir.path(), &live, None, false).unwrap();
        assert_eq!(report.removed, vec!["dead".to_string()]);
        assert!(dir.path().join("live").exists());
        assert!(!dir.path().join("dead").exists());
    }

    #[test]
    fn dry_run_reports_without_deleting() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dead")).unwrap();

        let report = gc(dir.path(), &HashSet::new(), None, true).unwrap();
        assert_eq!(report.removed, vec!["dead".to_string()]);
        assert!(dir.path().join("dead").exists(), "dry run must not delete");
    }

    #[test]
    fn max_age_protects_recently_touched_entries() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("fresh")).unwrap();

        let report = gc(dir.path(), &HashSet::new(), Some(Duration::from_secs(3600)), false).unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.retained, 1);
    }
}
