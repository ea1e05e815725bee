//! Per-task store: a uniform keyed interface over one task directory,
//! guarded by a file lock (inter-process) and implicitly by the OS
//! filesystem (intra-process).

use crate::error::{Error, Result};
use crate::types::Meta;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;
use tasklab_env::FileLock;

struct MetaCache {
    meta: Meta,
    mtime: SystemTime,
}

/// Keys starting with `#` address the JSON metadata document; every other
/// key addresses a sibling `<key>.json` file under `.meta/`. The log sink
/// is a dedicated append stream distinct from this key/value surface.
pub struct TaskStore {
    task_dir: PathBuf,
    meta_path: PathBuf,
    output_path: PathBuf,
    runlock_path: PathBuf,
    lock: Mutex<FileLock>,
    cache: Mutex<Option<MetaCache>>,
}

fn unpoison<T>(r: std::sync::LockResult<T>) -> T {
    r.unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl TaskStore {
    /// Open (without locking) the per-task store rooted at `task_dir`.
    #[must_use]
    pub fn new(task_dir: PathBuf) -> Self {
        let meta_dir = task_dir.join(".meta");
        Self {
            meta_path: meta_dir.join("meta.json"),
            output_path: meta_dir.join("output.txt"),
            runlock_path: meta_dir.join(".runlock"),
            lock: Mutex::new(FileLock::new(meta_dir.join(".lock"))),
            cache: Mutex::new(None),
            task_dir,
        }
    }

    /// Root directory of this task.
    #[must_use]
    pub fn task_dir(&self) -> &Path {
        &self.task_dir
    }

    /// Path of the liveness lock held for the duration of step 5 of `run`.
    #[must_use]
    pub fn runlock_path(&self) -> &Path {
        &self.runlock_path
    }

    fn meta_dir(&self) -> PathBuf {
        self.task_dir.join(".meta")
    }

    /// Acquire the metadata lock. Reentrant from the same holder.
    pub fn lock(&self) -> Result<()> {
        unpoison(self.lock.lock())
            .lock()
            .map_err(|e| Error::io(e, Some(self.meta_path.clone()), "lock"))
    }

    /// Release one level of the metadata lock.
    pub fn unlock(&self) -> Result<()> {
        unpoison(self.lock.lock())
            .unlock()
            .map_err(|e| Error::io(e, Some(self.meta_path.clone()), "unlock"))
    }

    fn reload_meta_if_needed(&self) -> Result<()> {
        let mtime = fs::metadata(&self.meta_path).and_then(|m| m.modified()).ok();
        let mut cache = unpoison(self.cache.lock());
        let needs_reload = match (&*cache, mtime) {
            (None, _) => true,
            (Some(c), Some(m)) => c.mtime != m,
            (Some(_), None) => true,
        };
        if needs_reload {
            let text = fs::read_to_string(&self.meta_path)
                .map_err(|e| Error::io(e, Some(self.meta_path.clone()), "read"))?;
            let meta: Meta = serde_json::from_str(&text).map_err(|e| Error::MalformedMeta {
                path: self.meta_path.clone(),
                message: e.to_string(),
            })?;
            *cache = Some(MetaCache {
                meta,
                mtime: mtime.unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(())
    }

    /// The metadata document, re-read from disk when its mtime has advanced.
    pub fn meta(&self) -> Result<Meta> {
        self.reload_meta_if_needed()?;
        Ok(unpoison(self.cache.lock())
            .as_ref()
            .expect("reload_meta_if_needed always populates the cache")
            .meta
            .clone())
    }

    /// Write the initial metadata document (task creation only).
    pub fn write_meta(&self, meta: &Meta) -> Result<()> {
        fs::create_dir_all(self.meta_dir())
            .map_err(|e| Error::io(e, Some(self.meta_dir()), "create_dir_all"))?;
        let tmp = self.meta_path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(meta).map_err(|e| Error::validation(e.to_string()))?;
        fs::write(&tmp, json).map_err(|e| Error::io(e, Some(tmp.clone()), "write"))?;
        fs::rename(&tmp, &self.meta_path)
            .map_err(|e| Error::io(e, Some(self.meta_path.clone()), "rename"))?;
        let mtime = fs::metadata(&self.meta_path)
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());
        *unpoison(self.cache.lock()) = Some(MetaCache {
            meta: meta.clone(),
            mtime,
        });
        Ok(())
    }

    /// `get("#status")` etc. addresses a field of the metadata document;
    /// any other key addresses a sibling `<key>.json` file.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(field) = key.strip_prefix('#') {
            let meta = self.meta()?;
            let doc = serde_json::to_value(meta).map_err(|e| Error::validation(e.to_string()))?;
            Ok(doc.get(field).cloned())
        } else {
            let path = self.meta_dir().join(format!("{key}.json"));
            if !path.exists() {
                return Ok(None);
            }
            let text = fs::read_to_string(&path).map_err(|e| Error::io(e, Some(path.clone()), "read"))?;
            serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| Error::MalformedMeta {
                    path,
                    message: e.to_string(),
                })
        }
    }

    /// `set("#field", value)` updates a field of the metadata document,
    /// bumps `updated`, and rewrites atomically; any other key writes a
    /// sibling `<key>.json` file.
    pub fn set(&self, key: &str, value: &Value) -> Result<()> {
        if let Some(field) = key.strip_prefix('#') {
            let meta = self.meta()?;
            let mut doc = serde_json::to_value(meta).map_err(|e| Error::validation(e.to_string()))?;
            if let Some(obj) = doc.as_object_mut() {
                obj.insert(field.to_string(), value.clone());
            }
            let mut updated: Meta = serde_json::from_value(doc).map_err(|e| Error::MalformedMeta {
                path: self.meta_path.clone(),
                message: e.to_string(),
            })?;
            updated.touch();
            self.write_meta(&updated)
        } else {
            let path = self.meta_dir().join(format!("{key}.json"));
            fs::create_dir_all(self.meta_dir())
                .map_err(|e| Error::io(e, Some(self.meta_dir()), "create_dir_all"))?;
            let json = serde_json::to_vec_pretty(value).map_err(|e| Error::validation(e.to_string()))?;
            fs::write(&path, json).map_err(|e| Error::io(e, Some(path), "write"))
        }
    }

    /// Append a line to the combined stdout+stderr log, flushing
    /// immediately. `None` is a no-op marker for the stream's terminal call
    /// (the file itself needs no "close").
    pub fn append_log(&self, line: Option<&str>) -> Result<()> {
        let Some(line) = line else { return Ok(()) };
        fs::create_dir_all(self.meta_dir())
            .map_err(|e| Error::io(e, Some(self.meta_dir()), "create_dir_all"))?;
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .map_err(|e| Error::io(e, Some(self.output_path.clone()), "open"))?;
        writeln!(f, "{line}").map_err(|e| Error::io(e, Some(self.output_path.clone()), "write"))?;
        f.flush()
            .map_err(|e| Error::io(e, Some(self.output_path.clone()), "flush"))
    }

    /// Full contents of the combined stdout+stderr log.
    pub fn log(&self) -> Result<String> {
        if !self.output_path.exists() {
            return Ok(String::new());
        }
        fs::read_to_string(&self.output_path).map_err(|e| Error::io(e, Some(self.output_path.clone()), "read"))
    }

    /// Resolve `rel` inside the task directory. Rejects absolute paths.
    pub fn filepath(&self, rel: &str) -> Result<PathBuf> {
        let rel_path = Path::new(rel);
        if rel_path.is_absolute() {
            return Err(Error::PathEscape(rel_path.to_path_buf()));
        }
        Ok(self.task_dir.join(rel_path))
    }

    /// Read a file scoped inside the task directory.
    pub fn read(&self, rel: &str) -> Result<Vec<u8>> {
        let path = self.filepath(rel)?;
        fs::read(&path).map_err(|e| Error::io(e, Some(path), "read"))
    }

    /// Write a file scoped inside the task directory, creating parents.
    pub fn write(&self, rel: &str, contents: &[u8]) -> Result<()> {
        let path = self.filepath(rel)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(e, Some(parent.to_path_buf()), "create_dir_all"))?;
        }
        fs::write(&path, contents).map_err(|e| Error::io(e, Some(path), "write"))
    }

    /// Remove every file in the task directory except `.meta/`.
    pub fn clear(&self) -> Result<()> {
        let dir = fs::read_dir(&self.task_dir).map_err(|e| Error::io(e, Some(self.task_dir.clone()), "read_dir"))?;
        for entry in dir {
            let entry = entry.map_err(|e| Error::io(e, Some(self.task_dir.clone()), "read_dir"))?;
            if entry.file_name() == ".meta" {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path).map_err(|e| Error::io(e, Some(path), "remove_dir_all"))?;
            } else {
                fs::remove_file(&path).map_err(|e| Error::io(e, Some(path), "remove_file"))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn sample_meta() -> Meta {
        Meta {
            status: TaskStatus::Pending,
            created: Utc::now(),
            updated: Utc::now(),
            repository: "https://example.com/r.git".into(),
            commit: "abc123".into(),
            entrypoint: "train".into(),
            arguments: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            command: vec!["python".into(), "train.py".into()],
            environment: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn get_hash_prefixed_key_reads_metadata_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path().to_path_buf());
        store.write_meta(&sample_meta()).unwrap();
        let status = store.get("#status").unwrap().unwrap();
        assert_eq!(status, serde_json::json!("pending"));
    }

    #[test]
    fn set_hash_prefixed_key_bumps_updated_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path().to_path_buf());
        let meta = sample_meta();
        let before = meta.updated;
        store.write_meta(&meta).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.set("#status", &serde_json::json!("running")).unwrap();

        let reloaded = store.meta().unwrap();
        assert_eq!(reloaded.status, TaskStatus::Running);
        assert!(reloaded.updated > before);
    }

    #[test]
    fn non_hash_key_roundtrips_through_sibling_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path().to_path_buf());
        store.write_meta(&sample_meta()).unwrap();
        store.set("loss_observer", &serde_json::json!({"type": "aggregated"})).unwrap();
        assert_eq!(
            store.get("loss_observer").unwrap(),
            Some(serde_json::json!({"type": "aggregated"}))
        );
    }

    #[test]
    fn filepath_rejects_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path().to_path_buf());
        assert!(store.filepath("/etc/passwd").is_err());
        assert!(store.filepath("relative/ok.txt").is_ok());
    }

    #[test]
    fn clear_preserves_meta_directory_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path().to_path_buf());
        store.write_meta(&sample_meta()).unwrap();
        store.write("model.bin", b"weights").unwrap();
        store.clear().unwrap();
        assert!(!dir.path().join("model.bin").exists());
        assert!(dir.path().join(".meta/meta.json").exists());
    }

    #[test]
    fn append_log_and_read_back_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::new(dir.path().to_path_buf());
        store.append_log(Some("line one")).unwrap();
        store.append_log(Some("line two")).unwrap();
        store.append_log(None).unwrap();
        assert_eq!(store.log().unwrap(), "line one\nline two\n");
    }
}
