//! The tasks collection: catalog, tagging, query, dependency resolution,
//! and the task lifecycle state machine with crash recovery.

use crate::error::{Error, Result};
use crate::task::Task;
use crate::task_store::TaskStore;
use crate::types::{DependencyMap, Meta, TaskStatus};
use crate::watcher::Watcher;
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tasklab_env::{is_acquirable, Environment, EntryPoint, FileLock, SourceRef};
use tasklab_sink::{ConsoleSink, ExtractorSink, LogSink, NamedSequences, OutputTap, ScalarAggregator, SteppedSeries};

fn unpoison<T>(r: std::sync::LockResult<T>) -> T {
    r.unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Resolved root paths a [`Tasks`] catalog operates over. The external
/// config collaborator (CLI) is responsible for producing one of these
/// from a config file and environment-variable overrides.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory under which every task directory and tag file lives.
    pub task_root: PathBuf,
    /// Root of the shared checkout/env/runtime caches.
    pub cache_root: PathBuf,
}

impl StoreConfig {
    /// `<cache_root>/sources`.
    #[must_use]
    pub fn checkout_cache_root(&self) -> PathBuf {
        self.cache_root.join("sources")
    }

    /// `<cache_root>/env`.
    #[must_use]
    pub fn env_cache_root(&self) -> PathBuf {
        self.cache_root.join("env")
    }

    /// `<cache_root>/runtime/<task_id>`.
    #[must_use]
    pub fn runtime_dir(&self, task_id: &str) -> PathBuf {
        self.cache_root.join("runtime").join(task_id)
    }
}

/// The tasks collection: owns the catalog map `id → task dir` and the tag
/// map `tag → id`. A [`Task`] is a disposable view onto its own directory;
/// this struct holds the only long-lived state.
pub struct Tasks {
    config: StoreConfig,
    store_lock: Mutex<FileLock>,
    index: RwLock<BTreeMap<String, PathBuf>>,
    tags: RwLock<BTreeMap<String, String>>,
    watcher: Mutex<Watcher>,
}

impl Tasks {
    /// Open the catalog at `config.task_root`, without scanning yet. Call
    /// [`Tasks::update`] with `None` to populate it.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        let lock_path = config.task_root.join(".lock");
        let watcher = Watcher::new(config.task_root.clone());
        Self {
            store_lock: Mutex::new(FileLock::new(lock_path)),
            watcher: Mutex::new(watcher),
            index: RwLock::new(BTreeMap::new()),
            tags: RwLock::new(BTreeMap::new()),
            config,
        }
    }

    /// Resolved root paths this catalog was built from.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn open(&self, id: &str) -> Option<Task> {
        unpoison(self.index.read())
            .get(id)
            .map(|dir| Task::open(id, dir.clone()))
    }

    /// `update(None)` rescans `task_root`, rebuilding the task map (every
    /// directory whose `.meta/meta.json` exists) and the tag map (every
    /// regular file under the root). `update(Some(id))` just invalidates
    /// that one task's cached metadata.
    pub fn update(&self, id: Option<&str>) -> Result<()> {
        let Some(id) = id else {
            return self.rescan();
        };
        if let Some(task) = self.open(id) {
            // Metadata is re-read lazily by mtime; touching it here forces
            // the check without requiring the caller to read a value back.
            let _ = task.meta()?;
        }
        Ok(())
    }

    /// Hold the store-wide lock (`task_root/.lock`) for the duration of `f`.
    /// Guards catalog-mutating operations (rescan, create) against
    /// concurrent catalogs racing on the same `task_root`.
    fn with_store_lock<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut lock = unpoison(self.store_lock.lock());
        lock.lock().map_err(|e| Error::io(e, Some(self.config.task_root.join(".lock")), "lock"))?;
        let result = f();
        let _ = lock.unlock();
        result
    }

    fn rescan(&self) -> Result<()> {
        fs_err_create_dir_all(&self.config.task_root)?;
        self.with_store_lock(|| self.rescan_locked())
    }

    fn rescan_locked(&self) -> Result<()> {
        let mut new_index = BTreeMap::new();
        let mut new_tags = BTreeMap::new();

        let entries = std::fs::read_dir(&self.config.task_root)
            .map_err(|e| Error::io(e, Some(self.config.task_root.clone()), "read_dir"))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, Some(self.config.task_root.clone()), "read_dir"))?;
            let path = entry.path();
            if path.file_name().and_then(|n| n.to_str()) == Some(".lock") {
                continue;
            }
            if path.is_dir() {
                if path.join(".meta").join("meta.json").is_file() {
                    let id = entry.file_name().to_string_lossy().into_owned();
                    new_index.insert(id, path);
                }
            } else if path.is_file() {
                let tag = entry.file_name().to_string_lossy().into_owned();
                let task_id = std::fs::read_to_string(&path)
                    .map_err(|e| Error::io(e, Some(path.clone()), "read"))?
                    .trim()
                    .to_string();
                new_tags.insert(tag, task_id);
            }
        }

        let mut watcher = Watcher::new(self.config.task_root.clone());
        watcher.set_targets(
            new_index
                .values()
                .map(|dir| dir.join(".meta").join("meta.json")),
        );
        *unpoison(self.watcher.lock()) = watcher;
        *unpoison(self.index.write()) = new_index;
        *unpoison(self.tags.write()) = new_tags;
        Ok(())
    }

    /// Poll the watcher until a relevant change is observed or `timeout`
    /// elapses (`timeout <= Duration::ZERO` polls exactly once). If
    /// `tasks` is given and any id is unknown, fails `UnknownTask`.
    pub async fn wait(&self, tasks: Option<&[String]>, timeout: Duration) -> Result<bool> {
        if let Some(ids) = tasks {
            let index = unpoison(self.index.read());
            for id in ids {
                if !index.contains_key(id) {
                    return Err(Error::UnknownTask(id.clone()));
                }
            }
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if unpoison(self.watcher.lock()).check() {
                return Ok(true);
            }
            if timeout.is_zero() || tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(50).min(timeout)).await;
        }
    }

    /// Write `<task_root>/<tag>` with content `task_id`, updating the
    /// in-memory tag map.
    pub fn tag(&self, task_id: &str, tag: &str) -> Result<()> {
        let path = self.config.task_root.join(tag);
        std::fs::write(&path, task_id).map_err(|e| Error::io(e, Some(path), "write"))?;
        unpoison(self.tags.write()).insert(tag.to_string(), task_id.to_string());
        Ok(())
    }

    /// Resolve, in order: exact tag match → exact task id → unique prefix
    /// match over task ids. `None` if ambiguous or absent.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<Task> {
        if let Some(id) = unpoison(self.tags.read()).get(identifier) {
            return self.open(id);
        }
        if unpoison(self.index.read()).contains_key(identifier) {
            return self.open(identifier);
        }
        let matches = self.search(identifier);
        match matches.as_slice() {
            [only] => self.open(only),
            _ => None,
        }
    }

    /// Every task id beginning with `prefix`, sorted.
    #[must_use]
    pub fn search(&self, prefix: &str) -> Vec<String> {
        unpoison(self.index.read())
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Every tag currently pointing at `task_id`, sorted.
    #[must_use]
    pub fn tags_for(&self, task_id: &str) -> Vec<String> {
        let mut tags: Vec<String> = unpoison(self.tags.read())
            .iter()
            .filter(|(_, id)| id.as_str() == task_id)
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        tags
    }

    /// Remove every tag pointing at `task_id`, then recursively remove its
    /// directory. Refuses tasks in `preparing`/`running` unless `force`.
    pub fn remove(&self, task_id: &str, force: bool) -> Result<()> {
        let task = self.open(task_id).ok_or_else(|| Error::UnknownTask(task_id.to_string()))?;
        let status = task.status()?;
        if !force && matches!(status, TaskStatus::Preparing | TaskStatus::Running) {
            return Err(Error::Busy(task_id.to_string()));
        }

        let pointing: Vec<String> = unpoison(self.tags.read())
            .iter()
            .filter(|(_, id)| id.as_str() == task_id)
            .map(|(tag, _)| tag.clone())
            .collect();
        for tag in &pointing {
            let path = self.config.task_root.join(tag);
            let _ = std::fs::remove_file(path);
            unpoison(self.tags.write()).remove(tag);
        }

        std::fs::remove_dir_all(task.dir()).map_err(|e| Error::io(e, Some(task.dir().to_path_buf()), "remove_dir_all"))?;
        unpoison(self.index.write()).remove(task_id);
        Ok(())
    }

    /// All tasks matching `predicate` (or every task if `None`), sorted by
    /// `order` (if given), reversed if requested.
    pub fn query(
        &self,
        predicate: Option<&dyn Fn(&Meta) -> bool>,
        order: Option<&dyn Fn(&Meta, &Meta) -> std::cmp::Ordering>,
        reverse: bool,
    ) -> Result<Vec<Task>> {
        let ids: Vec<String> = unpoison(self.index.read()).keys().cloned().collect();
        let mut matched = Vec::new();
        for id in ids {
            let Some(task) = self.open(&id) else { continue };
            let meta = task.meta()?;
            if predicate.is_none_or(|p| p(&meta)) {
                matched.push((meta, task));
            }
        }
        if let Some(cmp) = order {
            matched.sort_by(|a, b| cmp(&a.0, &b.0));
        }
        if reverse {
            matched.reverse();
        }
        Ok(matched.into_iter().map(|(_, t)| t).collect())
    }

    fn resolve_reference(&self, reference: &str) -> Result<String> {
        self.get(reference)
            .map(|t| t.id().to_string())
            .ok_or_else(|| Error::UnknownTask(reference.to_string()))
    }

    /// Scan every argument value for `@<ref>:<resource>` tokens. A token
    /// naming a predecessor's own argument is inlined as that value; one
    /// naming anything else becomes a staged-file dependency edge, and the
    /// token is rewritten to the symlink name it will have in the run
    /// directory (`<predecessor_id>_<resource>`).
    fn normalize_arguments(&self, raw: &BTreeMap<String, String>) -> Result<(BTreeMap<String, String>, DependencyMap)> {
        let token = Regex::new(r"@([^:\s]+):([^\s]+)").expect("static pattern");
        let mut deps: DependencyMap = BTreeMap::new();
        let mut out = BTreeMap::new();

        for (name, value) in raw {
            let mut resolved = value.clone();
            for cap in token.captures_iter(value) {
                let whole = &cap[0];
                let reference = &cap[1];
                let resource = &cap[2];
                let predecessor_id = self.resolve_reference(reference)?;
                let predecessor_meta = self
                    .open(&predecessor_id)
                    .ok_or_else(|| Error::UnknownTask(predecessor_id.clone()))?
                    .meta()?;

                if let Some(arg_value) = predecessor_meta.arguments.get(resource) {
                    let literal = match arg_value {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    resolved = resolved.replace(whole, &literal);
                } else {
                    let staged = format!("{predecessor_id}_{resource}");
                    resolved = resolved.replace(whole, &staged);
                    deps.entry(predecessor_id).or_insert_with(Vec::new).push(resource.to_string());
                }
            }
            out.insert(name.clone(), resolved);
        }

        for resources in deps.values_mut() {
            resources.sort();
            resources.dedup();
        }
        Ok((out, deps))
    }

    /// Build an [`Environment`] for `source` and resolve its commit.
    fn environment_for(&self, source: &SourceRef) -> Environment {
        Environment::new(source.clone(), self.config.checkout_cache_root(), self.config.env_cache_root())
    }

    /// Build an Environment, resolve `source`, create the task, validate the
    /// entry point, substitute argument references, and write the initial
    /// `pending` metadata. Returns the existing task on a duplicate
    /// submission when `exist_ok`; `None` on a collision when it is not.
    #[tracing::instrument(skip(self, raw_args))]
    pub async fn create(
        &self,
        source: SourceRef,
        entry_point_name: &str,
        raw_args: BTreeMap<String, String>,
        exist_ok: bool,
    ) -> Result<Option<Task>> {
        let mut env = self.environment_for(&source);
        let resolved = env.resolve().map_err(Error::Argument)?.clone();
        let checkout_root = env.source_path().map_err(Error::Argument)?;

        let entry_points = env.entrypoints(&checkout_root).await.map_err(Error::Argument)?;
        let entry_point = entry_points
            .into_iter()
            .find(|ep| ep.name == entry_point_name)
            .ok_or_else(|| Error::EntrypointMissing(entry_point_name.to_string()))?;

        let (normalized, dependencies) = self.normalize_arguments(&raw_args)?;
        let coerced = entry_point.coerce(&normalized).map_err(Error::Argument)?;
        let significant = entry_point.merge(&coerced, false).map_err(Error::Argument)?;

        let task_id = tasklab_hash::hash_value(&serde_json::json!({
            "repository": resolved.repository,
            "commit": resolved.commit,
            "entrypoint": entry_point.name,
            "arguments": significant,
            "dependencies": dependencies,
        }));

        let merged_all = entry_point.merge(&coerced, true).map_err(Error::Argument)?;
        let command = entry_point.generate(&merged_all).map_err(Error::Argument)?;

        self.with_store_lock(|| {
            if let Some(existing) = self.open(&task_id) {
                return Ok(exist_ok.then_some(existing));
            }

            let task_dir = self.config.task_root.join(&task_id);
            let store = TaskStore::new(task_dir.clone());
            let now = Utc::now();
            let meta = Meta {
                status: TaskStatus::Pending,
                created: now,
                updated: now,
                repository: resolved.repository.clone(),
                commit: resolved.commit.clone(),
                entrypoint: entry_point.name.clone(),
                arguments: merged_all,
                dependencies,
                command,
                environment: entry_point.environment.clone(),
                properties: BTreeMap::new(),
            };
            store.write_meta(&meta)?;

            let entrypoint_yaml = serde_yaml::to_string(&entry_point).map_err(|e| Error::validation(e.to_string()))?;
            std::fs::write(task_dir.join(".meta").join("entrypoint.yaml"), entrypoint_yaml)
                .map_err(|e| Error::io(e, Some(task_dir.clone()), "write"))?;

            unpoison(self.index.write()).insert(task_id.clone(), task_dir.clone());
            unpoison(self.watcher.lock()).watch_target(task_dir.join(".meta").join("meta.json"));

            Ok(self.open(&task_id))
        })
    }

    /// A standalone shell script (no task record) replicating the run
    /// environment and command, for off-host execution.
    pub async fn export(&self, source: SourceRef, entry_point_name: &str, raw_args: BTreeMap<String, String>) -> Result<String> {
        let mut env = self.environment_for(&source);
        env.resolve().map_err(Error::Argument)?;
        let checkout_root = env.source_path().map_err(Error::Argument)?;
        let entry_points = env.entrypoints(&checkout_root).await.map_err(Error::Argument)?;
        let entry_point = entry_points
            .into_iter()
            .find(|ep| ep.name == entry_point_name)
            .ok_or_else(|| Error::EntrypointMissing(entry_point_name.to_string()))?;

        let (normalized, _deps) = self.normalize_arguments(&raw_args)?;
        let coerced = entry_point.coerce(&normalized).map_err(Error::Argument)?;
        let merged_all = entry_point.merge(&coerced, true).map_err(Error::Argument)?;
        let command = entry_point.generate(&merged_all).map_err(Error::Argument)?;

        let env_dir = env.setup(&checkout_root).await.map_err(Error::Argument)?;
        Ok(env.export(&command, &checkout_root, &env_dir, &entry_point.environment))
    }

    /// Collect `task`'s predecessor tasks. `None` if any predecessor is
    /// missing or `failed` (unrecoverable), or if any is not yet `complete`
    /// and `wait` is false. With `wait`, blocks until every predecessor is
    /// `complete` or one turns `failed`.
    pub async fn dependencies(&self, task_id: &str, wait: bool) -> Result<Option<Vec<Task>>> {
        loop {
            let meta = self
                .open(task_id)
                .ok_or_else(|| Error::UnknownTask(task_id.to_string()))?
                .meta()?;

            let mut predecessors = Vec::with_capacity(meta.dependencies.len());
            let mut pending_wait = false;
            for predecessor_id in meta.dependencies.keys() {
                let Some(predecessor) = self.open(predecessor_id) else {
                    return Ok(None);
                };
                match predecessor.status()? {
                    TaskStatus::Failed => return Ok(None),
                    TaskStatus::Complete => predecessors.push(predecessor),
                    _ if wait => pending_wait = true,
                    _ => return Ok(None),
                }
            }

            if !pending_wait {
                return Ok(Some(predecessors));
            }
            self.wait(None, Duration::from_secs(5)).await?;
            self.update(None)?;
        }
    }

    fn observer_sink(&self, task: &Task, observer: &tasklab_env::ObserverSpec) -> ExtractorSink {
        let key = observer.key.clone();
        let task_dir = task.dir().to_path_buf();
        let store_for_emit = TaskStore::new(task_dir);
        let sep = observer
            .separator
            .clone()
            .unwrap_or_else(|| tasklab_sink::extractors::DEFAULT_SEPARATOR.to_string());
        let extractor: Box<dyn tasklab_sink::Extractor> = match observer.kind {
            tasklab_env::ObserverKind::Scores => Box::new(ScalarAggregator::new(sep)),
            tasklab_env::ObserverKind::Steps => Box::new(SteppedSeries::new(sep)),
            tasklab_env::ObserverKind::Sequences => Box::new(NamedSequences::new(sep)),
        };
        ExtractorSink::new(extractor, move |snapshot| {
            if let Err(err) = store_for_emit.set(&key, snapshot) {
                tracing::warn!(observer = %key, error = %err, "failed to persist observer snapshot");
            }
        })
    }

    fn stage_dependencies(&self, task: &Task, meta: &Meta, predecessors: &[Task], run_dir: &Path) -> Result<()> {
        for (predecessor_id, resources) in &meta.dependencies {
            let predecessor = predecessors
                .iter()
                .find(|p| p.id() == predecessor_id)
                .ok_or_else(|| Error::FileStagingFailed {
                    predecessor: predecessor_id.clone(),
                    resource: String::new(),
                    message: "predecessor not supplied to run()".to_string(),
                })?;
            for resource in resources {
                let source = predecessor.dir().join(resource);
                if !source.exists() {
                    let message = "predecessor artifact missing".to_string();
                    let _ = task.store().set("#status", &serde_json::json!("failed"));
                    return Err(Error::FileStagingFailed {
                        predecessor: predecessor_id.clone(),
                        resource: resource.clone(),
                        message,
                    });
                }
                let link = run_dir.join(format!("{predecessor_id}_{resource}"));
                let _ = std::fs::remove_file(&link);
                #[cfg(unix)]
                std::os::unix::fs::symlink(&source, &link)
                    .map_err(|e| Error::FileStagingFailed {
                        predecessor: predecessor_id.clone(),
                        resource: resource.clone(),
                        message: e.to_string(),
                    })?;
            }
        }
        Ok(())
    }

    fn persist_artifacts(entry_point: &EntryPoint, run_dir: &Path, task: &Task) -> Result<()> {
        let entries = std::fs::read_dir(run_dir).map_err(|e| Error::io(e, Some(run_dir.to_path_buf()), "read_dir"))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, Some(run_dir.to_path_buf()), "read_dir"))?;
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            let filename = entry.file_name().to_string_lossy().into_owned();
            if entry_point.artifact_match(&filename) {
                let contents = std::fs::read(&path).map_err(|e| Error::io(e, Some(path.clone()), "read"))?;
                task.store().write(&filename, &contents)?;
            }
        }
        Ok(())
    }

    /// Run `task_id`'s lifecycle to completion (or failure), given its
    /// already-resolved predecessor tasks. Steps 1-4 (validation, dependency
    /// staging, environment setup, runlock acquisition) run under the
    /// task's metadata lock; the metadata lock is released before step 5 (the
    /// child process, guarded only by the `runlock`) and re-acquired to
    /// record the terminal status — it is never held across a subprocess's
    /// lifetime.
    #[tracing::instrument(skip(self, predecessors))]
    pub async fn run(&self, task_id: &str, predecessors: &[Task], console: bool) -> Result<bool> {
        let task = self.open(task_id).ok_or_else(|| Error::UnknownTask(task_id.to_string()))?;

        task.store().lock()?;
        let prepared = self.prepare_run(&task, predecessors).await;
        if prepared.is_err() {
            let _ = task.store().set("#status", &serde_json::json!("failed"));
        }
        task.store().unlock()?;
        let Some((meta, entry_point, checkout_root, env, env_dir, run_dir, mut runlock)) = prepared? else {
            return Ok(matches!(task.status()?, TaskStatus::Complete | TaskStatus::Running));
        };

        let mut tap = OutputTap::new();
        tap.add(Box::new(
            LogSink::open(task.dir().join(".meta").join("output.txt")).map_err(|e| Error::io(e, Some(task.dir().to_path_buf()), "open"))?,
        ));
        if console {
            tap.add(Box::new(ConsoleSink));
        }
        for observer in &entry_point.observers {
            tap.add(Box::new(self.observer_sink(&task, observer)));
        }

        let success = env
            .run(
                &meta.command,
                &run_dir,
                &checkout_root,
                &env_dir,
                &meta.environment,
                |line| tap.push(line),
            )
            .await
            .map_err(Error::Argument);
        let _ = runlock.unlock();

        task.store().lock()?;
        let outcome = self.finish_run(&task, &entry_point, &run_dir, success);
        task.store().unlock()?;
        outcome
    }

    /// Steps 1-4: validate dependencies, stage file dependencies, transition
    /// through `preparing`, set up the environment, and acquire the
    /// non-blocking `runlock`. Returns `None` (with status already left
    /// `complete`/`failed`) when the task short-circuits without spawning a
    /// child. Must be called with the task's metadata lock held.
    #[allow(clippy::type_complexity)]
    async fn prepare_run(
        &self,
        task: &Task,
        predecessors: &[Task],
    ) -> Result<Option<(Meta, EntryPoint, PathBuf, Environment, PathBuf, PathBuf, FileLock)>> {
        let meta = task.meta()?;
        if meta.status.is_terminal() || matches!(meta.status, TaskStatus::Running | TaskStatus::Failed) {
            return Ok(None);
        }

        for predecessor_id in meta.dependencies.keys() {
            let complete = predecessors
                .iter()
                .find(|p| p.id() == predecessor_id)
                .is_some_and(|p| p.status().ok() == Some(TaskStatus::Complete));
            if !complete {
                task.store().set("#status", &serde_json::json!("failed"))?;
                return Err(Error::DependencyUnresolved(task.id().to_string()));
            }
        }

        let run_dir = self.config.runtime_dir(task.id());
        std::fs::create_dir_all(&run_dir).map_err(|e| Error::io(e, Some(run_dir.clone()), "create_dir_all"))?;
        self.stage_dependencies(task, &meta, predecessors, &run_dir)?;

        task.store().set("#status", &serde_json::json!("preparing"))?;
        let source = SourceRef {
            repository: meta.repository.clone(),
            commit_spec: meta.commit.clone(),
        };
        let mut env = self.environment_for(&source);
        env.resolve().map_err(Error::Argument)?;
        let checkout_root = env.source_path().map_err(Error::Argument)?;
        let env_dir = env.setup(&checkout_root).await.map_err(|source| Error::EnvironmentFailed {
            task: task.id().to_string(),
            source,
        })?;

        let entry_yaml = std::fs::read_to_string(task.dir().join(".meta").join("entrypoint.yaml"))
            .map_err(|e| Error::io(e, Some(task.dir().to_path_buf()), "read"))?;
        let entry_point: EntryPoint = serde_yaml::from_str(&entry_yaml).map_err(|e| Error::validation(e.to_string()))?;

        let mut runlock = FileLock::new(task.store().runlock_path().to_path_buf());
        let acquired = runlock
            .lock_timeout(Duration::ZERO)
            .map_err(|e| Error::io(e, Some(task.store().runlock_path().to_path_buf()), "lock"))?;
        if !acquired {
            return Err(Error::validation("runlock already held"));
        }
        task.store().set("#status", &serde_json::json!("running"))?;

        Ok(Some((meta, entry_point, checkout_root, env, env_dir, run_dir, runlock)))
    }

    /// Step 6: record the terminal status from a finished (or failed-to-run)
    /// child, persisting artifacts on success. Must be called with the
    /// task's metadata lock held.
    fn finish_run(&self, task: &Task, entry_point: &EntryPoint, run_dir: &Path, success: Result<bool>) -> Result<bool> {
        match success {
            Ok(true) => {
                Self::persist_artifacts(entry_point, run_dir, task)?;
                task.store().set("#status", &serde_json::json!("complete"))?;
                let _ = std::fs::remove_dir_all(run_dir);
                Ok(true)
            }
            Ok(false) => {
                task.store().set("#status", &serde_json::json!("failed"))?;
                Ok(false)
            }
            Err(err) => {
                task.store().set("#status", &serde_json::json!("failed"))?;
                Err(err)
            }
        }
    }

    /// Return `task_id` to `pending`. `clear=true` additionally removes
    /// every file in the task directory except `.meta/`.
    pub fn reset(&self, task_id: &str, clear: bool) -> Result<()> {
        let task = self.open(task_id).ok_or_else(|| Error::UnknownTask(task_id.to_string()))?;
        if clear {
            task.store().clear()?;
        }
        task.store().set("#status", &serde_json::json!("pending"))
    }

    /// Downgrade every task persisted as `running` whose `runlock` is
    /// acquirable (meaning no process actually holds it) back to `pending`.
    /// This is the only path that moves a task out of `running` without
    /// going through `complete`/`failed`.
    pub fn restore(&self) -> Result<()> {
        let ids: Vec<String> = unpoison(self.index.read()).keys().cloned().collect();
        for id in ids {
            let Some(task) = self.open(&id) else { continue };
            let meta = task.meta()?;
            if meta.status != TaskStatus::Running {
                continue;
            }
            if is_acquirable(task.store().runlock_path()).map_err(|e| Error::io(e, Some(task.store().runlock_path().to_path_buf()), "try_lock"))? {
                task.store().set("#status", &serde_json::json!("pending"))?;
            }
        }
        Ok(())
    }
}

fn fs_err_create_dir_all(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io(e, Some(path.to_path_buf()), "create_dir_all"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &Path) -> StoreConfig {
        StoreConfig {
            task_root: dir.join("tasks"),
            cache_root: dir.join("cache"),
        }
    }

    #[test]
    fn rescan_finds_task_directories_and_tag_files() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = Tasks::new(config(dir.path()));
        let task_dir = tasks.config.task_root.join("abc123");
        std::fs::create_dir_all(task_dir.join(".meta")).unwrap();
        std::fs::write(task_dir.join(".meta").join("meta.json"), b"{}").unwrap();
        std::fs::write(tasks.config.task_root.join("best"), "abc123").unwrap();

        tasks.update(None).unwrap();
        assert!(unpoison(tasks.index.read()).contains_key("abc123"));
        assert_eq!(unpoison(tasks.tags.read()).get("best"), Some(&"abc123".to_string()));
    }

    #[test]
    fn tag_lookup_precedes_prefix_search() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = Tasks::new(config(dir.path()));
        for id in ["ab1", "ab2"] {
            let task_dir = tasks.config.task_root.join(id);
            std::fs::create_dir_all(task_dir.join(".meta")).unwrap();
            std::fs::write(task_dir.join(".meta").join("meta.json"), b"{}").unwrap();
        }
        tasks.update(None).unwrap();
        tasks.tag("ab1", "ab").unwrap();

        let resolved = tasks.get("ab").unwrap();
        assert_eq!(resolved.id(), "ab1");
    }

    #[test]
    fn search_returns_ids_sharing_a_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = Tasks::new(config(dir.path()));
        for id in ["aa1", "aa2", "bb1"] {
            let task_dir = tasks.config.task_root.join(id);
            std::fs::create_dir_all(task_dir.join(".meta")).unwrap();
            std::fs::write(task_dir.join(".meta").join("meta.json"), b"{}").unwrap();
        }
        tasks.update(None).unwrap();
        let mut matches = tasks.search("aa");
        matches.sort();
        assert_eq!(matches, vec!["aa1".to_string(), "aa2".to_string()]);
    }
}
