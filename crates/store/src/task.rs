//! A lightweight handle onto one task's on-disk store.
//!
//! `Task` carries only an id and a task directory; it does not hold a
//! back-reference to the owning [`crate::catalog::Tasks`] catalog, so
//! opening one is just a path join — no lock, no I/O. Catalog-level
//! operations (tagging, dependency resolution, `run`) live on `Tasks`
//! itself and take a task id.

use crate::error::Result;
use crate::task_store::TaskStore;
use crate::types::{Meta, TaskStatus};
use std::path::{Path, PathBuf};

/// A task: an id plus its per-task store.
pub struct Task {
    id: String,
    store: TaskStore,
}

impl Task {
    /// Open the task rooted at `task_dir` under `id`. Does not touch disk.
    #[must_use]
    pub fn open(id: impl Into<String>, task_dir: PathBuf) -> Self {
        Self {
            id: id.into(),
            store: TaskStore::new(task_dir),
        }
    }

    /// This task's content-addressed identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Root directory of this task.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.store.task_dir()
    }

    /// The per-task key/value/log store.
    #[must_use]
    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Current metadata document.
    pub fn meta(&self) -> Result<Meta> {
        self.store.meta()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> Result<TaskStatus> {
        Ok(self.store.meta()?.status)
    }
}
