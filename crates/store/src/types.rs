//! Task metadata and the lifecycle status enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Lifecycle status of a task. See the state diagram in the lifecycle module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// No record, or record not yet observed.
    Unknown,
    /// Created, not yet run.
    Pending,
    /// Dependencies staged, environment being bootstrapped.
    Preparing,
    /// Child process spawned.
    Running,
    /// Child exited zero; artifacts persisted.
    Complete,
    /// Child exited non-zero, or a prior step failed.
    Failed,
    /// Set by explicit external action only; terminal.
    Archived,
}

impl TaskStatus {
    /// `complete` and `archived` never transition except via explicit reset.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Archived)
    }
}

/// `{predecessor_task_id → sorted list of resource names}`, part of task
/// identity. Resource names are either predecessor argument names
/// (substituted by value) or filenames (staged as a symlink at run time).
pub type DependencyMap = BTreeMap<String, Vec<String>>;

/// The mutable metadata document at `.meta/meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last-transition timestamp; `transitions out of running MUST bump this`.
    pub updated: DateTime<Utc>,
    /// Repository URL.
    pub repository: String,
    /// Resolved commit object name.
    pub commit: String,
    /// Entry-point name.
    pub entrypoint: String,
    /// Coerced, merged argument values (insignificant included).
    pub arguments: BTreeMap<String, Value>,
    /// Dependency map, part of task identity.
    pub dependencies: DependencyMap,
    /// Expanded command (post-template, post-tokenisation).
    pub command: Vec<String>,
    /// Fixed environment variables for the entry point's process.
    pub environment: BTreeMap<String, String>,
    /// Free-form user properties, set via `Task::set`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

impl Meta {
    /// Bump `updated` to now. Every status transition out of `running` (and
    /// every property write) must call this.
    pub fn touch(&mut self) {
        self.updated = Utc::now();
    }
}
