//! Content-addressed task store: per-task metadata/log/artifacts, the
//! tasks collection and tagging, and the task lifecycle state machine
//! with crash recovery.

mod catalog;
mod error;
mod task;
mod task_store;
mod types;
mod watcher;

pub use catalog::{StoreConfig, Tasks};
pub use error::{Error, Result};
pub use task::Task;
pub use task_store::TaskStore;
pub use types::{DependencyMap, Meta, TaskStatus};
pub use watcher::Watcher;
