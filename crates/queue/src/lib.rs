//! The worker queue: pulls ready tasks FIFO by creation order and dispatches
//! them to a fixed pool of parallel executors.
//!
//! `get()` is the single suspension point: it blocks until a pending task's
//! dependencies are satisfied, or until the queue is closed. Workers are N
//! identical consumers looping on `get()`; shutdown is closing the queue and
//! joining the workers, letting in-flight tasks run to completion.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tasklab_store::{Meta, Task, TaskStatus, Tasks};
use tokio_util::sync::CancellationToken;

/// How long [`Queue::get`] waits on the store between retries when nothing
/// is ready yet.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Failures raised while pulling from or dispatching through the queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The underlying task store reported a failure.
    #[error(transparent)]
    Store(#[from] tasklab_store::Error),
}

/// Result alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

fn order_by_created(a: &Meta, b: &Meta) -> Ordering {
    a.created.cmp(&b.created)
}

fn is_pending(meta: &Meta) -> bool {
    meta.status == TaskStatus::Pending
}

/// FIFO dispatcher over a [`Tasks`] catalog's pending work.
pub struct Queue {
    tasks: Arc<Tasks>,
    shutdown: CancellationToken,
}

impl Queue {
    /// Build a queue over the given catalog.
    #[must_use]
    pub fn new(tasks: Arc<Tasks>) -> Self {
        Self {
            tasks,
            shutdown: CancellationToken::new(),
        }
    }

    /// Block until a ready task is found, or the queue is closed.
    ///
    /// Returns `Some((task, dependencies))` for the oldest pending task whose
    /// dependencies already resolve, or `None` once [`Queue::close`] has been
    /// called and no further work will ever be handed out.
    pub async fn get(&self) -> Result<Option<(Task, Vec<Task>)>> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(None);
            }

            let pending = self
                .tasks
                .query(Some(&is_pending), Some(&order_by_created), false)?;

            for task in pending {
                if self.shutdown.is_cancelled() {
                    return Ok(None);
                }
                if let Some(deps) = self.tasks.dependencies(task.id(), false).await? {
                    return Ok(Some((task, deps)));
                }
            }

            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Ok(None),
                woke = self.tasks.wait(None, POLL_TIMEOUT) => {
                    woke?;
                    self.tasks.update(None)?;
                }
            }
        }
    }

    /// Release every blocked and future `get()` call with `None`.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Has [`Queue::close`] been called?
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Run `worker_count` identical consumers against `queue`, each looping on
/// [`Queue::get`] and executing `task.run(deps, console=false)` until the
/// queue closes. Returns once every worker has drained its in-flight task.
pub async fn run_workers(queue: Arc<Queue>, tasks: Arc<Tasks>, worker_count: usize) -> Result<()> {
    let mut handles = Vec::with_capacity(worker_count);

    for worker_id in 0..worker_count {
        let queue = Arc::clone(&queue);
        let tasks = Arc::clone(&tasks);
        handles.push(tokio::spawn(async move {
            loop {
                match queue.get().await {
                    Ok(Some((task, deps))) => {
                        let task_id = task.id().to_string();
                        match tasks.run(&task_id, &deps, false).await {
                            Ok(success) => {
                                tracing::info!(worker_id, task = %task_id, success, "task finished");
                            }
                            Err(err) => {
                                tracing::warn!(worker_id, task = %task_id, error = %err, "task run failed");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(worker_id, error = %err, "queue.get failed");
                        break;
                    }
                }
            }
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklab_store::StoreConfig;

    fn config(dir: &std::path::Path) -> StoreConfig {
        StoreConfig {
            task_root: dir.join("tasks"),
            cache_root: dir.join("cache"),
        }
    }

    #[tokio::test]
    async fn get_returns_none_after_close_with_no_pending_work() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = Arc::new(Tasks::new(config(dir.path())));
        tasks.update(None).unwrap();
        let queue = Arc::new(Queue::new(Arc::clone(&tasks)));

        queue.close();
        let result = queue.get().await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn close_unblocks_a_waiting_get() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = Arc::new(Tasks::new(config(dir.path())));
        tasks.update(None).unwrap();
        let queue = Arc::new(Queue::new(Arc::clone(&tasks)));

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };

        // Give the waiter a chance to enter its poll loop before closing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(10), waiter)
            .await
            .expect("get() did not unblock after close()")
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }
}
