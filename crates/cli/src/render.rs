//! Human-readable and JSON rendering for task listings.

use tasklab_store::{Meta, Task, TaskStatus};

fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Unknown => "unknown",
        TaskStatus::Pending => "pending",
        TaskStatus::Preparing => "preparing",
        TaskStatus::Running => "running",
        TaskStatus::Complete => "complete",
        TaskStatus::Failed => "failed",
        TaskStatus::Archived => "archived",
    }
}

/// One row per task: id (truncated), status, entrypoint, created timestamp.
pub fn table(rows: &[(Task, Meta)]) {
    if rows.is_empty() {
        println!("(no tasks)");
        return;
    }
    println!("{:<12} {:<10} {:<20} {:<24} COMMIT", "ID", "STATUS", "ENTRYPOINT", "CREATED");
    for (task, meta) in rows {
        println!(
            "{:<12} {:<10} {:<20} {:<24} {}",
            &task.id()[..12.min(task.id().len())],
            status_label(meta.status),
            meta.entrypoint,
            meta.created.to_rfc3339(),
            &meta.commit[..meta.commit.len().min(12)],
        );
    }
}

/// One task's metadata, pretty-printed as JSON.
pub fn meta_json(task: &Task, meta: &Meta) -> serde_json::Value {
    serde_json::json!({
        "id": task.id(),
        "status": status_label(meta.status),
        "created": meta.created.to_rfc3339(),
        "updated": meta.updated.to_rfc3339(),
        "repository": meta.repository,
        "commit": meta.commit,
        "entrypoint": meta.entrypoint,
        "arguments": meta.arguments,
        "dependencies": meta.dependencies,
        "properties": meta.properties,
    })
}
