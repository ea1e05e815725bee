use crate::error::CliError;
use std::sync::Arc;
use tasklab_queue::Queue;
use tasklab_store::Tasks;

pub async fn run(tasks: &Arc<Tasks>, workers: usize) -> Result<(), CliError> {
    let queue = Arc::new(Queue::new(Arc::clone(tasks)));
    let closer = Arc::clone(&queue);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down worker queue");
            closer.close();
        }
    });

    tasklab_queue::run_workers(queue, Arc::clone(tasks), workers).await?;
    Ok(())
}
