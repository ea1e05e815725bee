use crate::commands::resolve;
use crate::error::CliError;
use tasklab_store::Tasks;

pub async fn run(tasks: &Tasks, identifier: &str, console: bool) -> Result<(), CliError> {
    let task = resolve(tasks, identifier)?;

    let Some(deps) = tasks.dependencies(task.id(), true).await? else {
        return Err(CliError::TaskFailed(format!(
            "{}: a predecessor task is missing or failed",
            task.id()
        )));
    };

    let success = tasks.run(task.id(), &deps, console).await?;
    if success {
        println!("{}: complete", task.id());
        Ok(())
    } else {
        Err(CliError::TaskFailed(format!("{}: failed", task.id())))
    }
}
