use crate::commands::resolve;
use crate::error::CliError;
use tasklab_store::Tasks;

pub fn run(tasks: &Tasks, identifier: &str, tag: &str) -> Result<(), CliError> {
    let task = resolve(tasks, identifier)?;
    tasks.tag(task.id(), tag)?;
    println!("{tag} -> {}", task.id());
    Ok(())
}
