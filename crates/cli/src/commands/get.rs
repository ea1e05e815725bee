use crate::commands::resolve;
use crate::error::CliError;
use crate::render;
use tasklab_store::Tasks;

pub fn run(tasks: &Tasks, identifier: &str, json: bool) -> Result<(), CliError> {
    let task = resolve(tasks, identifier)?;
    let meta = task.meta()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&render::meta_json(&task, &meta)).expect("json"));
    } else {
        render::table(&[(task, meta)]);
    }
    Ok(())
}
