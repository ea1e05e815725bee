use crate::config::ConfigFile;
use crate::error::CliError;
use std::collections::BTreeMap;
use tasklab_env::SourceRef;
use tasklab_store::Tasks;

pub async fn run(
    tasks: &Tasks,
    config: &ConfigFile,
    source: &str,
    entrypoint: &str,
    args: BTreeMap<String, String>,
    exist_ok: bool,
    json: bool,
) -> Result<(), CliError> {
    let source = SourceRef::parse(config.resolve_source(source));
    match tasks.create(source, entrypoint, args, exist_ok).await? {
        Some(task) => {
            if json {
                println!("{}", serde_json::json!({ "id": task.id() }));
            } else {
                println!("{}", task.id());
            }
            Ok(())
        }
        None => Err(CliError::Config(
            "a task with this identity already exists; rerun with --exist-ok to reuse it".to_string(),
        )),
    }
}
