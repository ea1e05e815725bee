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
) -> Result<(), CliError> {
    let source = SourceRef::parse(config.resolve_source(source));
    let script = tasks.export(source, entrypoint, args).await?;
    println!("{script}");
    Ok(())
}
