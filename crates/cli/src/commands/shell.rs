use crate::config::ConfigFile;
use crate::error::CliError;
use tasklab_env::{Environment, SourceRef};
use tasklab_store::Tasks;

pub async fn run(tasks: &Tasks, config: &ConfigFile, source: &str) -> Result<(), CliError> {
    let source = SourceRef::parse(config.resolve_source(source));
    let store_config = tasks.config();
    let mut env = Environment::new(source, store_config.checkout_cache_root(), store_config.env_cache_root());

    env.resolve()?;
    let checkout_root = env.source_path()?;
    let env_dir = env.setup(&checkout_root).await?;

    // Replaces the current process image; only returns on failure to exec.
    env.shell(&checkout_root, &env_dir)?;
    Ok(())
}
