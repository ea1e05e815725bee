//! Command handlers, one module per subcommand.

mod export;
mod gc;
mod get;
mod ls;
mod query;
mod queue;
mod run;
mod shell;
mod submit;
mod tag;

use crate::cli::{Arg, Commands};
use crate::config::ConfigFile;
use crate::error::CliError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tasklab_store::Tasks;

fn args_to_map(args: Vec<Arg>) -> BTreeMap<String, String> {
    args.into_iter().map(|a| (a.name, a.value)).collect()
}

/// Resolve an identifier (id, tag, or unique id prefix) to a task, or a
/// [`CliError::NotFound`].
fn resolve(tasks: &Tasks, identifier: &str) -> Result<tasklab_store::Task, CliError> {
    tasks.get(identifier).ok_or_else(|| CliError::NotFound(identifier.to_string()))
}

pub async fn dispatch(command: Commands, tasks: &Arc<Tasks>, config: &ConfigFile, json: bool) -> Result<(), CliError> {
    match command {
        Commands::Submit { source, entrypoint, args, exist_ok } => {
            submit::run(tasks, config, &source, &entrypoint, args_to_map(args), exist_ok, json).await
        }
        Commands::Run { identifier, console } => run::run(tasks, &identifier, console).await,
        Commands::Queue { workers } => queue::run(tasks, workers).await,
        Commands::Tag { identifier, tag } => tag::run(tasks, &identifier, &tag),
        Commands::Get { identifier } => get::run(tasks, &identifier, json),
        Commands::Ls => ls::run(tasks, json),
        Commands::Query { filter } => query::run(tasks, &filter, json),
        Commands::Export { source, entrypoint, args } => export::run(tasks, config, &source, &entrypoint, args_to_map(args)).await,
        Commands::Shell { source } => shell::run(tasks, config, &source).await,
        Commands::Gc { dry_run, max_age_days } => gc::run(tasks, dry_run, max_age_days),
    }
}
