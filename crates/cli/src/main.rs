//! Entry point: parse arguments, wire up the store, dispatch to a command.

mod cli;
mod commands;
mod config;
mod error;
mod render;

use clap::Parser;
use cli::Cli;
use error::{CliError, EXIT_OK, EXIT_SIGINT};
use std::sync::Arc;
use tasklab_store::{StoreConfig, Tasks};

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("tasklab=info".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    // The worker queue closes and drains on its own Ctrl-C handler;
    // racing a second Ctrl-C here would cut in-flight tasks off mid-run.
    // Every other command gets an immediate interrupt.
    let is_queue = matches!(args.command, cli::Commands::Queue { .. });

    let code = if is_queue {
        run(args).await
    } else {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupted");
                EXIT_SIGINT
            }
            code = run(args) => code,
        }
    };
    std::process::exit(code);
}

async fn run(args: Cli) -> i32 {
    match dispatch(args).await {
        Ok(()) => EXIT_OK,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    }
}

async fn dispatch(args: Cli) -> Result<(), CliError> {
    let config_path = args.config.clone().unwrap_or_else(config::default_config_path);
    let config_file = config::ConfigFile::load(&config_path)?;

    let task_root = config::task_root(args.task_root.clone(), &config_file)?;
    let cache_root = config::cache_root(args.cache_root.clone(), &config_file)?;

    let store_config = StoreConfig { task_root, cache_root };
    let tasks = Arc::new(Tasks::new(store_config));
    tasks.update(None)?;
    tasks.restore()?;

    commands::dispatch(args.command, &tasks, &config_file, args.json).await
}
