//! Argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// A key=value pair, parsed from a single CLI argument.
#[derive(Debug, Clone)]
pub struct Arg {
    /// Argument name.
    pub name: String,
    /// Raw string value, coerced later by the entry-point model.
    pub value: String,
}

impl std::str::FromStr for Arg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected name=value, got {s:?}"))?;
        Ok(Arg {
            name: name.to_string(),
            value: value.to_string(),
        })
    }
}

/// Local experiment-task orchestrator.
#[derive(Debug, Parser)]
#[command(name = "tasklab", version, about)]
pub struct Cli {
    /// Path to the config file (defaults to the platform config directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the task root directory.
    #[arg(long, global = true)]
    pub task_root: Option<PathBuf>,

    /// Override the shared cache root directory.
    #[arg(long, global = true)]
    pub cache_root: Option<PathBuf>,

    /// Emit machine-readable JSON instead of human-readable tables.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a task. Prints nothing on a deduplicated collision unless
    /// `--exist-ok` is given.
    Submit {
        /// `<repository_url>[#<ref>]`, or a configured source alias.
        source: String,
        /// Entry-point name.
        entrypoint: String,
        /// `name=value` entry-point arguments.
        args: Vec<Arg>,
        /// Return the existing task instead of `nil` on a hash collision.
        #[arg(long)]
        exist_ok: bool,
    },

    /// Run one task directly (not through the worker queue), waiting for
    /// its dependencies to resolve first.
    Run {
        /// Task id, tag, or unique id prefix.
        identifier: String,
        /// Stream the child process's output to this console.
        #[arg(long, default_value_t = true)]
        console: bool,
    },

    /// Start the worker queue and run until it is closed (Ctrl-C).
    Queue {
        /// Number of parallel workers.
        #[arg(short = 'n', long, default_value_t = 4)]
        workers: usize,
    },

    /// Point a tag at a task.
    Tag {
        /// Task id, tag, or unique id prefix.
        identifier: String,
        /// Tag name to create or repoint.
        tag: String,
    },

    /// Print one task's metadata as JSON.
    Get {
        /// Task id, tag, or unique id prefix.
        identifier: String,
    },

    /// List every known task.
    Ls,

    /// List tasks matching a filter expression.
    Query {
        /// Filter expression, e.g. `failed and @lr > 0.1`.
        filter: String,
    },

    /// Print a standalone shell script reproducing a run, without creating
    /// a task record.
    Export {
        /// `<repository_url>[#<ref>]`, or a configured source alias.
        source: String,
        /// Entry-point name.
        entrypoint: String,
        /// `name=value` entry-point arguments.
        args: Vec<Arg>,
    },

    /// Re-exec the interactive shell inside a materialized environment.
    Shell {
        /// `<repository_url>[#<ref>]`, or a configured source alias.
        source: String,
    },

    /// Clean up unreferenced checkout/environment cache entries.
    Gc {
        /// Report what would be removed without deleting anything.
        #[arg(long)]
        dry_run: bool,
        /// Minimum age in days before an unreferenced entry is eligible.
        #[arg(long)]
        max_age_days: Option<u32>,
    },
}
