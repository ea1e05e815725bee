//! CLI-level error type with exit-code mapping.

use miette::Diagnostic;
use thiserror::Error;

/// Successful exit.
pub const EXIT_OK: i32 = 0;
/// Configuration or argument error.
pub const EXIT_CONFIG: i32 = 2;
/// The requested task or resource does not exist.
pub const EXIT_NOT_FOUND: i32 = 3;
/// Everything else: store/environment/filter failures.
pub const EXIT_OTHER: i32 = 1;
/// `SIGINT` (128 + signal number 2).
pub const EXIT_SIGINT: i32 = 130;

/// Top-level CLI error, carrying enough to pick an exit code and print a
/// diagnostic.
#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    /// Bad arguments or an unreadable/invalid config file.
    #[error("{0}")]
    #[diagnostic(code(tasklab::cli::config))]
    Config(String),

    /// The identifier/tag/prefix did not resolve to a task.
    #[error("no task matches {0:?}")]
    #[diagnostic(code(tasklab::cli::not_found))]
    NotFound(String),

    /// A task ran to completion but its process or a predecessor failed.
    #[error("{0}")]
    #[diagnostic(code(tasklab::cli::task_failed))]
    TaskFailed(String),

    /// The task store reported a failure.
    #[error(transparent)]
    #[diagnostic(code(tasklab::cli::store))]
    Store(#[from] tasklab_store::Error),

    /// The environment materializer reported a failure.
    #[error(transparent)]
    #[diagnostic(code(tasklab::cli::env))]
    Env(#[from] tasklab_env::Error),

    /// The worker queue reported a failure.
    #[error(transparent)]
    #[diagnostic(code(tasklab::cli::queue))]
    Queue(#[from] tasklab_queue::QueueError),

    /// The filter expression failed to compile.
    #[error(transparent)]
    #[diagnostic(code(tasklab::cli::filter))]
    Filter(#[from] tasklab_filter::FilterError),

    /// Config file or root-directory resolution failed.
    #[error(transparent)]
    #[diagnostic(code(tasklab::cli::config_io))]
    ConfigIo(#[from] crate::config::ConfigError),
}

impl CliError {
    /// Map this error to a process exit code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::Filter(_) | CliError::ConfigIo(_) => EXIT_CONFIG,
            CliError::NotFound(_) => EXIT_NOT_FOUND,
            CliError::TaskFailed(_) | CliError::Store(_) | CliError::Env(_) | CliError::Queue(_) => EXIT_OTHER,
        }
    }
}
