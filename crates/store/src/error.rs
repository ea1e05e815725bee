//! Error types for the task store, catalog, and lifecycle.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Failure modes raised across this crate.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error against the task store's on-disk layout.
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(code(tasklab::store::io))]
    Io {
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if any.
        path: Option<PathBuf>,
        /// Operation being attempted.
        operation: String,
    },

    /// Metadata document failed to parse.
    #[error("malformed metadata at {}: {message}", path.display())]
    #[diagnostic(code(tasklab::store::malformed_meta))]
    MalformedMeta {
        /// Path of the offending `meta.json`.
        path: PathBuf,
        /// Parse failure description.
        message: String,
    },

    /// A relative path escaped the task directory.
    #[error("path {0:?} is not relative to the task directory")]
    #[diagnostic(code(tasklab::store::path_escape))]
    PathEscape(PathBuf),

    /// An identifier, tag, or prefix did not resolve to any task.
    #[error("unknown task: {0}")]
    #[diagnostic(code(tasklab::store::unknown_task))]
    UnknownTask(String),

    /// A prefix or tag matched more than one task.
    #[error("ambiguous identifier: {0}")]
    #[diagnostic(code(tasklab::store::ambiguous_identifier))]
    AmbiguousIdentifier(String),

    /// The named entry point does not exist in the source tree.
    #[error("entry point not found: {0}")]
    #[diagnostic(code(tasklab::store::entrypoint_missing))]
    EntrypointMissing(String),

    /// `dependencies()` could not resolve every predecessor.
    #[error("dependency unresolved for task {0}")]
    #[diagnostic(code(tasklab::store::dependency_unresolved))]
    DependencyUnresolved(String),

    /// Staging a predecessor's artifact as a run-directory symlink failed.
    #[error("failed to stage {resource} from {predecessor}: {message}")]
    #[diagnostic(code(tasklab::store::file_staging_failed))]
    FileStagingFailed {
        /// Predecessor task id.
        predecessor: String,
        /// Resource (argument name or filename) being staged.
        resource: String,
        /// Underlying failure description.
        message: String,
    },

    /// The environment materializer failed during `setup()`.
    #[error("environment setup failed for task {task}: {source}")]
    #[diagnostic(code(tasklab::store::environment_failed))]
    EnvironmentFailed {
        /// Task id.
        task: String,
        /// Underlying materializer error.
        #[source]
        source: tasklab_env::Error,
    },

    /// The child process exited non-zero.
    #[error("task {task} exited non-zero")]
    #[diagnostic(code(tasklab::store::child_non_zero))]
    ChildNonZero {
        /// Task id.
        task: String,
    },

    /// Argument coercion/merge failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Argument(#[from] tasklab_env::Error),

    /// Removal was attempted on a task in `preparing`/`running` without `force`.
    #[error("task {0} is preparing/running; pass force to remove it")]
    #[diagnostic(code(tasklab::store::busy))]
    Busy(String),

    /// Generic validation failure.
    #[error("{0}")]
    #[diagnostic(code(tasklab::store::validation))]
    Validation(String),
}

impl Error {
    /// Wrap an I/O error with the path and operation that triggered it.
    pub fn io(source: std::io::Error, path: impl Into<Option<PathBuf>>, operation: impl Into<String>) -> Self {
        Error::Io {
            source,
            path: path.into(),
            operation: operation.into(),
        }
    }

    /// Build a [`Error::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
