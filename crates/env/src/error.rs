//! Error types for source materialization and the entry-point model.

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure modes raised by [`crate::materializer::Environment`] and
/// [`crate::entrypoint::EntryPoint`].
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during checkout/environment materialization.
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(code(tasklab::env::io))]
    Io {
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if any.
        path: Option<Box<Path>>,
        /// Operation being attempted (e.g. "create_dir_all", "clone").
        operation: String,
    },

    /// The remote could not be cloned or fetched.
    #[error("failed to clone {repository}: {message}")]
    #[diagnostic(code(tasklab::env::clone_failed))]
    CloneFailed {
        /// Repository URL.
        repository: String,
        /// Underlying failure description.
        message: String,
    },

    /// `commit_spec` could not be resolved against the remote.
    #[error("failed to resolve {commit_spec} against {repository}: {message}")]
    #[diagnostic(code(tasklab::env::resolve_failed))]
    ResolveFailed {
        /// Repository URL.
        repository: String,
        /// The symbolic ref or commit object name that failed to resolve.
        commit_spec: String,
        /// Underlying failure description.
        message: String,
    },

    /// `setup()` could not bootstrap the package environment.
    #[error("environment setup failed: {message}")]
    #[diagnostic(code(tasklab::env::setup_failed))]
    SetupFailed {
        /// Description of the failing step.
        message: String,
    },

    /// A lock could not be acquired within the requested timeout.
    #[error("timed out after {seconds}s waiting for lock at {}", path.display())]
    #[diagnostic(code(tasklab::env::lock_timeout))]
    LockTimeout {
        /// Path of the lock file.
        path: PathBuf,
        /// How long we waited.
        seconds: u64,
    },

    /// A required entry-point argument has no value and no default.
    #[error("missing required argument: {0}")]
    #[diagnostic(code(tasklab::env::argument_missing))]
    ArgumentMissing(String),

    /// An argument value could not be coerced to its declared type.
    #[error("argument {name} could not be coerced to {expected}: {value:?}")]
    #[diagnostic(code(tasklab::env::argument_invalid))]
    ArgumentInvalid {
        /// Argument name.
        name: String,
        /// The declared type.
        expected: &'static str,
        /// The raw value supplied.
        value: String,
    },

    /// Generic validation failure.
    #[error("{0}")]
    #[diagnostic(code(tasklab::env::validation))]
    Validation(String),
}

impl Error {
    /// Wrap an I/O error with the path and operation that triggered it.
    pub fn io(source: std::io::Error, path: impl Into<Option<PathBuf>>, operation: impl Into<String>) -> Self {
        Error::Io {
            source,
            path: path.into().map(Into::into),
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
