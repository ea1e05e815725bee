//! Configuration file loading and cache/task-root resolution.
//!
//! Resolution order for each root (first writable wins), mirroring the
//! fallback chain a local orchestrator needs when `$HOME` is absent (CI
//! containers, sandboxes):
//! 1. Explicit CLI flag.
//! 2. `TASKLAB_TASK_ROOT` / `TASKLAB_CACHE_ROOT` environment variable.
//! 3. The config file's `task_root` / `cache_root` entry.
//! 4. `$XDG_DATA_HOME/tasklab` (tasks) / `$XDG_CACHE_HOME/tasklab` (cache).
//! 5. `~/.tasklab/{tasks,cache}`.
//! 6. `$TMPDIR/tasklab/{tasks,cache}` as a last resort.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failures loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but is not valid TOML.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path to the offending file.
        path: PathBuf,
        /// Underlying parse failure.
        #[source]
        source: toml::de::Error,
    },
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path to the offending file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// No writable location could be found for a root directory.
    #[error("could not find a writable directory for {0}")]
    NoWritableRoot(&'static str),
}

/// A named notification channel (email / file / console), declared in the
/// config file and referenced by name from the CLI.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NotificationChannel {
    /// Append a line to a file on every terminal status change.
    File {
        /// Destination file.
        path: PathBuf,
    },
    /// Send an email via a local `sendmail`-compatible command.
    Email {
        /// Recipient address.
        to: String,
    },
    /// Print to the orchestrator's own console.
    Console,
}

/// A source alias: a short name standing in for a repository URL, so
/// `tasklab submit myservice:train ...` can be written instead of the full
/// git URL.
pub type SourceAliases = BTreeMap<String, String>;

/// On-disk configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    /// Root directory for task records and tags.
    pub task_root: Option<PathBuf>,
    /// Root directory for the shared checkout/env/runtime caches.
    pub cache_root: Option<PathBuf>,
    /// Repository URL aliases.
    #[serde(default)]
    pub sources: SourceAliases,
    /// Named notification channels.
    #[serde(default)]
    pub notifications: BTreeMap<String, NotificationChannel>,
    /// Default number of parallel queue workers.
    pub workers: Option<usize>,
}

impl ConfigFile {
    /// Load `path`, or fall back to an empty (all-default) configuration if
    /// it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Resolve a source spec through the alias table; returns the input
    /// unchanged when it is not a known alias.
    #[must_use]
    pub fn resolve_source<'a>(&'a self, spec: &'a str) -> &'a str {
        self.sources.get(spec).map_or(spec, String::as_str)
    }
}

fn writable(path: &Path) -> bool {
    if path.exists() {
        let probe = path.join(".write_probe");
        let ok = std::fs::write(&probe, b"").is_ok();
        let _ = std::fs::remove_file(&probe);
        ok
    } else {
        std::fs::create_dir_all(path).is_ok()
    }
}

fn first_writable(candidates: Vec<PathBuf>, what: &'static str) -> Result<PathBuf, ConfigError> {
    for candidate in candidates {
        if writable(&candidate) {
            return Ok(candidate);
        }
    }
    Err(ConfigError::NoWritableRoot(what))
}

/// Resolve the task root directory.
pub fn task_root(cli_override: Option<PathBuf>, config: &ConfigFile) -> Result<PathBuf, ConfigError> {
    if let Some(path) = cli_override {
        return Ok(path);
    }
    if let Ok(env) = std::env::var("TASKLAB_TASK_ROOT") {
        if !env.trim().is_empty() {
            return Ok(PathBuf::from(env));
        }
    }
    if let Some(path) = &config.task_root {
        return Ok(path.clone());
    }

    let mut candidates = Vec::new();
    if let Some(data) = dirs::data_dir() {
        candidates.push(data.join("tasklab").join("tasks"));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".tasklab").join("tasks"));
    }
    candidates.push(std::env::temp_dir().join("tasklab").join("tasks"));
    first_writable(candidates, "task_root")
}

/// Resolve the cache root directory.
pub fn cache_root(cli_override: Option<PathBuf>, config: &ConfigFile) -> Result<PathBuf, ConfigError> {
    if let Some(path) = cli_override {
        return Ok(path);
    }
    if let Ok(env) = std::env::var("TASKLAB_CACHE_ROOT") {
        if !env.trim().is_empty() {
            return Ok(PathBuf::from(env));
        }
    }
    if let Some(path) = &config.cache_root {
        return Ok(path.clone());
    }

    let mut candidates = Vec::new();
    if let Some(cache) = dirs::cache_dir() {
        candidates.push(cache.join("tasklab"));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".tasklab").join("cache"));
    }
    candidates.push(std::env::temp_dir().join("tasklab").join("cache"));
    first_writable(candidates, "cache_root")
}

/// Default config file path: `$XDG_CONFIG_HOME/tasklab/config.toml`, falling
/// back to `~/.config/tasklab/config.toml`.
#[must_use]
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tasklab")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigFile::load(&dir.path().join("nope.toml")).unwrap();
        assert!(config.task_root.is_none());
        assert!(config.sources.is_empty());
    }

    #[test]
    fn resolve_source_falls_back_to_input() {
        let mut config = ConfigFile::default();
        config.sources.insert("demo".to_string(), "https://example.com/demo.git".to_string());
        assert_eq!(config.resolve_source("demo"), "https://example.com/demo.git");
        assert_eq!(config.resolve_source("https://other"), "https://other");
    }

    #[test]
    fn explicit_override_wins_over_everything() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigFile::default();
        let resolved = task_root(Some(dir.path().to_path_buf()), &config).unwrap();
        assert_eq!(resolved, dir.path());
    }
}
