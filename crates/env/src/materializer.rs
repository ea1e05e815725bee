//! The environment materializer: resolves a source reference to a local
//! checkout and builds its package environment under content-addressed
//! keys, serialised by two file locks (checkout cache, environment cache).

use crate::entrypoint::EntryPoint;
use crate::error::{Error, Result};
use crate::lock::FileLock;
use crate::source::{ResolvedSource, SourceRef};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Environment variables stripped from the parent process before a child
/// runs, so the sandboxed activation can't leak into/out of it.
const STRIPPED_VARS: &[&str] = &[
    "VIRTUAL_ENV",
    "CONDA_DEFAULT_ENV",
    "CONDA_PREFIX",
    "CONDA_SHLVL",
    "DISPLAY",
    "WAYLAND_DISPLAY",
];

const CONDA_SPEC_NAMES: &[&str] = &["conda.yaml", "conda.yml", "env.yml"];
const PIP_SPEC_NAMES: &[&str] = &["requirements.txt", "pip.txt"];
const SHELL_SPEC_NAMES: &[&str] = &["environment.sh", "env.sh", "install.sh", "setup.sh"];

fn first_existing(root: &Path, candidates: &[&str]) -> Option<PathBuf> {
    candidates.iter().map(|c| root.join(c)).find(|p| p.is_file())
}

fn read_conda_spec(root: &Path) -> Result<Option<Value>> {
    let Some(path) = first_existing(root, CONDA_SPEC_NAMES) else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(&path).map_err(|e| Error::io(e, Some(path.clone()), "read"))?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&text)
        .map_err(|e| Error::validation(format!("invalid conda spec {}: {e}", path.display())))?;
    let json = serde_json::to_value(yaml)
        .map_err(|e| Error::validation(format!("conda spec {} is not representable as JSON: {e}", path.display())))?;
    Ok(Some(json))
}

fn read_pip_spec(root: &Path) -> Result<Option<Vec<String>>> {
    let Some(path) = first_existing(root, PIP_SPEC_NAMES) else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(&path).map_err(|e| Error::io(e, Some(path), "read"))?;
    let lines: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    Ok(Some(lines))
}

/// Strip blank and comment-only lines before hashing the shell bootstrap.
fn strip_insignificant_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

fn read_shell_spec(root: &Path) -> Result<Option<String>> {
    let Some(path) = first_existing(root, SHELL_SPEC_NAMES) else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(&path).map_err(|e| Error::io(e, Some(path), "read"))?;
    Ok(Some(strip_insignificant_lines(&text)))
}

fn looks_like_commit_object_name(spec: &str) -> bool {
    spec.len() >= 7 && spec.len() <= 40 && spec.chars().all(|c| c.is_ascii_hexdigit())
}

fn repo_cache_key(repository: &str) -> String {
    tasklab_hash::hash_value(&json!({"repository": repository}))
}

/// Resolves a [`SourceRef`] to a local checkout and builds its named
/// package environment.
pub struct Environment {
    source: SourceRef,
    resolved: Option<ResolvedSource>,
    checkout_cache_root: PathBuf,
    env_cache_root: PathBuf,
}

impl Environment {
    /// Construct a materializer for `source`, rooted at the given shared
    /// caches (`<cache_root>/sources`, `<cache_root>/env`).
    #[must_use]
    pub fn new(source: SourceRef, checkout_cache_root: PathBuf, env_cache_root: PathBuf) -> Self {
        Self {
            source,
            resolved: None,
            checkout_cache_root,
            env_cache_root,
        }
    }

    /// The unresolved source reference this materializer was built from.
    #[must_use]
    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    /// Resolve `commit_spec` against the remote to a concrete object name.
    /// Idempotent: subsequent calls return the cached resolution.
    #[tracing::instrument(skip(self), fields(repository = %self.source.repository))]
    pub fn resolve(&mut self) -> Result<&ResolvedSource> {
        if self.resolved.is_none() {
            let commit = if looks_like_commit_object_name(&self.source.commit_spec) {
                self.source.commit_spec.clone()
            } else {
                self.resolve_ref_via_remote()?
            };
            self.resolved = Some(ResolvedSource {
                repository: self.source.repository.clone(),
                commit,
            });
        }
        Ok(self.resolved.as_ref().expect("just populated"))
    }

    /// Maintain a small bare mirror purely to answer "what does this
    /// symbolic ref point at" without doing a full checkout.
    fn resolve_ref_via_remote(&self) -> Result<String> {
        let mirror_dir = self
            .checkout_cache_root
            .join(".refs")
            .join(repo_cache_key(&self.source.repository));

        let repo = if mirror_dir.join("HEAD").exists() {
            gix::open(&mirror_dir).map_err(|e| Error::CloneFailed {
                repository: self.source.repository.clone(),
                message: e.to_string(),
            })?
        } else {
            std::fs::create_dir_all(&mirror_dir)
                .map_err(|e| Error::io(e, Some(mirror_dir.clone()), "create_dir_all"))?;
            gix::prepare_clone_bare(self.source.repository.as_str(), &mirror_dir)
                .and_then(|prep| prep.fetch_only(gix::progress::Discard, &std::sync::atomic::AtomicBool::new(false)))
                .map_err(|e| Error::CloneFailed {
                    repository: self.source.repository.clone(),
                    message: e.to_string(),
                })?
                .0
        };

        let remote_name = repo
            .remote_default_name(gix::remote::Direction::Fetch)
            .map(|n| n.to_string())
            .unwrap_or_else(|| "origin".to_string());
        let remote = repo
            .find_remote(remote_name.as_str())
            .map_err(|e| Error::ResolveFailed {
                repository: self.source.repository.clone(),
                commit_spec: self.source.commit_spec.clone(),
                message: e.to_string(),
            })?;
        let connection = remote
            .connect(gix::remote::Direction::Fetch)
            .map_err(|e| Error::ResolveFailed {
                repository: self.source.repository.clone(),
                commit_spec: self.source.commit_spec.clone(),
                message: e.to_string(),
            })?;
        let map = connection
            .ref_map(gix::progress::Discard, Default::default())
            .map_err(|e| Error::ResolveFailed {
                repository: self.source.repository.clone(),
                commit_spec: self.source.commit_spec.clone(),
                message: e.to_string(),
            })?;

        let wanted_suffix = format!("refs/heads/{}", self.source.commit_spec);
        for r in &map.remote_refs {
            if let Some((full, target, _)) = r.unpack() {
                let name = full.to_string();
                if name == wanted_suffix || name.ends_with(&format!("/{}", self.source.commit_spec)) {
                    if let Some(id) = target {
                        return Ok(id.to_string());
                    }
                }
            }
        }
        Err(Error::ResolveFailed {
            repository: self.source.repository.clone(),
            commit_spec: self.source.commit_spec.clone(),
            message: "no matching remote head".to_string(),
        })
    }

    /// Local checkout directory for the resolved source, cloning it if
    /// absent. Idempotent under concurrent callers via the sources lock.
    #[tracing::instrument(skip(self))]
    pub fn source_path(&mut self) -> Result<PathBuf> {
        let resolved = self.resolve()?.clone();
        let checkout_dir = self.checkout_cache_root.join(resolved.checkout_id());
        if checkout_dir.join(".git").exists() {
            return Ok(checkout_dir);
        }

        let mut lock = FileLock::new(self.checkout_cache_root.join(".lock"));
        lock.lock().map_err(|e| Error::io(e, Some(self.checkout_cache_root.clone()), "lock"))?;
        let result = (|| -> Result<()> {
            if checkout_dir.join(".git").exists() {
                return Ok(());
            }
            std::fs::create_dir_all(&checkout_dir)
                .map_err(|e| Error::io(e, Some(checkout_dir.clone()), "create_dir_all"))?;
            let (mut prepared, _) = gix::prepare_clone(resolved.repository.as_str(), &checkout_dir)
                .and_then(|p| p.fetch_then_checkout(gix::progress::Discard, &std::sync::atomic::AtomicBool::new(false)))
                .map_err(|e| Error::CloneFailed {
                    repository: resolved.repository.clone(),
                    message: e.to_string(),
                })?;
            prepared
                .main_worktree(gix::progress::Discard, &std::sync::atomic::AtomicBool::new(false))
                .map_err(|e| Error::CloneFailed {
                    repository: resolved.repository.clone(),
                    message: e.to_string(),
                })?;
            Ok(())
        })();
        let _ = lock.unlock();
        result.inspect_err(|_| {
            let _ = std::fs::remove_dir_all(&checkout_dir);
        })?;
        Ok(checkout_dir)
    }

    /// Canonical environment key from the checkout's well-known spec files.
    pub fn environment_id(&self, checkout_root: &Path) -> Result<String> {
        let mut spec = serde_json::Map::new();
        if let Some(v) = read_conda_spec(checkout_root)? {
            spec.insert("env".to_string(), v);
        }
        if let Some(v) = read_pip_spec(checkout_root)? {
            spec.insert("pip".to_string(), json!(v));
        }
        if let Some(v) = read_shell_spec(checkout_root)? {
            spec.insert("shell".to_string(), json!(v));
        }
        Ok(tasklab_hash::hash_value(&Value::Object(spec)))
    }

    fn env_dir(&self, env_id: &str) -> PathBuf {
        self.env_cache_root.join(env_id)
    }

    /// Ensure the named package environment exists: create it from the
    /// conda spec, install extra pip requirements, then run the shell
    /// bootstrap. Idempotent and safe under concurrent callers via the
    /// environments lock. A failed step removes the partial env directory.
    #[tracing::instrument(skip(self))]
    pub async fn setup(&self, checkout_root: &Path) -> Result<PathBuf> {
        let env_id = self.environment_id(checkout_root)?;
        let env_dir = self.env_dir(&env_id);
        if env_dir.join(".ready").is_file() {
            return Ok(env_dir);
        }

        let mut lock = FileLock::new(self.env_cache_root.join(".lock"));
        lock.lock().map_err(|e| Error::io(e, Some(self.env_cache_root.clone()), "lock"))?;
        let result = self.setup_locked(checkout_root, &env_dir).await;
        let _ = lock.unlock();
        result.inspect_err(|_| {
            let _ = std::fs::remove_dir_all(&env_dir);
        })?;
        Ok(env_dir)
    }

    async fn setup_locked(&self, checkout_root: &Path, env_dir: &Path) -> Result<()> {
        if env_dir.join(".ready").is_file() {
            return Ok(());
        }
        let manager = self.package_manager_binary().await?;

        if env_dir.join("bin").is_dir() {
            // A previous attempt left a partial env; start clean.
            std::fs::remove_dir_all(env_dir).map_err(|e| Error::io(e, Some(env_dir.into()), "remove_dir_all"))?;
        }

        let mut create_cmd = vec![manager.clone(), "create".into(), "-y".into(), "-p".into(), env_dir.display().to_string()];
        if let Some(conda_spec) = first_existing(checkout_root, CONDA_SPEC_NAMES) {
            create_cmd.push("-f".into());
            create_cmd.push(conda_spec.display().to_string());
        }
        run_bootstrap(&create_cmd, checkout_root)
            .await
            .map_err(|message| Error::SetupFailed { message })?;

        if let Some(pip_spec) = first_existing(checkout_root, PIP_SPEC_NAMES) {
            let pip_bin = env_dir.join("bin").join("pip");
            run_bootstrap(
                &[pip_bin.display().to_string(), "install".into(), "-r".into(), pip_spec.display().to_string()],
                checkout_root,
            )
            .await
            .map_err(|message| Error::SetupFailed { message })?;
        }

        if let Some(shell_spec) = first_existing(checkout_root, SHELL_SPEC_NAMES) {
            run_bootstrap(&["bash".into(), shell_spec.display().to_string()], checkout_root)
                .await
                .map_err(|message| Error::SetupFailed { message })?;
        }

        std::fs::write(env_dir.join(".ready"), b"")
            .map_err(|e| Error::io(e, Some(env_dir.into()), "write"))?;
        Ok(())
    }

    /// Locate a conda-compatible package manager: first on `PATH`, then in
    /// the shared binary cache, downloading a static `micromamba` build into
    /// that cache if neither is present.
    async fn package_manager_binary(&self) -> Result<String> {
        for candidate in ["micromamba", "mamba", "conda"] {
            if which_on_path(candidate).is_some() {
                return Ok(candidate.to_string());
            }
        }

        let cached = self.env_cache_root.join(".bin").join("micromamba");
        if cached.is_file() {
            return Ok(cached.display().to_string());
        }
        download_micromamba(&cached).await?;
        Ok(cached.display().to_string())
    }

    /// Sanitised environment variables for a child spawned inside `env_dir`.
    fn sanitized_vars(&self, checkout_root: &Path, env_dir: &Path, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut vars: BTreeMap<String, String> = std::env::vars()
            .filter(|(k, _)| !STRIPPED_VARS.contains(&k.as_str()))
            .collect();

        let bin_dir = env_dir.join("bin");
        let path = std::env::var("PATH").unwrap_or_default();
        vars.insert(
            "PATH".to_string(),
            format!("{}:{}", bin_dir.display(), path),
        );
        vars.insert("CONDA_PREFIX".to_string(), env_dir.display().to_string());
        vars.insert("MAMBA_ROOT_PREFIX".to_string(), self.env_cache_root.display().to_string());
        vars.insert("PYTHONPATH".to_string(), checkout_root.display().to_string());
        vars.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());

        for (k, v) in extra {
            vars.insert(k.clone(), v.clone());
        }
        vars
    }

    /// Spawn `argv[0] argv[1..]` inside the environment, `cwd` as the
    /// working directory. Every merged stdout+stderr line is fed to
    /// `on_line`. Returns whether the process exited successfully.
    #[tracing::instrument(skip(self, on_line))]
    pub async fn run(
        &self,
        argv: &[String],
        cwd: &Path,
        checkout_root: &Path,
        env_dir: &Path,
        extra_env: &BTreeMap<String, String>,
        mut on_line: impl FnMut(Option<&str>) + Send,
    ) -> Result<bool> {
        let Some((program, args)) = argv.split_first() else {
            return Err(Error::validation("empty command"));
        };
        let vars = self.sanitized_vars(checkout_root, env_dir, extra_env);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .env_clear()
            .envs(&vars)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| Error::io(e, None, "spawn"))?;
        let stdout = child.stdout.take().expect("piped");
        let stderr = child.stderr.take().expect("piped");

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let tx_out = tx.clone();
        let out_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx_out.send(line);
            }
        });
        let err_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx.send(line);
            }
        });

        // Drop the original sender once both readers are spawned so the
        // channel closes when both finish.
        drop(cmd);
        while let Some(line) = rx.recv().await {
            on_line(Some(&line));
        }
        let _ = tokio::join!(out_task, err_task);

        let status = child.wait().await.map_err(|e| Error::io(e, None, "wait"))?;
        on_line(None);
        Ok(status.success())
    }

    /// Build a standalone shell script that reproduces this environment
    /// and execs `argv`, for off-host execution.
    pub fn export(&self, argv: &[String], checkout_root: &Path, env_dir: &Path, extra_env: &BTreeMap<String, String>) -> String {
        let vars = self.sanitized_vars(checkout_root, env_dir, extra_env);
        let mut script = String::from("#!/usr/bin/env bash\nset -euo pipefail\n");
        for (k, v) in &vars {
            script.push_str(&format!("export {k}={}\n", shell_words::quote(v)));
        }
        script.push_str("exec ");
        script.push_str(&shell_words::join(argv.iter().map(String::as_str)));
        script.push('\n');
        script
    }

    /// Re-exec the user's interactive shell inside this environment,
    /// replacing the current process image. Never returns on success.
    #[cfg(unix)]
    pub fn shell(&self, checkout_root: &Path, env_dir: &Path) -> Result<std::convert::Infallible> {
        use std::os::unix::process::CommandExt;
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        let vars = self.sanitized_vars(checkout_root, env_dir, &BTreeMap::new());
        let err = std::process::Command::new(shell).env_clear().envs(&vars).exec();
        Err(Error::io(err, None, "exec"))
    }

    /// `setup()`, then read `entrypoints.(yaml|yml)` from the checkout —
    /// or, if a generator script is present, run it under the environment
    /// with its stdout captured to a cache file and parse that instead.
    /// Not memoised across environment rebuilds.
    #[tracing::instrument(skip(self))]
    pub async fn entrypoints(&self, checkout_root: &Path) -> Result<Vec<EntryPoint>> {
        let env_dir = self.setup(checkout_root).await?;

        let declared = ["entrypoints.yaml", "entrypoints.yml"]
            .iter()
            .map(|n| checkout_root.join(n))
            .find(|p| p.is_file());

        let yaml_text = if let Some(path) = declared {
            std::fs::read_to_string(&path).map_err(|e| Error::io(e, Some(path), "read"))?
        } else {
            let generator = checkout_root.join("entrypoints_gen.sh");
            if !generator.is_file() {
                return Ok(Vec::new());
            }
            let cache_file = self.env_cache_root.join(format!("{}.entrypoints.yaml", self.environment_id(checkout_root)?));
            let mut captured = String::new();
            self.run(
                &["bash".to_string(), generator.display().to_string()],
                checkout_root,
                checkout_root,
                &env_dir,
                &BTreeMap::new(),
                |line| {
                    if let Some(l) = line {
                        captured.push_str(l);
                        captured.push('\n');
                    }
                },
            )
            .await?;
            std::fs::write(&cache_file, &captured).map_err(|e| Error::io(e, Some(cache_file.clone()), "write"))?;
            captured
        };

        let parsed: Vec<EntryPoint> = serde_yaml::from_str(&yaml_text)
            .map_err(|e| Error::validation(format!("invalid entrypoints declaration: {e}")))?;
        Ok(parsed)
    }
}

async fn run_bootstrap(argv: &[String], cwd: &Path) -> std::result::Result<(), String> {
    let Some((program, args)) = argv.split_first() else {
        return Err("empty bootstrap command".to_string());
    };
    let status = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .status()
        .await
        .map_err(|e| format!("failed to spawn {program}: {e}"))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("{program} exited with {status}"))
    }
}

fn which_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).map(|dir| dir.join(name)).find(|p| p.is_file())
}

/// micromamba's release platform tag, e.g. `linux-64`, `osx-arm64`.
fn micromamba_platform() -> Result<&'static str> {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "x86_64") => Ok("linux-64"),
        ("linux", "aarch64") => Ok("linux-aarch64"),
        ("macos", "x86_64") => Ok("osx-64"),
        ("macos", "aarch64") => Ok("osx-arm64"),
        (os, arch) => Err(Error::SetupFailed {
            message: format!("no micromamba build available for {os}/{arch}"),
        }),
    }
}

/// Download micromamba's static release tarball and unpack `bin/micromamba`
/// into `dest`, leaving it executable.
async fn download_micromamba(dest: &Path) -> Result<()> {
    let platform = micromamba_platform()?;
    let url = format!("https://micro.mamba.pm/api/micromamba/{platform}/latest");

    let bytes = tokio::task::spawn_blocking(move || -> std::result::Result<Vec<u8>, String> {
        let response = reqwest::blocking::get(&url).map_err(|e| format!("GET {url} failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("GET {url} returned {}", response.status()));
        }
        Ok(response.bytes().map_err(|e| format!("reading response body from {url} failed: {e}"))?.to_vec())
    })
    .await
    .map_err(|e| Error::SetupFailed { message: format!("download task panicked: {e}") })?
    .map_err(|message| Error::SetupFailed { message })?;

    let parent = dest.parent().expect("cache path always has a parent");
    std::fs::create_dir_all(parent).map_err(|e| Error::io(e, Some(parent.into()), "create_dir_all"))?;

    let archive = parent.join("micromamba.tar.bz2");
    std::fs::write(&archive, &bytes).map_err(|e| Error::io(e, Some(archive.clone()), "write"))?;

    let output = Command::new("tar")
        .args(["-xjf", &archive.display().to_string(), "-O", "bin/micromamba"])
        .output()
        .await
        .map_err(|e| Error::SetupFailed { message: format!("failed to spawn tar: {e}") })?;
    let _ = std::fs::remove_file(&archive);
    if !output.status.success() {
        return Err(Error::SetupFailed {
            message: format!("tar extraction of micromamba failed: {}", String::from_utf8_lossy(&output.stderr)),
        });
    }

    std::fs::write(dest, &output.stdout).map_err(|e| Error::io(e, Some(dest.into()), "write"))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(dest).map_err(|e| Error::io(e, Some(dest.into()), "metadata"))?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(dest, perms).map_err(|e| Error::io(e, Some(dest.into()), "set_permissions"))?;
    }

    Ok(())
}

/// Wait up to `timeout` for a predicate to become true, polling. Used by
/// callers that need to block on materializer side effects (e.g. env
/// readiness) without a notification channel.
pub async fn poll_until(mut predicate: impl FnMut() -> bool, timeout: Duration, interval: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_id_is_stable_under_key_permutation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("conda.yaml"), "name: x\ndependencies:\n  - python=3.11\n  - b\n").unwrap();
        let env = Environment::new(
            SourceRef::parse("https://example.com/r.git"),
            dir.path().join("sources"),
            dir.path().join("env"),
        );
        let id1 = env.environment_id(dir.path()).unwrap();

        let dir2 = tempfile::tempdir().unwrap();
        std::fs::write(dir2.path().join("conda.yaml"), "dependencies:\n  - b\n  - python=3.11\nname: x\n").unwrap();
        let id2 = env.environment_id(dir2.path()).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn missing_spec_files_are_omitted_not_null() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::new(
            SourceRef::parse("https://example.com/r.git"),
            dir.path().join("sources"),
            dir.path().join("env"),
        );
        let id_empty = env.environment_id(dir.path()).unwrap();
        assert_eq!(id_empty, tasklab_hash::hash_value(&json!({})));
    }

    #[test]
    fn shell_spec_strips_comments_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("setup.sh"), "# a comment\n\nexport X=1\n  \n").unwrap();
        let env = Environment::new(
            SourceRef::parse("https://example.com/r.git"),
            dir.path().join("sources"),
            dir.path().join("env"),
        );
        let with_comment = env.environment_id(dir.path()).unwrap();

        let dir2 = tempfile::tempdir().unwrap();
        std::fs::write(dir2.path().join("setup.sh"), "export X=1\n").unwrap();
        let without_comment = env.environment_id(dir2.path()).unwrap();
        assert_eq!(with_comment, without_comment);
    }
}
