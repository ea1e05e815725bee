//! Cross-crate lifecycle scenarios: task creation through a real checkout
//! and package-manager stub, and crash-recovery restore.

use chrono::Utc;
use std::collections::BTreeMap;
use std::process::Command;
use std::sync::Mutex;
use tasklab_env::SourceRef;
use tasklab_store::{Meta, StoreConfig, TaskStatus, TaskStore, Tasks};

// `package_manager_binary` and `which_on_path` both read the process-wide
// `PATH` variable, so any test that stubs a package manager must not run
// concurrently with another one doing the same.
static PATH_LOCK: Mutex<()> = Mutex::new(());

fn git(args: &[&str], cwd: &std::path::Path) {
    let status = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .status()
        .expect("failed to spawn git");
    assert!(status.success(), "git {args:?} failed");
}

/// A bare-bones git checkout with a single no-argument entry point and no
/// conda/pip/shell spec, so `Environment::setup` never needs to actually
/// invoke the stubbed package manager binary.
fn init_fixture_repo(dir: &std::path::Path) {
    git(&["init", "-q"], dir);
    git(&["config", "user.email", "test@example.com"], dir);
    git(&["config", "user.name", "Test User"], dir);
    std::fs::write(
        dir.join("entrypoints.yaml"),
        "- name: hello\n  command: \"echo hello\"\n  arguments: {}\n  environment: {}\n  observers: []\n  artifacts: []\n",
    )
    .unwrap();
    git(&["add", "."], dir);
    git(&["commit", "-q", "-m", "init"], dir);
}

/// Prepend a directory holding a fake `conda` binary to `PATH`, so
/// `Environment::setup` resolves a package manager without touching the
/// network. Returns a guard that restores the previous `PATH` on drop.
struct FakePathGuard {
    previous: Option<std::ffi::OsString>,
}

impl Drop for FakePathGuard {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(p) => std::env::set_var("PATH", p),
            None => std::env::remove_var("PATH"),
        }
    }
}

fn with_fake_package_manager(bin_dir: &std::path::Path) -> FakePathGuard {
    let fake = bin_dir.join("conda");
    std::fs::write(&fake, "#!/bin/sh\nexit 0\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    let previous = std::env::var_os("PATH");
    let mut paths = vec![bin_dir.to_path_buf()];
    if let Some(p) = &previous {
        paths.extend(std::env::split_paths(p));
    }
    std::env::set_var("PATH", std::env::join_paths(paths).unwrap());
    FakePathGuard { previous }
}

#[tokio::test]
async fn create_run_complete_end_to_end() {
    let _guard = PATH_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let repo_dir = tempfile::tempdir().unwrap();
    init_fixture_repo(repo_dir.path());

    let bin_dir = tempfile::tempdir().unwrap();
    let _path_guard = with_fake_package_manager(bin_dir.path());

    let root = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        task_root: root.path().join("tasks"),
        cache_root: root.path().join("cache"),
    };
    let tasks = Tasks::new(config);
    tasks.update(None).unwrap();

    let source = SourceRef::parse(&format!("{}#master", repo_dir.path().display()));
    let task = tasks
        .create(source, "hello", BTreeMap::new(), false)
        .await
        .unwrap()
        .expect("task should be newly created");
    assert_eq!(task.status().unwrap(), TaskStatus::Pending);

    let completed = tasks.run(task.id(), &[], false).await.unwrap();
    assert!(completed, "hello entry point exits zero");
    assert_eq!(task.status().unwrap(), TaskStatus::Complete);

    // Re-running a completed task is a no-op that reports its terminal status.
    let rerun = tasks.run(task.id(), &[], false).await.unwrap();
    assert!(rerun);
}

#[test]
fn restore_downgrades_stale_running_task_to_pending() {
    let root = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        task_root: root.path().join("tasks"),
        cache_root: root.path().join("cache"),
    };

    let task_id = "abc123";
    let task_dir = config.task_root.join(task_id);
    let store = TaskStore::new(task_dir);
    let now = Utc::now();
    store
        .write_meta(&Meta {
            status: TaskStatus::Running,
            created: now,
            updated: now,
            repository: "https://example.com/r.git".to_string(),
            commit: "deadbeef".to_string(),
            entrypoint: "hello".to_string(),
            arguments: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            command: vec!["echo".to_string(), "hello".to_string()],
            environment: BTreeMap::new(),
            properties: BTreeMap::new(),
        })
        .unwrap();

    let tasks = Tasks::new(config);
    tasks.update(None).unwrap();

    // No other process holds the runlock, so it's acquirable: this task
    // was left `running` by a crash, not a live run, and must downgrade.
    tasks.restore().unwrap();

    let task = tasks.get(task_id).expect("task should be indexed");
    assert_eq!(task.status().unwrap(), TaskStatus::Pending);
}
