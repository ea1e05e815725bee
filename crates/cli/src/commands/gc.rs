use crate::error::CliError;
use std::collections::HashSet;
use std::time::Duration;
use tasklab_env::{Environment, SourceRef};
use tasklab_store::Tasks;

pub fn run(tasks: &Tasks, dry_run: bool, max_age_days: Option<u32>) -> Result<(), CliError> {
    let max_age = max_age_days.map(|days| Duration::from_secs(u64::from(days) * 24 * 60 * 60));
    let config = tasks.config().clone();

    let mut live_checkouts = HashSet::new();
    let mut live_envs = HashSet::new();
    for task in tasks.query(None, None, false)? {
        let meta = task.meta()?;
        let source = SourceRef {
            repository: meta.repository.clone(),
            commit_spec: meta.commit.clone(),
        };
        let mut env = Environment::new(source, config.checkout_cache_root(), config.env_cache_root());
        let Ok(resolved) = env.resolve().map(Clone::clone) else { continue };
        live_checkouts.insert(resolved.checkout_id());

        if let Ok(checkout_root) = env.source_path() {
            if let Ok(env_id) = env.environment_id(&checkout_root) {
                live_envs.insert(env_id);
            }
        }
    }

    let checkout_report = tasklab_env::gc(&config.checkout_cache_root(), &live_checkouts, max_age, dry_run)?;
    let env_report = tasklab_env::gc(&config.env_cache_root(), &live_envs, max_age, dry_run)?;

    for removed in checkout_report.removed.iter().chain(env_report.removed.iter()) {
        println!("removed {removed}");
    }
    println!(
        "checkouts: {} scanned, {} removed, {} retained, {} busy",
        checkout_report.scanned, checkout_report.removed.len(), checkout_report.retained, checkout_report.busy,
    );
    println!(
        "environments: {} scanned, {} removed, {} retained, {} busy",
        env_report.scanned, env_report.removed.len(), env_report.retained, env_report.busy,
    );
    Ok(())
}
