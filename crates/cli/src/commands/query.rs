use crate::error::CliError;
use crate::render;
use tasklab_filter::{Filter, TaskClaims};
use tasklab_store::Tasks;

pub fn run(tasks: &Tasks, expression: &str, json: bool) -> Result<(), CliError> {
    let filter = Filter::compile(expression)?;

    let order = |a: &tasklab_store::Meta, b: &tasklab_store::Meta| a.created.cmp(&b.created);
    let candidates = tasks.query(None, Some(&order), false)?;

    let mut rows = Vec::new();
    for task in candidates {
        let meta = task.meta()?;
        let claims = TaskClaims::new(&task, &meta, tasks);
        if filter.matches(&claims) {
            rows.push((task, meta));
        }
    }

    if json {
        let values: Vec<_> = rows.iter().map(|(t, m)| render::meta_json(t, m)).collect();
        println!("{}", serde_json::to_string_pretty(&values).expect("json"));
    } else {
        render::table(&rows);
    }
    Ok(())
}
